//! Scheduled-post sweep against a mocked platform: an expired token is
//! refreshed exactly once, the upload goes out, and the post lands in
//! Published with a history entry.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use viralforge_common::{Platform, PostMetadata, PostStatus, ScheduledPost, TokenPayload};
use viralforge_engine::PostSweeper;
use viralforge_publish::{
    OAuthRefresher, PublisherRegistry, RefreshEndpoint, TikTokPublisher,
};
use viralforge_store::{
    MemoryPostStore, MemoryTokenStore, ScheduledPostStore, TokenManager, TokenStore,
};

#[tokio::test]
async fn expired_token_refreshes_once_then_publishes() {
    let platform_api = MockServer::start().await;
    let oauth = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh-access",
            "refresh_token": "next-refresh",
            "expires_in": 86400,
            "open_id": "creator"
        })))
        .expect(1)
        .mount(&oauth)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/post/publish/video/init/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {
                "upload_url": format!("{}/upload", platform_api.uri()),
                "publish_id": "pub-1"
            }
        })))
        .expect(1)
        .mount(&platform_api)
        .await;
    Mock::given(method("PUT"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&platform_api)
        .await;

    // An already-expired grant on record.
    let tokens = Arc::new(MemoryTokenStore::new());
    tokens
        .store(
            Platform::TikTok,
            &TokenPayload {
                access_token: "stale-access".into(),
                refresh_token: Some("refresh-1".into()),
                token_type: Some("bearer".into()),
                scope: None,
                expires_in: Some(-1),
                open_id: Some("creator".into()),
            },
        )
        .await
        .unwrap();
    let manager = Arc::new(TokenManager::new(tokens.clone()).with_refresher(
        Platform::TikTok,
        Arc::new(OAuthRefresher::new(RefreshEndpoint {
            token_url: format!("{}/oauth/token", oauth.uri()),
            client_id: "client-key".into(),
            client_secret: "client-secret".into(),
            client_id_field: "client_key",
        })),
    ));

    let dir = tempfile::tempdir().unwrap();
    let video = dir.path().join("scheduled.mp4");
    tokio::fs::write(&video, vec![7u8; 4096]).await.unwrap();

    let posts = Arc::new(MemoryPostStore::new());
    let post = ScheduledPost {
        id: Uuid::new_v4(),
        video_ref: video.display().to_string(),
        platform: Platform::TikTok,
        account_id: None,
        scheduled_for: Utc::now() - chrono::Duration::seconds(1),
        status: PostStatus::Pending,
        metadata: PostMetadata {
            title: "scheduled clip".into(),
            description: String::new(),
            hashtags: vec![],
        },
    };
    posts.schedule(&post).await.unwrap();

    let registry = PublisherRegistry::new().register(Arc::new(
        TikTokPublisher::new(manager).with_base_url(&platform_api.uri()),
    ));
    let sweeper = PostSweeper::new(posts.clone(), registry);

    sweeper.sweep(Utc::now()).await.unwrap();

    assert_eq!(posts.get(post.id).unwrap().status, PostStatus::Published);
    let history = posts.history();
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0].url,
        "https://www.tiktok.com/@creator/video/pub-1"
    );

    // The refreshed grant is now on record.
    let stored = tokens.get(Platform::TikTok, None).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "fresh-access");
}
