use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use viralforge_common::{Platform, PostMetadata};
use viralforge_store::TokenManager;

use crate::error::PublishError;
use crate::publisher::Publisher;
use crate::retry::{is_retryable_status, retry_after_secs, RetryConfig};

const TIKTOK_API_URL: &str = "https://open.tiktokapis.com";
/// Exactly 10 MiB per chunk except the last.
pub const CHUNK_SIZE: u64 = 10 * 1024 * 1024;
const TITLE_LIMIT: usize = 150;
const CHUNK_DEADLINE: Duration = Duration::from_secs(30);

/// Observable progression of the chunked upload machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkedUploadState {
    Idle,
    InitRequested,
    UploadSession,
    Chunk(u32),
    Finalize,
    Published,
}

/// TikTok video-kit publisher: init → chunked PUT → finalize.
pub struct TikTokPublisher {
    tokens: Arc<TokenManager>,
    http: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

#[derive(Debug, Deserialize)]
struct InitResponse {
    data: Option<InitData>,
}

#[derive(Debug, Deserialize)]
struct InitData {
    upload_url: Option<String>,
    publish_id: Option<String>,
}

impl TikTokPublisher {
    pub fn new(tokens: Arc<TokenManager>) -> Self {
        Self {
            tokens,
            http: reqwest::Client::builder()
                .timeout(CHUNK_DEADLINE)
                .build()
                .unwrap_or_default(),
            base_url: TIKTOK_API_URL.to_string(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn put_chunk(
        &self,
        upload_url: &str,
        chunk: &[u8],
        start: u64,
        end: u64,
        total: u64,
        index: u32,
        account_id: Option<i64>,
    ) -> Result<(), PublishError> {
        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                // Token gate precedes every retry; a failed refresh is an
                // auth failure, not a consumed retry.
                self.tokens
                    .fresh_token(Platform::TikTok, account_id)
                    .await?;
            }

            let response = self
                .http
                .put(upload_url)
                .header("Content-Type", "video/mp4")
                .header("Content-Range", format!("bytes {start}-{end}/{total}"))
                .body(chunk.to_vec())
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => {
                    debug!(index, bytes = chunk.len(), "Chunk uploaded");
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status();
                    if status == reqwest::StatusCode::UNAUTHORIZED
                        || status == reqwest::StatusCode::FORBIDDEN
                    {
                        return Err(PublishError::Auth(format!("chunk {index}: {status}")));
                    }
                    if !is_retryable_status(status) {
                        return Err(PublishError::Chunk {
                            index,
                            message: status.to_string(),
                        });
                    }
                    if !self.retry.can_retry(attempt) {
                        return Err(PublishError::Chunk {
                            index,
                            message: status.to_string(),
                        });
                    }
                    let mut delay = self.retry.delay_for_attempt(attempt + 1);
                    if let Some(secs) = retry_after_secs(response.headers()) {
                        delay = delay.max(Duration::from_secs(secs));
                    }
                    warn!(index, %status, ?delay, "Chunk failed, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if !self.retry.can_retry(attempt) {
                        return Err(PublishError::Chunk {
                            index,
                            message: e.to_string(),
                        });
                    }
                    let delay = self.retry.delay_for_attempt(attempt + 1);
                    warn!(index, error = %e, ?delay, "Chunk transport error, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(PublishError::Chunk {
            index,
            message: "retry budget exhausted".to_string(),
        })
    }
}

#[async_trait]
impl Publisher for TikTokPublisher {
    async fn upload(
        &self,
        video: &Path,
        metadata: &PostMetadata,
        account_id: Option<i64>,
    ) -> Result<String, PublishError> {
        let mut state = ChunkedUploadState::Idle;
        debug!(?state, video = %video.display(), "Upload requested");

        // Token gate before init.
        let token = self.tokens.fresh_token(Platform::TikTok, account_id).await?;
        let open_id = token.account_handle.clone();

        let size = tokio::fs::metadata(video)
            .await
            .map_err(|e| PublishError::Init(format!("cannot stat video: {e}")))?
            .len();
        if size == 0 {
            return Err(PublishError::Init("empty video file".to_string()));
        }
        let total_chunks = chunk_count(size);

        state = ChunkedUploadState::InitRequested;
        debug!(?state, size, total_chunks, "Starting chunked upload");

        let init_payload = serde_json::json!({
            "post_info": {
                "title": truncate_chars(&metadata.title, TITLE_LIMIT),
                "privacy_level": "SELF_ONLY",
                "disable_duet": false,
                "disable_comment": false,
                "disable_stitch": false,
                "video_cover_timestamp_ms": 1000
            },
            "source_info": {
                "source": "FILE_UPLOAD",
                "video_size": size,
                "chunk_size": CHUNK_SIZE,
                "total_chunk_count": total_chunks
            }
        });

        let response = self
            .http
            .post(format!("{}/v2/post/publish/video/init/", self.base_url))
            .bearer_auth(&token.access_token)
            .json(&init_payload)
            .send()
            .await
            .map_err(|e| PublishError::Init(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(PublishError::Auth(format!("init rejected: {status}")));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PublishError::Quota {
                retry_after_secs: retry_after_secs(response.headers()),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Init(format!("{status}: {body}")));
        }

        let init: InitResponse = response
            .json()
            .await
            .map_err(|e| PublishError::Protocol(format!("init response: {e}")))?;
        let data = init
            .data
            .ok_or_else(|| PublishError::Protocol("init response missing data".to_string()))?;
        let upload_url = data
            .upload_url
            .ok_or_else(|| PublishError::Protocol("init response missing upload_url".to_string()))?;
        let publish_id = data
            .publish_id
            .ok_or_else(|| PublishError::Protocol("init response missing publish_id".to_string()))?;

        state = ChunkedUploadState::UploadSession;
        debug!(?state, "Upload session open");

        let bytes = tokio::fs::read(video)
            .await
            .map_err(|e| PublishError::Init(format!("cannot read video: {e}")))?;

        for index in 0..total_chunks {
            state = ChunkedUploadState::Chunk(index);
            debug!(?state, "Uploading chunk");
            let start = index as u64 * CHUNK_SIZE;
            let end = ((index as u64 + 1) * CHUNK_SIZE).min(size) - 1;
            let chunk = &bytes[start as usize..=end as usize];
            self.put_chunk(&upload_url, chunk, start, end, size, index, account_id)
                .await?;
        }

        state = ChunkedUploadState::Finalize;
        debug!(?state, publish_id = %publish_id, "Finalizing");

        let url = format!("https://www.tiktok.com/@{open_id}/video/{publish_id}");
        state = ChunkedUploadState::Published;
        info!(?state, url = %url, "TikTok upload published");
        Ok(url)
    }

    fn platform(&self) -> Platform {
        Platform::TikTok
    }
}

/// ceil(size / CHUNK_SIZE)
pub fn chunk_count(size: u64) -> u32 {
    size.div_ceil(CHUNK_SIZE) as u32
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use viralforge_common::{SocialToken, TokenPayload};
    use viralforge_store::{MemoryTokenStore, TokenStore};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn valid_token() -> SocialToken {
        SocialToken {
            platform: Platform::TikTok,
            account_handle: "creator".into(),
            access_token: "valid-access".into(),
            refresh_token: Some("refresh".into()),
            token_type: None,
            scope: None,
            expires_at: Some(Utc::now() + ChronoDuration::hours(2)),
            owner_id: 0,
        }
    }

    async fn video_of_size(dir: &tempfile::TempDir, bytes: usize) -> std::path::PathBuf {
        let path = dir.path().join("video.mp4");
        tokio::fs::write(&path, vec![0u8; bytes]).await.unwrap();
        path
    }

    fn metadata() -> PostMetadata {
        PostMetadata {
            title: "my clip".into(),
            description: String::new(),
            hashtags: vec![],
        }
    }

    #[test]
    fn chunk_math() {
        assert_eq!(chunk_count(1), 1);
        assert_eq!(chunk_count(CHUNK_SIZE), 1);
        assert_eq!(chunk_count(CHUNK_SIZE + 1), 2);
        assert_eq!(chunk_count(25 * 1024 * 1024), 3);
    }

    #[test]
    fn title_truncates_on_chars() {
        let long = "å".repeat(200);
        assert_eq!(truncate_chars(&long, 150).chars().count(), 150);
    }

    #[tokio::test]
    async fn chunked_upload_retries_transient_chunk() {
        let server = MockServer::start().await;
        let size: u64 = 25 * 1024 * 1024;

        Mock::given(method("POST"))
            .and(path("/v2/post/publish/video/init/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "upload_url": format!("{}/upload", server.uri()),
                    "publish_id": "pub-42"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        // Chunk 2 (bytes 10485760-20971519) fails once with 503.
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .and(header(
                "Content-Range",
                format!("bytes 10485760-20971519/{size}").as_str(),
            ))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        store.insert(valid_token(), 0);
        let tokens = Arc::new(TokenManager::new(store));

        let dir = tempfile::tempdir().unwrap();
        let video = video_of_size(&dir, size as usize).await;

        let publisher = TikTokPublisher::new(tokens)
            .with_base_url(&server.uri())
            .with_retry(RetryConfig {
                max_attempts: 4,
                base_delay_ms: 1,
                max_delay_ms: 2,
            });
        let url = publisher.upload(&video, &metadata(), None).await.unwrap();
        assert_eq!(url, "https://www.tiktok.com/@creator/video/pub-42");

        let puts = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.method.as_str() == "PUT")
            .count();
        assert_eq!(puts, 4, "3 chunks + 1 retry");
    }

    #[tokio::test]
    async fn expired_token_without_refresher_is_auth_failure() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryTokenStore::new());
        store
            .store(
                Platform::TikTok,
                &TokenPayload {
                    access_token: "stale".into(),
                    refresh_token: None,
                    token_type: None,
                    scope: None,
                    expires_in: Some(-60),
                    open_id: Some("creator".into()),
                },
            )
            .await
            .unwrap();
        let tokens = Arc::new(TokenManager::new(store));

        let dir = tempfile::tempdir().unwrap();
        let video = video_of_size(&dir, 1024).await;
        let publisher = TikTokPublisher::new(tokens).with_base_url(&server.uri());

        let err = publisher.upload(&video, &metadata(), None).await.unwrap_err();
        assert!(matches!(err, PublishError::Auth(_)));
        assert!(
            server.received_requests().await.unwrap().is_empty(),
            "no network calls with an unusable token"
        );
    }

    #[tokio::test]
    async fn init_failure_maps_to_init_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/post/publish/video/init/"))
            .respond_with(ResponseTemplate::new(500).set_body_string("spicy"))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        store.insert(valid_token(), 0);
        let tokens = Arc::new(TokenManager::new(store));

        let dir = tempfile::tempdir().unwrap();
        let video = video_of_size(&dir, 1024).await;
        let publisher = TikTokPublisher::new(tokens).with_base_url(&server.uri());

        let err = publisher.upload(&video, &metadata(), None).await.unwrap_err();
        assert!(matches!(err, PublishError::Init(_)));
    }

    #[tokio::test]
    async fn persistent_chunk_failure_names_the_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/post/publish/video/init/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "upload_url": format!("{}/upload", server.uri()),
                    "publish_id": "pub-9"
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryTokenStore::new());
        store.insert(valid_token(), 0);
        let tokens = Arc::new(TokenManager::new(store));

        let dir = tempfile::tempdir().unwrap();
        let video = video_of_size(&dir, 1024).await;
        let publisher = TikTokPublisher::new(tokens)
            .with_base_url(&server.uri())
            .with_retry(RetryConfig {
                max_attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 2,
            });

        let err = publisher.upload(&video, &metadata(), None).await.unwrap_err();
        match err {
            PublishError::Chunk { index, .. } => assert_eq!(index, 0),
            other => panic!("expected chunk error, got {other:?}"),
        }
    }
}
