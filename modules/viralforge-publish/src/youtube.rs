use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use viralforge_common::{Platform, PostMetadata};
use viralforge_store::TokenManager;

use crate::error::PublishError;
use crate::publisher::Publisher;
use crate::retry::retry_after_secs;

const YOUTUBE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3";
const TITLE_LIMIT: usize = 100;

/// YouTube Shorts publisher over the Data API v3 resumable upload:
/// one session init, one resumable PUT of the whole body.
pub struct YouTubePublisher {
    tokens: Arc<TokenManager>,
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct InsertResponse {
    id: Option<String>,
}

impl YouTubePublisher {
    pub fn new(tokens: Arc<TokenManager>) -> Self {
        Self {
            tokens,
            http: reqwest::Client::new(),
            base_url: YOUTUBE_UPLOAD_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Publisher for YouTubePublisher {
    async fn upload(
        &self,
        video: &Path,
        metadata: &PostMetadata,
        account_id: Option<i64>,
    ) -> Result<String, PublishError> {
        let token = self
            .tokens
            .fresh_token(Platform::YouTube, account_id)
            .await?;

        let title: String = metadata.title.chars().take(TITLE_LIMIT).collect();
        let description = format!(
            "{}\n\n#shorts {}",
            metadata.description,
            metadata.hashtags.join(" ")
        );
        let body = serde_json::json!({
            "snippet": {
                "title": title,
                "description": description,
                "categoryId": "22"
            },
            "status": {
                "privacyStatus": "public",
                "selfDeclaredMadeForKids": false
            }
        });

        let response = self
            .http
            .post(format!("{}/videos", self.base_url))
            .query(&[
                ("uploadType", "resumable"),
                ("part", "snippet,status"),
            ])
            .bearer_auth(&token.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| PublishError::Init(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(PublishError::Auth(format!("session init rejected: {status}")));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PublishError::Quota {
                retry_after_secs: retry_after_secs(response.headers()),
            });
        }
        if !status.is_success() {
            return Err(PublishError::Init(status.to_string()));
        }

        let session_url = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                PublishError::Protocol("resumable session missing Location header".to_string())
            })?;
        debug!(session = %session_url, "Resumable session open");

        let bytes = tokio::fs::read(video)
            .await
            .map_err(|e| PublishError::Init(format!("cannot read video: {e}")))?;

        let response = self
            .http
            .put(&session_url)
            .bearer_auth(&token.access_token)
            .header("Content-Type", "video/mp4")
            .body(bytes)
            .send()
            .await
            .map_err(|e| PublishError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PublishError::Finalize(response.status().to_string()));
        }
        let inserted: InsertResponse = response
            .json()
            .await
            .map_err(|e| PublishError::Protocol(format!("insert response: {e}")))?;
        let video_id = inserted
            .id
            .ok_or_else(|| PublishError::Protocol("insert response missing id".to_string()))?;

        let url = format!("https://youtube.com/shorts/{video_id}");
        info!(url = %url, "YouTube upload published");
        Ok(url)
    }

    fn platform(&self) -> Platform {
        Platform::YouTube
    }
}
