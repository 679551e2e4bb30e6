use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::warn;

use viralforge_common::{ContentCandidate, Platform};

use crate::scanner::{heuristic_viral_score, Scanner};

const DEFAULT_API_URL: &str = "https://api.tikapi.io";
const LIMIT: usize = 25;

/// TikTok trending scanner via a keyed discovery API host. Disabled
/// (empty results) when no key is configured.
pub struct TikTokScanner {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TrendingResponse {
    #[serde(default)]
    videos: Vec<TrendingVideo>,
}

#[derive(Debug, Deserialize)]
struct TrendingVideo {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    share_url: Option<String>,
    #[serde(default)]
    cover_url: Option<String>,
    #[serde(default)]
    play_count: u64,
    #[serde(default)]
    digg_count: u64,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    create_time: Option<i64>,
    #[serde(default)]
    hashtags: Vec<String>,
}

impl TikTokScanner {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            http: super::http_client(15),
            base_url: DEFAULT_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    async fn fetch(
        &self,
        niche: &str,
        published_after: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<ContentCandidate>> {
        let body: TrendingResponse = self
            .http
            .get(format!("{}/public/discover", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .query(&[("keywords", niche), ("count", &LIMIT.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let now = Utc::now();
        let candidates = body
            .videos
            .into_iter()
            .filter_map(|video| {
                let published = video
                    .create_time
                    .and_then(|ts| Utc.timestamp_opt(ts, 0).single());
                // No upstream time filter on this endpoint.
                if let (Some(after), Some(at)) = (published_after, published) {
                    if at < after {
                        return None;
                    }
                }

                let engagement = if video.play_count > 0 {
                    (video.digg_count as f64 / video.play_count as f64).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let age_hours = published
                    .map(|p| (now - p).num_minutes() as f64 / 60.0)
                    .unwrap_or(24.0);

                let url = video.share_url.clone().unwrap_or_else(|| {
                    format!("https://www.tiktok.com/@{}/video/{}", video.author, video.id)
                });
                let mut candidate =
                    ContentCandidate::new(format!("tiktok_{}", video.id), Platform::TikTok, url)
                        .with_title(video.title)
                        .with_author(video.author)
                        .with_views(video.play_count)
                        .with_engagement(engagement)
                        .with_viral_score(heuristic_viral_score(
                            video.play_count,
                            engagement,
                            age_hours,
                        ));
                candidate.thumbnail_url = video.cover_url;
                candidate.duration_seconds = video.duration;
                candidate.tags = video.hashtags;
                Some(candidate)
            })
            .collect();
        Ok(candidates)
    }
}

#[async_trait]
impl Scanner for TikTokScanner {
    async fn scan(
        &self,
        niche: &str,
        published_after: Option<DateTime<Utc>>,
    ) -> Vec<ContentCandidate> {
        if self.api_key.is_empty() {
            return Vec::new();
        }
        match self.fetch(niche, published_after).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(scanner = "tiktok", niche, error = %e, "Scan failed");
                Vec::new()
            }
        }
    }

    fn platform_name(&self) -> &'static str {
        "tiktok"
    }
}
