use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use viralforge_common::{ContentCandidate, Platform};

use crate::scanner::Scanner;

const LIMIT: usize = 25;

/// SearxNG-style metasearch scanner: one query against a self-hosted
/// metasearch instance covers the long tail of platforms without
/// per-platform credentials. Disabled when no instance URL is configured.
pub struct MetaSearchScanner {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MetaResponse {
    #[serde(default)]
    results: Vec<MetaResult>,
}

#[derive(Debug, Deserialize)]
struct MetaResult {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default, rename = "publishedDate")]
    published_date: Option<DateTime<Utc>>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    author: Option<String>,
}

impl MetaSearchScanner {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: super::http_client(15),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch(
        &self,
        niche: &str,
        published_after: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<ContentCandidate>> {
        let body: MetaResponse = self
            .http
            .get(format!("{}/search", self.base_url))
            .query(&[
                ("q", niche),
                ("categories", "videos"),
                ("format", "json"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let candidates = body
            .results
            .into_iter()
            .take(LIMIT)
            .filter_map(|result| {
                if let (Some(after), Some(at)) = (published_after, result.published_date) {
                    if at < after {
                        return None;
                    }
                }
                let platform = platform_from_url(&result.url);
                let mut candidate = ContentCandidate::new(
                    format!("meta_{}", result.url),
                    platform,
                    result.url,
                )
                .with_title(result.title);
                candidate.description = result.content;
                candidate.thumbnail_url = result.thumbnail;
                candidate.author = result.author.unwrap_or_default();
                Some(candidate)
            })
            .collect();
        Ok(candidates)
    }
}

/// Infer the source platform from a result URL; anything unrecognized
/// stays tagged as metasearch.
fn platform_from_url(url: &str) -> Platform {
    let lower = url.to_lowercase();
    if lower.contains("youtube.com") || lower.contains("youtu.be") {
        Platform::YouTube
    } else if lower.contains("tiktok.com") {
        Platform::TikTok
    } else if lower.contains("rumble.com") {
        Platform::Rumble
    } else if lower.contains("twitch.tv") {
        Platform::Twitch
    } else if lower.contains("bilibili.com") {
        Platform::Bilibili
    } else {
        Platform::MetaSearch
    }
}

#[async_trait]
impl Scanner for MetaSearchScanner {
    async fn scan(
        &self,
        niche: &str,
        published_after: Option<DateTime<Utc>>,
    ) -> Vec<ContentCandidate> {
        if self.base_url.is_empty() {
            return Vec::new();
        }
        match self.fetch(niche, published_after).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(scanner = "metasearch", niche, error = %e, "Scan failed");
                Vec::new()
            }
        }
    }

    fn platform_name(&self) -> &'static str {
        "metasearch"
    }
}
