use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use viralforge_common::{ContentCandidate, Platform};

use crate::scanner::{heuristic_viral_score, Scanner};

const YOUTUBE_API_URL: &str = "https://www.googleapis.com/youtube/v3";
const MAX_RESULTS: usize = 25;

/// YouTube Data API v3 scanner. Searches short-form uploads by niche
/// (long-form "pillar" mode widens the duration filter), then fetches
/// statistics for the hits.
pub struct YouTubeScanner {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
    /// When true, search long-form pillar content instead of shorts.
    long_form: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct SearchId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "channelTitle", default)]
    channel_title: String,
    #[serde(rename = "publishedAt")]
    published_at: Option<DateTime<Utc>>,
    thumbnails: Option<Thumbnails>,
}

#[derive(Debug, Deserialize)]
struct Thumbnails {
    high: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: String,
    statistics: Option<Statistics>,
    #[serde(rename = "contentDetails")]
    content_details: Option<ContentDetails>,
}

#[derive(Debug, Deserialize)]
struct Statistics {
    #[serde(rename = "viewCount", default)]
    view_count: Option<String>,
    #[serde(rename = "likeCount", default)]
    like_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: Option<String>,
}

impl YouTubeScanner {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            http: super::http_client(15),
            base_url: YOUTUBE_API_URL.to_string(),
            long_form: false,
        }
    }

    /// Pillar-content variant: 5-10 minute videos worth chopping into clips.
    pub fn long_form(api_key: &str) -> Self {
        Self {
            long_form: true,
            ..Self::new(api_key)
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
        let mut query = vec![
            ("part", "snippet".to_string()),
            ("q", niche.to_string()),
            ("type", "video".to_string()),
            ("order", "viewCount".to_string()),
            ("maxResults", MAX_RESULTS.to_string()),
            (
                "videoDuration",
                if self.long_form { "medium" } else { "short" }.to_string(),
            ),
            ("key", self.api_key.clone()),
        ];
        if let Some(after) = published_after {
            query.push(("publishedAfter", after.to_rfc3339()));
        }

        let search: SearchResponse = self
            .http
            .get(format!("{}/search", self.base_url))
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let ids: Vec<String> = search
            .items
            .iter()
            .filter_map(|i| i.id.video_id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let stats: VideosResponse = self
            .http
            .get(format!("{}/videos", self.base_url))
            .query(&[
                ("part", "statistics,contentDetails".to_string()),
                ("id", ids.join(",")),
                ("key", self.api_key.clone()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let now = Utc::now();
        let candidates = search
            .items
            .into_iter()
            .filter_map(|item| {
                let video_id = item.id.video_id?;
                let detail = stats.items.iter().find(|v| v.id == video_id);
                let views = detail
                    .and_then(|v| v.statistics.as_ref())
                    .and_then(|s| s.view_count.as_deref())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(0);
                let likes = detail
                    .and_then(|v| v.statistics.as_ref())
                    .and_then(|s| s.like_count.as_deref())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(0);
                let duration = detail
                    .and_then(|v| v.content_details.as_ref())
                    .and_then(|d| d.duration.as_deref())
                    .map(parse_iso8601_duration)
                    .unwrap_or(0.0);

                let engagement = if views > 0 {
                    (likes as f64 / views as f64).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                let age_hours = item
                    .snippet
                    .published_at
                    .map(|p| (now - p).num_minutes() as f64 / 60.0)
                    .unwrap_or(24.0);

                let mut candidate = ContentCandidate::new(
                    format!("yt_{video_id}"),
                    Platform::YouTube,
                    format!("https://www.youtube.com/watch?v={video_id}"),
                )
                .with_title(item.snippet.title)
                .with_author(item.snippet.channel_title)
                .with_views(views)
                .with_engagement(engagement)
                .with_viral_score(heuristic_viral_score(views, engagement, age_hours));
                candidate.description = item.snippet.description;
                candidate.thumbnail_url = item.snippet.thumbnails.and_then(|t| t.high).map(|t| t.url);
                candidate.duration_seconds = duration;
                Some(candidate)
            })
            .collect();
        Ok(candidates)
    }
}

#[async_trait]
impl Scanner for YouTubeScanner {
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
                warn!(scanner = self.platform_name(), niche, error = %e, "Scan failed");
                Vec::new()
            }
        }
    }

    fn platform_name(&self) -> &'static str {
        if self.long_form {
            "youtube_long"
        } else {
            "youtube"
        }
    }
}

/// Parse an ISO-8601 video duration (`PT1M30S`) into seconds.
fn parse_iso8601_duration(raw: &str) -> f64 {
    let body = match raw.strip_prefix("PT") {
        Some(b) => b,
        None => return 0.0,
    };
    let mut total = 0.0;
    let mut digits = String::new();
    for ch in body.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let value: f64 = digits.parse().unwrap_or(0.0);
        digits.clear();
        total += match ch {
            'H' => value * 3600.0,
            'M' => value * 60.0,
            'S' => value,
            _ => 0.0,
        };
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn iso8601_durations() {
        assert_eq!(parse_iso8601_duration("PT45S"), 45.0);
        assert_eq!(parse_iso8601_duration("PT1M30S"), 90.0);
        assert_eq!(parse_iso8601_duration("PT1H2M3S"), 3723.0);
        assert_eq!(parse_iso8601_duration("garbage"), 0.0);
    }

    #[tokio::test]
    async fn unconfigured_scanner_is_silent() {
        let scanner = YouTubeScanner::new("");
        assert!(scanner.scan("AI", None).await.is_empty());
    }

    #[tokio::test]
    async fn parses_search_and_stats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("videoDuration", "short"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{
                    "id": { "videoId": "abc123" },
                    "snippet": {
                        "title": "Morning motivation",
                        "description": "rise and grind",
                        "channelTitle": "Creator",
                        "publishedAt": "2026-07-30T00:00:00Z",
                        "thumbnails": { "high": { "url": "https://img/abc.jpg" } }
                    }
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/videos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{
                    "id": "abc123",
                    "statistics": { "viewCount": "50000", "likeCount": "2500" },
                    "contentDetails": { "duration": "PT58S" }
                }]
            })))
            .mount(&server)
            .await;

        let scanner = YouTubeScanner::new("key").with_base_url(&server.uri());
        let candidates = scanner.scan("motivation", None).await;
        assert_eq!(candidates.len(), 1);
        let c = &candidates[0];
        assert_eq!(c.id, "yt_abc123");
        assert_eq!(c.platform, Platform::YouTube);
        assert_eq!(c.views, 50_000);
        assert_eq!(c.engagement_score, 0.05);
        assert_eq!(c.duration_seconds, 58.0);
        assert!(c.viral_score > 0.0 && c.viral_score <= 100.0);
    }

    #[tokio::test]
    async fn upstream_error_yields_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let scanner = YouTubeScanner::new("key").with_base_url(&server.uri());
        assert!(scanner.scan("motivation", None).await.is_empty());
    }
}
