use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::warn;

use viralforge_common::{ContentCandidate, Platform};

use crate::scanner::{heuristic_viral_score, Scanner};

const REDDIT_URL: &str = "https://www.reddit.com";
const LIMIT: usize = 25;

/// Public Reddit listing scanner. No API key required; a descriptive
/// User-Agent keeps the unauthenticated endpoint happy. The listing API
/// has no `published_after` parameter, so the cutoff is applied
/// client-side.
pub struct RedditScanner {
    user_agent: String,
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: PostData,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    ups: i64,
    #[serde(default)]
    num_comments: i64,
    #[serde(default)]
    upvote_ratio: Option<f64>,
    #[serde(default)]
    created_utc: Option<f64>,
    #[serde(default)]
    is_video: bool,
    #[serde(default)]
    thumbnail: Option<String>,
}

impl RedditScanner {
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            http: super::http_client(15),
            base_url: REDDIT_URL.to_string(),
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
        let subreddit = niche.replace(' ', "");
        let listing: Listing = self
            .http
            .get(format!("{}/r/{}/top.json", self.base_url, subreddit))
            .header("User-Agent", &self.user_agent)
            .query(&[("t", "month"), ("limit", &LIMIT.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let now = Utc::now();
        let candidates = listing
            .data
            .children
            .into_iter()
            .filter(|child| child.data.is_video)
            .filter_map(|child| {
                let post = child.data;
                let published = post
                    .created_utc
                    .and_then(|ts| Utc.timestamp_opt(ts as i64, 0).single());
                if let (Some(after), Some(at)) = (published_after, published) {
                    if at < after {
                        return None;
                    }
                }

                let ups = post.ups.max(0) as u64;
                let engagement = post
                    .upvote_ratio
                    .unwrap_or_else(|| {
                        if ups == 0 {
                            0.0
                        } else {
                            (post.num_comments.max(0) as f64 / ups as f64).min(1.0)
                        }
                    })
                    .clamp(0.0, 1.0);
                let age_hours = published
                    .map(|p| (now - p).num_minutes() as f64 / 60.0)
                    .unwrap_or(24.0);

                let mut candidate = ContentCandidate::new(
                    format!("reddit_{}", post.id),
                    Platform::Reddit,
                    format!("{}{}", REDDIT_URL, post.permalink),
                )
                .with_title(post.title)
                .with_author(post.author)
                .with_views(ups)
                .with_engagement(engagement)
                .with_viral_score(heuristic_viral_score(ups, engagement, age_hours));
                candidate.description = post.selftext;
                candidate.thumbnail_url =
                    post.thumbnail.filter(|t| t.starts_with("http"));
                if let Some(at) = published {
                    candidate.discovered_at = now;
                    candidate
                        .metadata
                        .insert("published_at".into(), serde_json::json!(at.to_rfc3339()));
                }
                Some(candidate)
            })
            .collect();
        Ok(candidates)
    }
}

#[async_trait]
impl Scanner for RedditScanner {
    async fn scan(
        &self,
        niche: &str,
        published_after: Option<DateTime<Utc>>,
    ) -> Vec<ContentCandidate> {
        match self.fetch(niche, published_after).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(scanner = "reddit", niche, error = %e, "Scan failed");
                Vec::new()
            }
        }
    }

    fn platform_name(&self) -> &'static str {
        "reddit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn post(id: &str, created_utc: i64, is_video: bool) -> serde_json::Value {
        serde_json::json!({
            "data": {
                "id": id,
                "title": format!("post {id}"),
                "author": "u/someone",
                "permalink": format!("/r/videos/{id}"),
                "ups": 4200,
                "num_comments": 120,
                "upvote_ratio": 0.93,
                "created_utc": created_utc,
                "is_video": is_video
            }
        })
    }

    #[tokio::test]
    async fn filters_non_video_and_stale_posts() {
        let server = MockServer::start().await;
        let now = Utc::now().timestamp();
        let old = (Utc::now() - Duration::days(20)).timestamp();
        Mock::given(method("GET"))
            .and(path("/r/videos/top.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "children": [
                    post("fresh", now, true),
                    post("stale", old, true),
                    post("text", now, false)
                ]}
            })))
            .mount(&server)
            .await;

        let scanner = RedditScanner::new("viralforge/0.1").with_base_url(&server.uri());
        let after = Utc::now() - Duration::days(7);
        let candidates = scanner.scan("videos", Some(after)).await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "reddit_fresh");
        assert_eq!(candidates[0].engagement_score, 0.93);
    }

    #[tokio::test]
    async fn http_error_is_an_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        let scanner = RedditScanner::new("viralforge/0.1").with_base_url(&server.uri());
        assert!(scanner.scan("videos", None).await.is_empty());
    }
}
