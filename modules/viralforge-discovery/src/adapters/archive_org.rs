use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use viralforge_common::{ContentCandidate, Platform};

use crate::scanner::Scanner;

const ARCHIVE_URL: &str = "https://archive.org";
const LIMIT: usize = 25;

/// Internet Archive scanner for public-domain footage. Keyless.
pub struct ArchiveOrgScanner {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct AdvancedSearch {
    response: SearchDocs,
}

#[derive(Debug, Deserialize)]
struct SearchDocs {
    #[serde(default)]
    docs: Vec<Doc>,
}

#[derive(Debug, Deserialize)]
struct Doc {
    identifier: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<serde_json::Value>,
    #[serde(default)]
    downloads: Option<u64>,
    #[serde(default, rename = "publicdate")]
    public_date: Option<DateTime<Utc>>,
}

impl ArchiveOrgScanner {
    pub fn new() -> Self {
        Self {
            http: super::http_client(20),
            base_url: ARCHIVE_URL.to_string(),
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
        let query = format!("{niche} AND mediatype:movies");
        let body: AdvancedSearch = self
            .http
            .get(format!("{}/advancedsearch.php", self.base_url))
            .query(&[
                ("q", query.as_str()),
                ("fl[]", "identifier"),
                ("fl[]", "title"),
                ("fl[]", "description"),
                ("fl[]", "downloads"),
                ("fl[]", "publicdate"),
                ("rows", &LIMIT.to_string()),
                ("output", "json"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let candidates = body
            .response
            .docs
            .into_iter()
            .filter_map(|doc| {
                if let (Some(after), Some(at)) = (published_after, doc.public_date) {
                    if at < after {
                        return None;
                    }
                }
                let description = match doc.description {
                    Some(serde_json::Value::String(s)) => s,
                    Some(serde_json::Value::Array(parts)) => parts
                        .into_iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect::<Vec<_>>()
                        .join(" "),
                    _ => String::new(),
                };
                let mut candidate = ContentCandidate::new(
                    format!("archive_{}", doc.identifier),
                    Platform::PublicDomain,
                    format!("{}/details/{}", ARCHIVE_URL, doc.identifier),
                )
                .with_title(doc.title.unwrap_or_default())
                .with_views(doc.downloads.unwrap_or(0));
                candidate.description = description;
                Some(candidate)
            })
            .collect();
        Ok(candidates)
    }
}

impl Default for ArchiveOrgScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for ArchiveOrgScanner {
    async fn scan(
        &self,
        niche: &str,
        published_after: Option<DateTime<Utc>>,
    ) -> Vec<ContentCandidate> {
        match self.fetch(niche, published_after).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(scanner = "public_domain", niche, error = %e, "Scan failed");
                Vec::new()
            }
        }
    }

    fn platform_name(&self) -> &'static str {
        "public_domain"
    }
}
