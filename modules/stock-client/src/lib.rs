use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

const PEXELS_API_URL: &str = "https://api.pexels.com/videos";

/// Client for a Pexels-compatible stock video API.
pub struct StockClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    videos: Vec<StockVideo>,
}

#[derive(Debug, Deserialize)]
struct StockVideo {
    #[serde(default)]
    video_files: Vec<VideoFile>,
}

#[derive(Debug, Deserialize)]
struct VideoFile {
    link: String,
    #[serde(default)]
    quality: Option<String>,
    #[serde(default)]
    file_type: Option<String>,
}

impl StockClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            http: reqwest::Client::new(),
            base_url: PEXELS_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Search for download URLs matching a keyword. Portrait orientation
    /// is preferred (short-form targets); falls back to landscape when
    /// nothing portrait matches. Returns at most `count` URLs.
    pub async fn search_b_roll(&self, keyword: &str, count: usize) -> Result<Vec<String>> {
        if !self.is_configured() {
            warn!("stock API key missing, skipping B-roll search");
            return Ok(Vec::new());
        }

        let mut videos = self.search(keyword, "portrait").await?;
        if videos.is_empty() {
            videos = self.search(keyword, "landscape").await?;
        }

        let urls: Vec<String> = videos
            .into_iter()
            .filter_map(|v| best_file(&v).map(|f| f.link.clone()))
            .take(count)
            .collect();

        debug!(keyword, found = urls.len(), "B-roll search complete");
        Ok(urls)
    }

    async fn search(&self, keyword: &str, orientation: &str) -> Result<Vec<StockVideo>> {
        let response = self
            .http
            .get(format!("{}/search", self.base_url))
            .header("Authorization", &self.api_key)
            .query(&[
                ("query", keyword),
                ("per_page", "5"),
                ("orientation", orientation),
            ])
            .send()
            .await
            .context("stock search request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!("stock search error: {}", response.status()));
        }

        let body: SearchResponse = response.json().await?;
        Ok(body.videos)
    }

    /// Download a stock video to `output_dir`, returning its local path.
    pub async fn download(&self, url: &str, output_dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(output_dir).await?;

        let stem = url
            .split('?')
            .next()
            .unwrap_or(url)
            .rsplit('/')
            .next()
            .unwrap_or("stock");
        let mut filename = format!("stock_{stem}");
        if !filename.ends_with(".mp4") {
            filename.push_str(".mp4");
        }
        let path = output_dir.join(filename);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("stock download request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("stock download error: {}", response.status()));
        }

        let bytes = response.bytes().await?;
        tokio::fs::write(&path, &bytes).await?;
        Ok(path)
    }
}

/// Prefer HD mp4, then any file.
fn best_file(video: &StockVideo) -> Option<&VideoFile> {
    video
        .video_files
        .iter()
        .find(|f| {
            f.quality.as_deref() == Some("hd") && f.file_type.as_deref() == Some("video/mp4")
        })
        .or_else(|| video.video_files.first())
}
