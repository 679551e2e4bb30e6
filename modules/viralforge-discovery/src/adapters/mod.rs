pub mod archive_org;
pub mod metasearch;
pub mod reddit;
pub mod tiktok;
pub mod youtube;

pub use archive_org::ArchiveOrgScanner;
pub use metasearch::MetaSearchScanner;
pub use reddit::RedditScanner;
pub use tiktok::TikTokScanner;
pub use youtube::YouTubeScanner;

use std::time::Duration;

/// One HTTP client per adapter, carrying the adapter's own timeout.
pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_default()
}
