use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use stock_client::StockClient;
use tracing::warn;

/// Fetches one stock clip for a keyword. Failures are non-fatal: the
/// pipeline skips the overlay.
#[async_trait]
pub trait BRollSource: Send + Sync {
    async fn fetch_one(&self, keyword: &str, dest: &Path) -> Result<Option<PathBuf>>;
}

/// Pexels-backed B-roll source.
pub struct PexelsBRoll {
    client: Arc<StockClient>,
}

impl PexelsBRoll {
    pub fn new(client: Arc<StockClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BRollSource for PexelsBRoll {
    async fn fetch_one(&self, keyword: &str, dest: &Path) -> Result<Option<PathBuf>> {
        let urls = self.client.search_b_roll(keyword, 1).await?;
        let Some(url) = urls.first() else {
            return Ok(None);
        };
        match self.client.download(url, dest).await {
            Ok(path) => Ok(Some(path)),
            Err(e) => {
                warn!(keyword, error = %e, "B-roll download failed");
                Ok(None)
            }
        }
    }
}
