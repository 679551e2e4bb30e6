use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use viralforge_common::ContentCandidate;

/// A platform scanner. Implementations are pure request/parse
/// transducers: no shared mutable state, safe to call concurrently, and
/// they never fail across the boundary: transport or parse problems are
/// logged and surface as an empty list.
///
/// Rate limiting and per-request timeouts are the adapter's own
/// responsibility; the aggregator only imposes an outer deadline.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Fetch candidates for a niche, bounded (typically ≤ 25).
    /// `published_after` is passed upstream when the API supports it,
    /// otherwise filtered client-side best-effort.
    async fn scan(
        &self,
        niche: &str,
        published_after: Option<DateTime<Utc>>,
    ) -> Vec<ContentCandidate>;

    /// Stable name used for dedupe keys and metrics.
    fn platform_name(&self) -> &'static str;
}

/// Scanner that always returns nothing. The canonical fallback for
/// platforms with no configured integration, and a convenient test stub.
pub struct NoopScanner {
    name: &'static str,
}

impl NoopScanner {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl Scanner for NoopScanner {
    async fn scan(
        &self,
        _niche: &str,
        _published_after: Option<DateTime<Utc>>,
    ) -> Vec<ContentCandidate> {
        Vec::new()
    }

    fn platform_name(&self) -> &'static str {
        self.name
    }
}

/// The set of scanners a discovery sweep fans out across.
#[derive(Default, Clone)]
pub struct ScannerRegistry {
    scanners: Vec<Arc<dyn Scanner>>,
}

impl ScannerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, scanner: Arc<dyn Scanner>) -> Self {
        self.scanners.push(scanner);
        self
    }

    pub fn all(&self) -> &[Arc<dyn Scanner>] {
        &self.scanners
    }

    pub fn len(&self) -> usize {
        self.scanners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }
}

/// Shared heuristic used by adapters that have no platform-native viral
/// signal: blend engagement with velocity (views per hour since publish).
pub fn heuristic_viral_score(views: u64, engagement: f64, age_hours: f64) -> f64 {
    let velocity = views as f64 / age_hours.max(1.0);
    let velocity_part = (velocity / 1000.0).min(1.0) * 50.0;
    let engagement_part = engagement.clamp(0.0, 1.0) * 50.0;
    (velocity_part + engagement_part).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_scanner_is_empty() {
        let scanner = NoopScanner::new("snapchat");
        assert!(scanner.scan("AI", None).await.is_empty());
        assert_eq!(scanner.platform_name(), "snapchat");
    }

    #[test]
    fn viral_score_stays_in_range() {
        assert_eq!(heuristic_viral_score(0, 0.0, 1.0), 0.0);
        assert_eq!(heuristic_viral_score(u64::MAX, 5.0, 0.0), 100.0);
        let mid = heuristic_viral_score(10_000, 0.5, 24.0);
        assert!(mid > 0.0 && mid < 100.0);
    }
}
