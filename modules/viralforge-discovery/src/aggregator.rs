use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use viralforge_common::error::Result;
use viralforge_common::{ContentCandidate, Horizon};
use viralforge_store::{CandidateStore, KvCache};

use crate::ranker::{apply_ranking, CandidateRanker, RANK_WINDOW};
use crate::scanner::ScannerRegistry;

const CACHE_TTL_SECS: u64 = 3600;
const MAX_CONCURRENT_SCANS: usize = 8;
/// Below this many stored hits, a search triggers a live sweep.
const SEARCH_LIVE_THRESHOLD: usize = 10;

pub fn trends_cache_key(niche: &str, horizon: Horizon) -> String {
    format!("discovery:trends:{niche}:{horizon}")
}

async fn scan_one(
    scanner: Arc<dyn crate::scanner::Scanner>,
    niche: String,
    published_after: chrono::DateTime<Utc>,
    per_adapter: Duration,
) -> Vec<ContentCandidate> {
    let name = scanner.platform_name();
    match tokio::time::timeout(per_adapter, scanner.scan(&niche, Some(published_after))).await {
        Ok(batch) => {
            debug!(scanner = name, found = batch.len(), "Scan complete");
            batch
        }
        Err(_) => {
            warn!(scanner = name, "Scan timed out, dropping");
            Vec::new()
        }
    }
}

/// Fan-out discovery across every registered scanner, with a shared
/// cache in front and LLM-assisted ranking behind.
pub struct DiscoveryService {
    scanners: ScannerRegistry,
    store: Arc<dyn CandidateStore>,
    cache: Arc<dyn KvCache>,
    ranker: Option<Arc<dyn CandidateRanker>>,
    adapter_timeout: Duration,
    outer_deadline: Duration,
}

impl DiscoveryService {
    pub fn new(
        scanners: ScannerRegistry,
        store: Arc<dyn CandidateStore>,
        cache: Arc<dyn KvCache>,
        ranker: Option<Arc<dyn CandidateRanker>>,
    ) -> Self {
        Self {
            scanners,
            store,
            cache,
            ranker,
            adapter_timeout: Duration::from_secs(15),
            outer_deadline: Duration::from_secs(60),
        }
    }

    pub fn with_timeouts(mut self, adapter: Duration, outer: Duration) -> Self {
        self.adapter_timeout = adapter;
        self.outer_deadline = outer;
        self
    }

    /// Find trending content for a niche, best candidate first.
    pub async fn aggregate(&self, niche: &str, horizon: Horizon) -> Result<Vec<ContentCandidate>> {
        let key = trends_cache_key(niche, horizon);

        // 1. Cache probe. A corrupt entry counts as a miss.
        if let Some(cached) = self.cache.get(&key).await.unwrap_or(None) {
            match serde_json::from_str::<Vec<ContentCandidate>>(&cached) {
                Ok(candidates) => {
                    debug!(niche, %horizon, "Discovery cache hit");
                    return Ok(candidates);
                }
                Err(e) => warn!(niche, error = %e, "Discarding corrupt cache entry"),
            }
        }
        info!(niche, %horizon, "Discovery cache miss, scanning");

        // 2. Fan out. Each adapter gets its own timeout; the whole sweep
        // an outer deadline. Slow adapters are dropped, not failed.
        let published_after = horizon.published_after(Utc::now());
        let merged = self.fan_out(niche, published_after).await;

        // 3. Dedupe, first seen id wins.
        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates: Vec<ContentCandidate> = merged
            .into_iter()
            .filter(|c| seen.insert(c.id.clone()))
            .collect();

        // 4. Persist every candidate tagged with the requested niche.
        for candidate in &candidates {
            if let Err(e) = self.store.upsert(candidate, niche).await {
                warn!(id = %candidate.id, error = %e, "Candidate upsert failed");
            }
        }

        // 5. Order: views descending, then LLM priority over the head.
        candidates.sort_by(|a, b| b.views.cmp(&a.views));
        if let Some(ranker) = &self.ranker {
            if candidates.len() >= 3 {
                let window = candidates.len().min(RANK_WINDOW);
                match ranker.rank(niche, &candidates[..window]).await {
                    Ok(indices) => {
                        candidates = apply_ranking(candidates, &indices);
                        info!(niche, "Neural ranking applied");
                    }
                    Err(e) => {
                        warn!(niche, error = %e, "Ranker failed, keeping views order");
                    }
                }
            }
        }

        // 6. Cache the final ordering.
        if let Ok(serialized) = serde_json::to_string(&candidates) {
            if let Err(e) = self.cache.set_ex(&key, &serialized, CACHE_TTL_SECS).await {
                warn!(niche, error = %e, "Failed to cache discovery results");
            }
        }

        Ok(candidates)
    }

    async fn fan_out(
        &self,
        niche: &str,
        published_after: chrono::DateTime<Utc>,
    ) -> Vec<ContentCandidate> {
        let deadline = Instant::now() + self.outer_deadline;
        let per_adapter = self.adapter_timeout;
        let semaphore = Arc::new(tokio::sync::Semaphore::new(MAX_CONCURRENT_SCANS));
        let mut set = tokio::task::JoinSet::new();
        for scanner in self.scanners.all().iter().cloned() {
            let niche = niche.to_string();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire().await;
                scan_one(scanner, niche, published_after, per_adapter).await
            });
        }

        let mut merged = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok(batch))) => merged.extend(batch),
                Ok(Some(Err(e))) => warn!(niche, error = %e, "Scan task failed"),
                Ok(None) => break,
                Err(_) => {
                    warn!(niche, "Discovery deadline reached, dropping slow scanners");
                    break;
                }
            }
        }
        merged
    }

    /// Keyword search over stored candidates; thin results trigger a live
    /// sweep with the query as the niche and return the union of both.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<ContentCandidate>> {
        let stored = self.store.search(query, limit).await?;
        if stored.len() >= SEARCH_LIVE_THRESHOLD {
            return Ok(stored);
        }

        info!(
            query,
            stored = stored.len(),
            "Insufficient stored results, triggering live scan"
        );
        let live = self.aggregate(query, Horizon::Month).await?;

        // Union, live ordering first; stored rows the sweep did not
        // rediscover keep their place at the tail. First seen id wins.
        let mut seen: HashSet<String> = HashSet::new();
        Ok(live
            .into_iter()
            .chain(stored)
            .filter(|c| seen.insert(c.id.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use viralforge_common::Platform;
    use viralforge_store::{MemoryCache, MemoryCandidateStore};

    use crate::scanner::Scanner;

    struct FixedScanner {
        name: &'static str,
        batch: Vec<ContentCandidate>,
        calls: AtomicUsize,
    }

    impl FixedScanner {
        fn new(name: &'static str, batch: Vec<ContentCandidate>) -> Arc<Self> {
            Arc::new(Self {
                name,
                batch,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Scanner for FixedScanner {
        async fn scan(
            &self,
            _niche: &str,
            _published_after: Option<DateTime<Utc>>,
        ) -> Vec<ContentCandidate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch.clone()
        }

        fn platform_name(&self) -> &'static str {
            self.name
        }
    }

    struct FixedRanker {
        raw: &'static str,
    }

    #[async_trait]
    impl CandidateRanker for FixedRanker {
        async fn rank(
            &self,
            _niche: &str,
            _candidates: &[ContentCandidate],
        ) -> anyhow::Result<Vec<usize>> {
            crate::ranker::LlmRanker::parse_indices(self.raw)
        }
    }

    fn candidate(id: &str, views: u64) -> ContentCandidate {
        ContentCandidate::new(id, Platform::YouTube, format!("https://yt/{id}"))
            .with_title(format!("clip {id}"))
            .with_views(views)
    }

    fn service(
        scanners: ScannerRegistry,
        store: Arc<MemoryCandidateStore>,
        cache: Arc<MemoryCache>,
        ranker: Option<Arc<dyn CandidateRanker>>,
    ) -> DiscoveryService {
        DiscoveryService::new(scanners, store, cache, ranker)
    }

    #[tokio::test]
    async fn empty_niche_scans_and_caches_empty() {
        let store = Arc::new(MemoryCandidateStore::new());
        let cache = Arc::new(MemoryCache::new());
        let registry = ScannerRegistry::new()
            .register(Arc::new(crate::scanner::NoopScanner::new("a")))
            .register(Arc::new(crate::scanner::NoopScanner::new("b")));

        let svc = service(registry, store.clone(), cache.clone(), None);
        let out = svc.aggregate("Zzz", Horizon::Month).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(store.len(), 0, "nothing persisted");

        let cached = cache
            .get("discovery:trends:Zzz:30d")
            .await
            .unwrap()
            .expect("empty result is cached");
        assert_eq!(cached, "[]");
    }

    #[tokio::test]
    async fn cache_hit_skips_adapters() {
        let store = Arc::new(MemoryCandidateStore::new());
        let cache = Arc::new(MemoryCache::new());
        let pre = vec![candidate("yt_a", 10), candidate("yt_b", 5)];
        cache
            .set_ex(
                "discovery:trends:AI:30d",
                &serde_json::to_string(&pre).unwrap(),
                3600,
            )
            .await
            .unwrap();

        let scanner = FixedScanner::new("youtube", vec![candidate("yt_live", 99)]);
        let registry = ScannerRegistry::new().register(scanner.clone());
        let svc = service(registry, store, cache, None);

        let out = svc.aggregate("AI", Horizon::Month).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "yt_a");
        assert_eq!(
            scanner.calls.load(Ordering::SeqCst),
            0,
            "cache hit makes zero adapter calls"
        );
    }

    #[tokio::test]
    async fn second_aggregate_within_ttl_is_identical() {
        let store = Arc::new(MemoryCandidateStore::new());
        let cache = Arc::new(MemoryCache::new());
        let scanner = FixedScanner::new("youtube", vec![candidate("yt_a", 7)]);
        let registry = ScannerRegistry::new().register(scanner.clone());
        let svc = service(registry, store, cache, None);

        let first = svc.aggregate("AI", Horizon::Week).await.unwrap();
        let second = svc.aggregate("AI", Horizon::Week).await.unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(scanner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_ranker_falls_back_to_views_desc() {
        let store = Arc::new(MemoryCandidateStore::new());
        let cache = Arc::new(MemoryCache::new());
        let scanner = FixedScanner::new(
            "youtube",
            vec![
                candidate("v100", 100),
                candidate("v50", 50),
                candidate("v200", 200),
                candidate("v10", 10),
            ],
        );
        let registry = ScannerRegistry::new().register(scanner);
        let svc = service(
            registry,
            store,
            cache,
            Some(Arc::new(FixedRanker { raw: "NOT-JSON" })),
        );

        let out = svc.aggregate("AI", Horizon::Month).await.unwrap();
        let views: Vec<u64> = out.iter().map(|c| c.views).collect();
        assert_eq!(views, [200, 100, 50, 10]);
    }

    #[tokio::test]
    async fn ranker_reorders_but_never_drops() {
        let store = Arc::new(MemoryCandidateStore::new());
        let cache = Arc::new(MemoryCache::new());
        let scanner = FixedScanner::new(
            "youtube",
            vec![
                candidate("v100", 100),
                candidate("v50", 50),
                candidate("v200", 200),
                candidate("v10", 10),
            ],
        );
        let registry = ScannerRegistry::new().register(scanner);
        // Views-desc order is [v200, v100, v50, v10]; ranker prefers index 2.
        let svc = service(
            registry,
            store,
            cache,
            Some(Arc::new(FixedRanker { raw: "[2]" })),
        );

        let out = svc.aggregate("AI", Horizon::Month).await.unwrap();
        let ids: Vec<&str> = out.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["v50", "v200", "v100", "v10"]);
    }

    #[tokio::test]
    async fn duplicate_ids_keep_first_seen() {
        let store = Arc::new(MemoryCandidateStore::new());
        let cache = Arc::new(MemoryCache::new());
        let a = FixedScanner::new("youtube", vec![candidate("dup", 10)]);
        let b = FixedScanner::new("metasearch", vec![candidate("dup", 999)]);
        let registry = ScannerRegistry::new().register(a).register(b);
        let svc = service(registry, store, cache, None);

        let out = svc.aggregate("AI", Horizon::Month).await.unwrap();
        assert_eq!(out.len(), 1, "no two candidates share an id");
    }

    #[tokio::test]
    async fn slow_scanner_is_dropped_not_failed() {
        struct SlowScanner;
        #[async_trait]
        impl Scanner for SlowScanner {
            async fn scan(
                &self,
                _niche: &str,
                _published_after: Option<DateTime<Utc>>,
            ) -> Vec<ContentCandidate> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                vec![candidate("slow", 1)]
            }
            fn platform_name(&self) -> &'static str {
                "slow"
            }
        }

        let store = Arc::new(MemoryCandidateStore::new());
        let cache = Arc::new(MemoryCache::new());
        let fast = FixedScanner::new("fast", vec![candidate("fast", 5)]);
        let registry = ScannerRegistry::new()
            .register(Arc::new(SlowScanner))
            .register(fast);
        let svc = service(registry, store, cache, None)
            .with_timeouts(Duration::from_millis(50), Duration::from_secs(5));

        let out = svc.aggregate("AI", Horizon::Day).await.unwrap();
        let ids: Vec<&str> = out.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["fast"]);
    }

    #[tokio::test]
    async fn search_prefers_stored_when_plentiful() {
        let store = Arc::new(MemoryCandidateStore::new());
        let cache = Arc::new(MemoryCache::new());
        for i in 0..12 {
            store
                .upsert(&candidate(&format!("yt_{i}"), i as u64), "gratitude")
                .await
                .unwrap();
        }
        let scanner = FixedScanner::new("youtube", vec![candidate("live", 1)]);
        let registry = ScannerRegistry::new().register(scanner.clone());
        let svc = service(registry, store, cache, None);

        let out = svc.search("gratitude", 50).await.unwrap();
        assert_eq!(out.len(), 12);
        assert_eq!(scanner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn thin_search_triggers_live_scan() {
        let store = Arc::new(MemoryCandidateStore::new());
        let cache = Arc::new(MemoryCache::new());
        let scanner = FixedScanner::new("youtube", vec![candidate("live", 1)]);
        let registry = ScannerRegistry::new().register(scanner.clone());
        let svc = service(registry, store, cache, None);

        let out = svc.search("obscure query", 50).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "live");
        assert_eq!(scanner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn thin_search_returns_union_of_stored_and_live() {
        let store = Arc::new(MemoryCandidateStore::new());
        let cache = Arc::new(MemoryCache::new());
        // One stored hit the live sweep will rediscover, one it won't.
        let mut kept = candidate("yt_kept", 30);
        kept.title = "gratitude journal".into();
        store.upsert(&kept, "gratitude").await.unwrap();
        let mut shared = candidate("yt_shared", 20);
        shared.title = "gratitude walk".into();
        store.upsert(&shared, "gratitude").await.unwrap();

        let scanner = FixedScanner::new(
            "youtube",
            vec![candidate("yt_live", 99), candidate("yt_shared", 20)],
        );
        let registry = ScannerRegistry::new().register(scanner);
        let svc = service(registry, store, cache, None);

        let out = svc.search("gratitude", 50).await.unwrap();
        let ids: Vec<&str> = out.iter().map(|c| c.id.as_str()).collect();
        // Live ordering first, undiscovered stored row kept at the tail,
        // no duplicate for the overlap.
        assert_eq!(ids, ["yt_live", "yt_shared", "yt_kept"]);
    }
}
