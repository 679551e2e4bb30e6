use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use viralforge_common::error::Result;
use viralforge_common::{Horizon, Job, JobKind, Platform};
use viralforge_discovery::DiscoveryService;
use viralforge_store::{JobStore, NicheStore};

use crate::queue::{TaskEnvelope, TaskKind, TaskQueue};
use crate::scheduler::PeriodicJob;

const AUTO_TITLE_LIMIT: usize = 40;

/// The niche sweep. With autopilot off each active niche gets a plain
/// discovery job; with autopilot on the full find-winner → build →
/// publish cycle runs per niche.
pub struct Sentinel {
    niches: Arc<dyn NicheStore>,
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn TaskQueue>,
    discovery: Arc<DiscoveryService>,
    publish_platform: Platform,
}

impl Sentinel {
    pub fn new(
        niches: Arc<dyn NicheStore>,
        jobs: Arc<dyn JobStore>,
        queue: Arc<dyn TaskQueue>,
        discovery: Arc<DiscoveryService>,
    ) -> Self {
        Self {
            niches,
            jobs,
            queue,
            discovery,
            publish_platform: Platform::YouTube,
        }
    }

    pub fn with_publish_platform(mut self, platform: Platform) -> Self {
        self.publish_platform = platform;
        self
    }

    pub async fn sweep(&self) -> Result<()> {
        let autopilot = self.niches.autopilot_enabled().await?;
        let niches = self.niches.active_niches().await?;
        info!(
            niches = niches.len(),
            autopilot, "Sentinel sweep starting"
        );

        for monitored in niches {
            if autopilot {
                if let Err(e) = self.autonomous_cycle(&monitored.niche).await {
                    warn!(niche = %monitored.niche, error = %e, "Autonomous cycle failed");
                }
            } else if let Err(e) = self.enqueue_scan(&monitored.niche).await {
                warn!(niche = %monitored.niche, error = %e, "Scan dispatch failed");
            }
            self.niches
                .touch_scanned(&monitored.niche, Utc::now())
                .await?;
        }
        Ok(())
    }

    /// Scan-only mode: record a discovery job and hand it to the queue.
    async fn enqueue_scan(&self, niche: &str) -> Result<()> {
        let job = Job::new(JobKind::Discovery, 0, niche)
            .with_title(format!("Scan: {niche}"));
        self.jobs.create(&job).await?;
        self.queue
            .enqueue(&TaskEnvelope::new(
                TaskKind::ScanTrends {
                    niche: niche.to_string(),
                },
                Some(job.id),
            ))
            .await
    }

    /// The master loop: find trends, pick the winner, dispatch the
    /// transform. Skips the niche when the winner is already in the
    /// pipeline (at most one live job per source).
    pub async fn autonomous_cycle(&self, niche: &str) -> Result<()> {
        let candidates = self.discovery.aggregate(niche, Horizon::Month).await?;
        let Some(winner) = candidates.first() else {
            info!(niche, "No candidates found, skipping cycle");
            return Ok(());
        };
        info!(niche, winner = %winner.title, url = %winner.url, "Winner identified");

        if let Some(existing) = self.jobs.find_active_by_input(&winner.url).await? {
            info!(
                niche,
                job = %existing.id,
                status = %existing.status,
                "Source already in pipeline, skipping"
            );
            return Ok(());
        }

        let title: String = winner.title.chars().take(AUTO_TITLE_LIMIT).collect();
        let job = Job::new(JobKind::Transform, 0, &winner.url)
            .with_title(format!("AUTO: {title}"));
        self.jobs.create(&job).await?;
        self.queue
            .enqueue(&TaskEnvelope::new(
                TaskKind::DownloadAndProcess {
                    source_url: winner.url.clone(),
                    niche: niche.to_string(),
                    platform: self.publish_platform,
                },
                Some(job.id),
            ))
            .await?;
        info!(niche, job = %job.id, "Transform dispatched");
        Ok(())
    }
}

#[async_trait]
impl PeriodicJob for Sentinel {
    async fn run(&self) -> anyhow::Result<()> {
        self.sweep().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viralforge_common::{ContentCandidate, JobStatus};
    use viralforge_discovery::ScannerRegistry;
    use viralforge_store::{MemoryCache, MemoryCandidateStore, MemoryJobStore, MemoryNicheStore};

    use crate::queue::MemoryQueue;

    struct FixedScanner(Vec<ContentCandidate>);

    #[async_trait]
    impl viralforge_discovery::Scanner for FixedScanner {
        async fn scan(
            &self,
            _niche: &str,
            _published_after: Option<chrono::DateTime<Utc>>,
        ) -> Vec<ContentCandidate> {
            self.0.clone()
        }
        fn platform_name(&self) -> &'static str {
            "fixed"
        }
    }

    fn sentinel_with(
        candidates: Vec<ContentCandidate>,
    ) -> (Sentinel, Arc<MemoryJobStore>, Arc<MemoryQueue>, Arc<MemoryNicheStore>) {
        let jobs = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let niches = Arc::new(MemoryNicheStore::new());
        let discovery = Arc::new(DiscoveryService::new(
            ScannerRegistry::new().register(Arc::new(FixedScanner(candidates))),
            Arc::new(MemoryCandidateStore::new()),
            Arc::new(MemoryCache::new()),
            None,
        ));
        let sentinel = Sentinel::new(niches.clone(), jobs.clone(), queue.clone(), discovery);
        (sentinel, jobs, queue, niches)
    }

    fn candidate(url: &str, views: u64) -> ContentCandidate {
        ContentCandidate::new(format!("yt_{views}"), Platform::YouTube, url)
            .with_title("a winner appears")
            .with_views(views)
    }

    #[tokio::test]
    async fn empty_niche_creates_no_jobs() {
        let (sentinel, jobs, queue, _) = sentinel_with(vec![]);
        sentinel.autonomous_cycle("Zzz").await.unwrap();
        assert!(jobs.all().is_empty());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn cycle_dispatches_top_candidate() {
        let (sentinel, jobs, queue, _) = sentinel_with(vec![
            candidate("https://yt/low", 10),
            candidate("https://yt/top", 500),
        ]);
        sentinel.autonomous_cycle("AI").await.unwrap();

        let all = jobs.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].input_ref, "https://yt/top");
        assert!(all[0].title.starts_with("AUTO: "));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn at_most_one_job_per_source() {
        let (sentinel, jobs, queue, _) = sentinel_with(vec![candidate("https://yt/top", 500)]);

        sentinel.autonomous_cycle("AI").await.unwrap();
        sentinel.autonomous_cycle("AI").await.unwrap();
        assert_eq!(jobs.all().len(), 1, "active job blocks a duplicate");
        assert_eq!(queue.len(), 1);

        // A terminal job frees the source for another run.
        let job_id = jobs.all()[0].id;
        jobs.update(job_id, JobStatus::Completed, 100).await.unwrap();
        sentinel.autonomous_cycle("AI").await.unwrap();
        assert_eq!(jobs.all().len(), 2);
    }

    #[tokio::test]
    async fn sweep_without_autopilot_enqueues_scans() {
        let (sentinel, jobs, queue, niches) = sentinel_with(vec![candidate("https://yt/x", 5)]);
        niches.upsert_niche("Motivation", true).await.unwrap();
        niches.upsert_niche("Dormant", false).await.unwrap();

        sentinel.sweep().await.unwrap();

        let all = jobs.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].kind, JobKind::Discovery);
        assert_eq!(queue.len(), 1);

        let scanned = niches.active_niches().await.unwrap();
        assert!(scanned[0].last_scanned_at.is_some());
    }

    #[tokio::test]
    async fn sweep_with_autopilot_runs_cycles() {
        let (sentinel, jobs, _queue, niches) = sentinel_with(vec![candidate("https://yt/x", 5)]);
        niches.upsert_niche("Motivation", true).await.unwrap();
        niches.set_autopilot(true).await.unwrap();

        sentinel.sweep().await.unwrap();

        let all = jobs.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].kind, JobKind::Transform);
    }
}
