use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::runtime::ShutdownToken;

/// A periodic task body.
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

/// Logical name + period + body. Names match the broker task names of
/// the deployment (`discovery.sentinel_watcher`, etc.).
pub struct PeriodicTask {
    pub name: &'static str,
    pub period: Duration,
    pub job: Arc<dyn PeriodicJob>,
    /// Single-flight guard: a tick that finds the previous run still in
    /// flight is collapsed, not queued.
    in_flight: Arc<tokio::sync::Mutex<()>>,
}

impl PeriodicTask {
    pub fn new(name: &'static str, period: Duration, job: Arc<dyn PeriodicJob>) -> Self {
        Self {
            name,
            period,
            job,
            in_flight: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// One tick: runs the body unless a previous tick still holds the
    /// guard. Returns whether the body actually ran.
    pub async fn fire(&self) -> bool {
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!(task = self.name, "Previous run still in flight, collapsing tick");
            return false;
        };
        if let Err(e) = self.job.run().await {
            warn!(task = self.name, error = %e, "Periodic task failed");
        }
        true
    }
}

/// Spawns one interval loop per task. Missed ticks are skipped, never
/// back-filled; the next tick catches up.
pub struct Scheduler {
    tasks: Vec<Arc<PeriodicTask>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn register(mut self, task: PeriodicTask) -> Self {
        self.tasks.push(Arc::new(task));
        self
    }

    pub fn spawn_all(&self, shutdown: ShutdownToken) -> Vec<tokio::task::JoinHandle<()>> {
        self.tasks
            .iter()
            .map(|task| {
                let task = task.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    info!(task = task.name, period = ?task.period, "Periodic task scheduled");
                    let mut interval = tokio::time::interval(task.period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    // Consume the immediate first tick; periodic work
                    // starts one period in.
                    interval.tick().await;
                    loop {
                        tokio::select! {
                            _ = interval.tick() => {
                                task.fire().await;
                            }
                            _ = shutdown.cancelled() => {
                                info!(task = task.name, "Periodic task stopped");
                                break;
                            }
                        }
                    }
                })
            })
            .collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        runs: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl PeriodicJob for CountingJob {
        async fn run(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_ticks_collapse_to_one_run() {
        let job = Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
        });
        let task = Arc::new(PeriodicTask::new(
            "test.tick",
            Duration::from_secs(60),
            job.clone(),
        ));

        let fires: Vec<_> = (0..4)
            .map(|_| {
                let task = task.clone();
                tokio::spawn(async move { task.fire().await })
            })
            .collect();

        let mut ran = 0;
        for fire in fires {
            if fire.await.unwrap() {
                ran += 1;
            }
        }
        assert_eq!(ran, 1, "single in-flight run per task");
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequential_ticks_all_run() {
        let job = Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
            delay: Duration::from_millis(1),
        });
        let task = PeriodicTask::new("test.tick", Duration::from_secs(60), job.clone());
        assert!(task.fire().await);
        assert!(task.fire().await);
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_job_does_not_poison_the_guard() {
        struct FailingJob;
        #[async_trait]
        impl PeriodicJob for FailingJob {
            async fn run(&self) -> anyhow::Result<()> {
                anyhow::bail!("sweep failed")
            }
        }
        let task = PeriodicTask::new("test.fail", Duration::from_secs(60), Arc::new(FailingJob));
        assert!(task.fire().await);
        assert!(task.fire().await, "guard released after failure");
    }
}
