use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use viralforge_common::error::ForgeError;
use viralforge_common::JobStatus;
use viralforge_store::JobStore;

use crate::queue::{TaskEnvelope, TaskQueue};

/// A registered task handler. Handlers must be idempotent with respect
/// to their job id; the job-store claim is the guard.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn name(&self) -> &'static str;
    /// Wall-clock budget for one execution of this task.
    fn deadline(&self) -> Duration;
    async fn handle(&self, envelope: &TaskEnvelope) -> Result<(), ForgeError>;
}

/// Consumes the task queue with N concurrent workers. Any error or
/// panic escaping a handler is caught at this boundary, logged, and
/// converted into the job's terminal failure state.
pub struct WorkerRuntime {
    queue: Arc<dyn TaskQueue>,
    jobs: Arc<dyn JobStore>,
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
}

impl WorkerRuntime {
    pub fn new(queue: Arc<dyn TaskQueue>, jobs: Arc<dyn JobStore>) -> Self {
        Self {
            queue,
            jobs,
            handlers: HashMap::new(),
        }
    }

    pub fn register(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(handler.name(), handler);
        self
    }

    /// Run consumer loops until the shutdown token flips.
    pub async fn run(self: Arc<Self>, concurrency: usize, shutdown: ShutdownToken) {
        let mut workers = Vec::new();
        for worker_id in 0..concurrency.max(1) {
            let runtime = self.clone();
            let shutdown = shutdown.clone();
            workers.push(tokio::spawn(async move {
                info!(worker_id, "Worker loop started");
                loop {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    match runtime.queue.reserve(Duration::from_secs(2)).await {
                        Ok(Some(envelope)) => runtime.dispatch(envelope).await,
                        Ok(None) => {}
                        Err(e) => {
                            warn!(worker_id, error = %e, "Queue reserve failed, backing off");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
                info!(worker_id, "Worker loop stopped");
            }));
        }
        for worker in workers {
            let _ = worker.await;
        }
    }

    /// Execute one envelope: deadline-bounded, panic-isolated.
    pub async fn dispatch(&self, envelope: TaskEnvelope) {
        let name = envelope.kind.name();
        let Some(handler) = self.handlers.get(name).cloned() else {
            warn!(task = name, "No handler registered, dropping task");
            return;
        };

        let deadline = handler.deadline();
        let job_id = envelope.job_id;
        let mut run = {
            let envelope = envelope.clone();
            tokio::spawn(async move { handler.handle(&envelope).await })
        };

        let outcome = match tokio::time::timeout(deadline, &mut run).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err((e.kind(), e.to_string())),
            // The handler task panicked; contain it at this boundary.
            Ok(Err(join_error)) => {
                error!(task = name, error = %join_error, "Handler panicked");
                Err((
                    viralforge_common::FailureKind::Fatal,
                    "internal worker failure".to_string(),
                ))
            }
            Err(_) => {
                warn!(task = name, ?deadline, "Task deadline exceeded, cancelling");
                run.abort();
                Err((
                    viralforge_common::FailureKind::Cancelled,
                    format!("deadline {deadline:?} exceeded"),
                ))
            }
        };

        if let Err((kind, message)) = outcome {
            if let Some(job_id) = job_id {
                if let Err(e) = self.jobs.set_error(job_id, &message).await {
                    warn!(%job_id, error = %e, "Failed to record job error");
                }
                match self.jobs.update(job_id, JobStatus::Failed(kind), 0).await {
                    Ok(_) => {}
                    Err(e) => warn!(%job_id, error = %e, "Failed to mark job failed"),
                }
            }
            error!(task = name, ?kind, message, "Task failed");
        }
    }
}

/// Cooperative shutdown flag shared by worker loops and the scheduler.
#[derive(Clone, Default)]
pub struct ShutdownToken {
    cancelled: Arc<std::sync::atomic::AtomicBool>,
    notify: Arc<tokio::sync::Notify>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.notify.notified().await;
        }
    }
}
