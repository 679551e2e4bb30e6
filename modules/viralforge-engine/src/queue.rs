use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use viralforge_common::error::{ForgeError, Result};
use viralforge_common::Platform;

const QUEUE_KEY: &str = "forge:tasks";

/// Work dispatched through the broker. Payloads carry references, never
/// media bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskKind {
    /// `video.download_and_process`
    DownloadAndProcess {
        source_url: String,
        niche: String,
        platform: Platform,
    },
    /// `discovery.scan_trends`
    ScanTrends { niche: String },
    /// Autopilot publish chained onto a completed transform.
    PublishOutput {
        video_ref: String,
        platform: Platform,
        title: String,
    },
}

impl TaskKind {
    /// Logical task name used for handler dispatch.
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::DownloadAndProcess { .. } => "video.download_and_process",
            TaskKind::ScanTrends { .. } => "discovery.scan_trends",
            TaskKind::PublishOutput { .. } => "optimization.publish_output",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: Uuid,
    /// Job row this task reports into, when one exists.
    pub job_id: Option<Uuid>,
    pub kind: TaskKind,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(kind: TaskKind, job_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            kind,
            enqueued_at: Utc::now(),
        }
    }
}

/// Broker-backed task queue: at-least-once delivery, no automatic
/// redelivery. Handlers are idempotent via job-store claims.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, envelope: &TaskEnvelope) -> Result<()>;
    /// Block up to `timeout` for the next task.
    async fn reserve(&self, timeout: Duration) -> Result<Option<TaskEnvelope>>;
}

// --- Redis list broker ---

pub struct RedisQueue {
    conn: ConnectionManager,
}

impl RedisQueue {
    pub async fn connect(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).map_err(|e| ForgeError::Cache(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| ForgeError::Cache(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl TaskQueue for RedisQueue {
    async fn enqueue(&self, envelope: &TaskEnvelope) -> Result<()> {
        let payload =
            serde_json::to_string(envelope).map_err(|e| ForgeError::Protocol(e.to_string()))?;
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(QUEUE_KEY, payload)
            .await
            .map_err(|e| ForgeError::Cache(e.to_string()))
    }

    async fn reserve(&self, timeout: Duration) -> Result<Option<TaskEnvelope>> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = conn
            .brpop(QUEUE_KEY, timeout.as_secs_f64())
            .await
            .map_err(|e| ForgeError::Cache(e.to_string()))?;
        match popped {
            Some((_, payload)) => {
                let envelope = serde_json::from_str(&payload)
                    .map_err(|e| ForgeError::Protocol(format!("bad task payload: {e}")))?;
                Ok(Some(envelope))
            }
            None => Ok(None),
        }
    }
}

// --- In-memory queue (tests, single-process mode) ---

#[derive(Default)]
pub struct MemoryQueue {
    tasks: Mutex<VecDeque<TaskEnvelope>>,
    notify: tokio::sync::Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, envelope: &TaskEnvelope) -> Result<()> {
        self.tasks.lock().unwrap().push_back(envelope.clone());
        self.notify.notify_one();
        Ok(())
    }

    async fn reserve(&self, timeout: Duration) -> Result<Option<TaskEnvelope>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(envelope) = self.tasks.lock().unwrap().pop_front() {
                return Ok(Some(envelope));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }
}
