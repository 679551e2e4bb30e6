use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tokio::sync::broadcast;
use uuid::Uuid;

use viralforge_common::error::{ForgeError, Result};
use viralforge_common::{Job, JobKind, JobStatus};

/// Projection pushed to observers on every transition.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub output_ref: Option<String>,
}

/// Best-effort fan-out of job transitions (web-socket notifiers,
/// dashboards). Dropped notifications never affect stored state.
#[derive(Clone)]
pub struct JobNotifier {
    tx: broadcast::Sender<JobUpdate>,
}

impl JobNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.tx.subscribe()
    }

    pub fn notify(&self, update: JobUpdate) {
        // No receivers is fine; lagging receivers drop messages.
        let _ = self.tx.send(update);
    }
}

impl Default for JobNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Single source of truth for job status. Writes are idempotent by job
/// id; progress is monotone non-decreasing until a terminal transition.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert; an existing row with the same id is left untouched.
    async fn create(&self, job: &Job) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Job>>;
    /// Transition status and progress. Illegal transitions (terminal
    /// regression) are rejected; progress below the stored value is
    /// raised to it rather than written.
    async fn update(&self, id: Uuid, status: JobStatus, progress: u8) -> Result<Job>;
    async fn set_output(&self, id: Uuid, output_ref: &str) -> Result<()>;
    async fn set_error(&self, id: Uuid, message: &str) -> Result<()>;
    /// Any job with the same input in a non-terminal status
    /// (at-most-one-job-per-source).
    async fn find_active_by_input(&self, input_ref: &str) -> Result<Option<Job>>;
    /// Compare-and-set claim: Queued → Running(stage). Returns false when
    /// the job was already claimed; this is the idempotency guard for handlers.
    async fn claim(&self, id: Uuid, stage: &str) -> Result<bool>;
}

fn apply_update(job: &mut Job, status: JobStatus, progress: u8) -> Result<()> {
    if !job.status.allows(&status) {
        return Err(ForgeError::Validation(format!(
            "illegal job transition {} -> {}",
            job.status, status
        )));
    }
    job.progress = job.progress.max(progress.min(100));
    job.status = status;
    job.updated_at = Utc::now();
    Ok(())
}

// --- Postgres ---

pub struct PgJobStore {
    pool: PgPool,
    notifier: JobNotifier,
}

impl PgJobStore {
    pub fn new(pool: PgPool, notifier: JobNotifier) -> Self {
        Self { pool, notifier }
    }
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job> {
    let db = |e: sqlx::Error| ForgeError::Database(e.to_string());
    let kind: String = row.try_get("kind").map_err(db)?;
    let status: String = row.try_get("status").map_err(db)?;
    let progress: i16 = row.try_get("progress").map_err(db)?;
    Ok(Job {
        id: row.try_get("id").map_err(db)?,
        kind: kind.parse::<JobKind>().map_err(ForgeError::Database)?,
        owner_id: row.try_get("owner_id").map_err(db)?,
        title: row.try_get("title").map_err(db)?,
        status: JobStatus::from_wire(&status).map_err(ForgeError::Database)?,
        progress: progress.clamp(0, 100) as u8,
        input_ref: row.try_get("input_ref").map_err(db)?,
        output_ref: row.try_get("output_ref").map_err(db)?,
        error: row.try_get("error").map_err(db)?,
        created_at: row.try_get("created_at").map_err(db)?,
        updated_at: row.try_get("updated_at").map_err(db)?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO jobs
                (id, kind, owner_id, title, status, progress, input_ref,
                 output_ref, error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(job.id)
        .bind(job.kind.to_string())
        .bind(job.owner_id)
        .bind(&job.title)
        .bind(job.status.as_wire())
        .bind(job.progress as i16)
        .bind(&job.input_ref)
        .bind(&job.output_ref)
        .bind(&job.error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ForgeError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn update(&self, id: Uuid, status: JobStatus, progress: u8) -> Result<Job> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;

        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?
            .ok_or_else(|| ForgeError::Validation(format!("unknown job {id}")))?;
        let mut job = row_to_job(&row)?;
        apply_update(&mut job, status, progress)?;

        sqlx::query("UPDATE jobs SET status = $2, progress = $3, updated_at = $4 WHERE id = $1")
            .bind(id)
            .bind(job.status.as_wire())
            .bind(job.progress as i16)
            .bind(job.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;
        tx.commit()
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;

        self.notifier.notify(JobUpdate {
            id,
            status: job.status.clone(),
            progress: job.progress,
            output_ref: job.output_ref.clone(),
        });
        Ok(job)
    }

    async fn set_output(&self, id: Uuid, output_ref: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET output_ref = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(output_ref)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;
        Ok(())
    }

    async fn set_error(&self, id: Uuid, message: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET error = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(message)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;
        Ok(())
    }

    async fn find_active_by_input(&self, input_ref: &str) -> Result<Option<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE input_ref = $1")
            .bind(input_ref)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;
        for row in &rows {
            let job = row_to_job(row)?;
            if !job.status.is_terminal() {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    async fn claim(&self, id: Uuid, stage: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = $2, updated_at = $3 WHERE id = $1 AND status = 'queued'",
        )
        .bind(id)
        .bind(JobStatus::Running(stage.to_string()).as_wire())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| ForgeError::Database(e.to_string()))?;
        Ok(result.rows_affected() == 1)
    }
}

// --- In-memory ---

pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    notifier: JobNotifier,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_notifier(JobNotifier::default())
    }

    pub fn with_notifier(notifier: JobNotifier) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            notifier,
        }
    }

    pub fn all(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().values().cloned().collect()
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> Result<()> {
        self.jobs
            .lock()
            .unwrap()
            .entry(job.id)
            .or_insert_with(|| job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn update(&self, id: Uuid, status: JobStatus, progress: u8) -> Result<Job> {
        let updated = {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .get_mut(&id)
                .ok_or_else(|| ForgeError::Validation(format!("unknown job {id}")))?;
            apply_update(job, status, progress)?;
            job.clone()
        };
        self.notifier.notify(JobUpdate {
            id,
            status: updated.status.clone(),
            progress: updated.progress,
            output_ref: updated.output_ref.clone(),
        });
        Ok(updated)
    }

    async fn set_output(&self, id: Uuid, output_ref: &str) -> Result<()> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            job.output_ref = Some(output_ref.to_string());
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_error(&self, id: Uuid, message: &str) -> Result<()> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            job.error = Some(message.to_string());
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find_active_by_input(&self, input_ref: &str) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .find(|j| j.input_ref == input_ref && !j.status.is_terminal())
            .cloned())
    }

    async fn claim(&self, id: Uuid, stage: &str) -> Result<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Running(stage.to_string());
                job.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }
}
