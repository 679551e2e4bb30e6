use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::jobs::{JobStore, MemoryJobStore};
use crate::posts::MemoryPostStore;
use viralforge_common::error::{ForgeError, Result};

/// Rewrites every database reference to a migrated asset (job outputs
/// and scheduled-post video refs) atomically. The storage lifecycle
/// deletes the local file only after this succeeds.
#[async_trait]
pub trait RefRewriter: Send + Sync {
    /// Returns the number of rewritten references.
    async fn rewrite_refs(&self, from: &str, to: &str) -> Result<u64>;
}

// --- Postgres: both updates share one transaction ---

pub struct PgRefRewriter {
    pool: PgPool,
}

impl PgRefRewriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefRewriter for PgRefRewriter {
    async fn rewrite_refs(&self, from: &str, to: &str) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;

        let jobs = sqlx::query("UPDATE jobs SET output_ref = $2 WHERE output_ref = $1")
            .bind(from)
            .bind(to)
            .execute(&mut *tx)
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;

        let posts = sqlx::query("UPDATE scheduled_posts SET video_ref = $2 WHERE video_ref = $1")
            .bind(from)
            .bind(to)
            .execute(&mut *tx)
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;

        Ok(jobs.rows_affected() + posts.rows_affected())
    }
}

// --- In-memory: over the memory stores ---

pub struct MemoryRefRewriter {
    jobs: Arc<MemoryJobStore>,
    posts: Arc<MemoryPostStore>,
}

impl MemoryRefRewriter {
    pub fn new(jobs: Arc<MemoryJobStore>, posts: Arc<MemoryPostStore>) -> Self {
        Self { jobs, posts }
    }
}

#[async_trait]
impl RefRewriter for MemoryRefRewriter {
    async fn rewrite_refs(&self, from: &str, to: &str) -> Result<u64> {
        let mut count = 0u64;
        for job in self.jobs.all() {
            if job.output_ref.as_deref() == Some(from) {
                self.jobs.set_output(job.id, to).await?;
                count += 1;
            }
        }
        count += self.posts.rewrite_video_ref(from, to) as u64;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use viralforge_common::{Job, JobKind, Platform, PostMetadata, PostStatus, ScheduledPost};

    #[tokio::test]
    async fn rewrites_jobs_and_posts_together() {
        let jobs = Arc::new(MemoryJobStore::new());
        let posts = Arc::new(MemoryPostStore::new());

        let mut job = Job::new(JobKind::Transform, 1, "https://src/1");
        job.output_ref = Some("/outputs/a.mp4".to_string());
        jobs.create(&job).await.unwrap();

        posts.insert_raw(ScheduledPost {
            id: Uuid::new_v4(),
            video_ref: "/outputs/a.mp4".into(),
            platform: Platform::TikTok,
            account_id: None,
            scheduled_for: Utc::now(),
            status: PostStatus::Pending,
            metadata: PostMetadata::default(),
        });

        let rewriter = MemoryRefRewriter::new(jobs.clone(), posts.clone());
        let count = rewriter.rewrite_refs("/outputs/a.mp4", "a.mp4").await.unwrap();
        assert_eq!(count, 2);

        assert_eq!(
            jobs.get(job.id).await.unwrap().unwrap().output_ref.as_deref(),
            Some("a.mp4")
        );
    }
}
