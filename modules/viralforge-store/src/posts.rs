use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use viralforge_common::error::{ForgeError, Result};
use viralforge_common::{Platform, PostStatus, PublishedRecord, ScheduledPost};

/// Scheduled posts plus the publish history. The `claim` CAS
/// (Pending → Publishing) guarantees at most one publisher invocation is
/// in flight per post.
#[async_trait]
pub trait ScheduledPostStore: Send + Sync {
    async fn schedule(&self, post: &ScheduledPost) -> Result<()>;
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPost>>;
    /// CAS Pending → Publishing. False when another sweep already holds it.
    async fn claim(&self, id: Uuid) -> Result<bool>;
    async fn mark(&self, id: Uuid, status: PostStatus) -> Result<()>;
    async fn add_history(&self, record: &PublishedRecord) -> Result<()>;
}

// --- Postgres ---

pub struct PgPostStore {
    pool: PgPool,
}

impl PgPostStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_post(row: &sqlx::postgres::PgRow) -> Result<ScheduledPost> {
    let db = |e: sqlx::Error| ForgeError::Database(e.to_string());
    let platform: String = row.try_get("platform").map_err(db)?;
    let status: String = row.try_get("status").map_err(db)?;
    let metadata: serde_json::Value = row.try_get("metadata").map_err(db)?;
    Ok(ScheduledPost {
        id: row.try_get("id").map_err(db)?,
        video_ref: row.try_get("video_ref").map_err(db)?,
        platform: platform.parse::<Platform>().map_err(ForgeError::Database)?,
        account_id: row.try_get("account_id").map_err(db)?,
        scheduled_for: row.try_get("scheduled_for").map_err(db)?,
        status: status.parse::<PostStatus>().map_err(ForgeError::Database)?,
        metadata: serde_json::from_value(metadata).unwrap_or_default(),
    })
}

#[async_trait]
impl ScheduledPostStore for PgPostStore {
    async fn schedule(&self, post: &ScheduledPost) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO scheduled_posts
                (id, video_ref, platform, account_id, scheduled_for, status, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(post.id)
        .bind(&post.video_ref)
        .bind(post.platform.as_str())
        .bind(post.account_id)
        .bind(post.scheduled_for)
        .bind(post.status.to_string())
        .bind(serde_json::to_value(&post.metadata).unwrap_or_default())
        .execute(&self.pool)
        .await
        .map_err(|e| ForgeError::Database(e.to_string()))?;
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPost>> {
        let rows = sqlx::query(
            r"
            SELECT * FROM scheduled_posts
            WHERE status = 'pending' AND scheduled_for <= $1
            ORDER BY scheduled_for ASC
            ",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ForgeError::Database(e.to_string()))?;
        rows.iter().map(row_to_post).collect()
    }

    async fn claim(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE scheduled_posts SET status = 'publishing' WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| ForgeError::Database(e.to_string()))?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark(&self, id: Uuid, status: PostStatus) -> Result<()> {
        sqlx::query("UPDATE scheduled_posts SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;
        Ok(())
    }

    async fn add_history(&self, record: &PublishedRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO published_history (id, title, platform, url, account_id, published_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(record.id)
        .bind(&record.title)
        .bind(record.platform.as_str())
        .bind(&record.url)
        .bind(record.account_id)
        .bind(record.published_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ForgeError::Database(e.to_string()))?;
        Ok(())
    }
}

// --- In-memory ---

#[derive(Default)]
pub struct MemoryPostStore {
    posts: Mutex<HashMap<Uuid, ScheduledPost>>,
    history: Mutex<Vec<PublishedRecord>>,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<ScheduledPost> {
        self.posts.lock().unwrap().get(&id).cloned()
    }

    pub fn history(&self) -> Vec<PublishedRecord> {
        self.history.lock().unwrap().clone()
    }

    /// Test hook used by lifecycle tests to inspect rewritten refs.
    pub fn insert_raw(&self, post: ScheduledPost) {
        self.posts.lock().unwrap().insert(post.id, post);
    }

    pub fn rewrite_video_ref(&self, from: &str, to: &str) -> usize {
        let mut count = 0;
        for post in self.posts.lock().unwrap().values_mut() {
            if post.video_ref == from {
                post.video_ref = to.to_string();
                count += 1;
            }
        }
        count
    }
}

#[async_trait]
impl ScheduledPostStore for MemoryPostStore {
    async fn schedule(&self, post: &ScheduledPost) -> Result<()> {
        self.posts
            .lock()
            .unwrap()
            .entry(post.id)
            .or_insert_with(|| post.clone());
        Ok(())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledPost>> {
        let mut due: Vec<ScheduledPost> = self
            .posts
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.status == PostStatus::Pending && p.scheduled_for <= now)
            .cloned()
            .collect();
        due.sort_by_key(|p| p.scheduled_for);
        Ok(due)
    }

    async fn claim(&self, id: Uuid) -> Result<bool> {
        let mut posts = self.posts.lock().unwrap();
        match posts.get_mut(&id) {
            Some(post) if post.status == PostStatus::Pending => {
                post.status = PostStatus::Publishing;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark(&self, id: Uuid, status: PostStatus) -> Result<()> {
        if let Some(post) = self.posts.lock().unwrap().get_mut(&id) {
            post.status = status;
        }
        Ok(())
    }

    async fn add_history(&self, record: &PublishedRecord) -> Result<()> {
        self.history.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use viralforge_common::PostMetadata;

    fn post(scheduled_for: DateTime<Utc>) -> ScheduledPost {
        ScheduledPost {
            id: Uuid::new_v4(),
            video_ref: "/outputs/a.mp4".into(),
            platform: Platform::TikTok,
            account_id: None,
            scheduled_for,
            status: PostStatus::Pending,
            metadata: PostMetadata::default(),
        }
    }

    #[tokio::test]
    async fn due_returns_only_pending_past_posts() {
        let store = MemoryPostStore::new();
        let now = Utc::now();
        let past = post(now - Duration::minutes(5));
        let future = post(now + Duration::hours(1));
        store.schedule(&past).await.unwrap();
        store.schedule(&future).await.unwrap();

        let due = store.due(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, past.id);
    }

    #[tokio::test]
    async fn claim_fires_at_most_once() {
        let store = MemoryPostStore::new();
        let p = post(Utc::now());
        store.schedule(&p).await.unwrap();

        assert!(store.claim(p.id).await.unwrap());
        assert!(!store.claim(p.id).await.unwrap(), "second claim must lose");

        store.mark(p.id, PostStatus::Published).await.unwrap();
        assert!(store.due(Utc::now()).await.unwrap().is_empty());
    }
}
