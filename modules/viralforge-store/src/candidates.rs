use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use viralforge_common::error::{ForgeError, Result};
use viralforge_common::{ContentCandidate, Platform, ViralPattern};

/// Durable store of discovered candidates. Upsert is last-write-wins on
/// the mutable fields (`views`, `engagement_score`, `viral_score`) and
/// create-only on everything else.
#[async_trait]
pub trait CandidateStore: Send + Sync {
    async fn upsert(&self, candidate: &ContentCandidate, niche: &str) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<ContentCandidate>>;
    /// Substring search over title|description|niche, views desc.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ContentCandidate>>;
    async fn list_by_niche(&self, niche: &str) -> Result<Vec<ContentCandidate>>;
    /// Last-write-wins; at most one pattern per candidate.
    async fn put_pattern(&self, pattern: &ViralPattern) -> Result<()>;
    async fn get_pattern(&self, content_id: &str) -> Result<Option<ViralPattern>>;
}

// --- Postgres ---

pub struct PgCandidateStore {
    pool: PgPool,
}

impl PgCandidateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_candidate(row: &sqlx::postgres::PgRow) -> Result<ContentCandidate> {
    let platform: String = row
        .try_get("platform")
        .map_err(|e| ForgeError::Database(e.to_string()))?;
    let views: i64 = row
        .try_get("views")
        .map_err(|e| ForgeError::Database(e.to_string()))?;
    let tags: serde_json::Value = row
        .try_get("tags")
        .map_err(|e| ForgeError::Database(e.to_string()))?;
    let metadata: serde_json::Value = row
        .try_get("metadata")
        .map_err(|e| ForgeError::Database(e.to_string()))?;
    let get_str = |name: &str| -> Result<String> {
        row.try_get(name)
            .map_err(|e| ForgeError::Database(e.to_string()))
    };

    let mut candidate = ContentCandidate {
        id: get_str("id")?,
        platform: platform
            .parse::<Platform>()
            .map_err(ForgeError::Database)?,
        url: get_str("url")?,
        author: get_str("author")?,
        title: get_str("title")?,
        description: get_str("description")?,
        thumbnail_url: row
            .try_get("thumbnail_url")
            .map_err(|e| ForgeError::Database(e.to_string()))?,
        views: views.max(0) as u64,
        engagement_score: row
            .try_get("engagement_score")
            .map_err(|e| ForgeError::Database(e.to_string()))?,
        viral_score: row
            .try_get("viral_score")
            .map_err(|e| ForgeError::Database(e.to_string()))?,
        duration_seconds: row
            .try_get("duration_seconds")
            .map_err(|e| ForgeError::Database(e.to_string()))?,
        discovered_at: row
            .try_get("discovered_at")
            .map_err(|e| ForgeError::Database(e.to_string()))?,
        tags: serde_json::from_value(tags).unwrap_or_default(),
        niche: get_str("niche")?,
        metadata: serde_json::from_value(metadata).unwrap_or_default(),
    };
    candidate.clamp_scores();
    Ok(candidate)
}

#[async_trait]
impl CandidateStore for PgCandidateStore {
    async fn upsert(&self, candidate: &ContentCandidate, niche: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO content_candidates
                (id, platform, url, author, title, description, thumbnail_url,
                 views, engagement_score, viral_score, duration_seconds,
                 discovered_at, tags, niche, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                views = EXCLUDED.views,
                engagement_score = EXCLUDED.engagement_score,
                viral_score = EXCLUDED.viral_score
            ",
        )
        .bind(&candidate.id)
        .bind(candidate.platform.as_str())
        .bind(&candidate.url)
        .bind(&candidate.author)
        .bind(&candidate.title)
        .bind(&candidate.description)
        .bind(&candidate.thumbnail_url)
        .bind(candidate.views as i64)
        .bind(candidate.engagement_score.clamp(0.0, 1.0))
        .bind(candidate.viral_score.clamp(0.0, 100.0))
        .bind(candidate.duration_seconds)
        .bind(candidate.discovered_at)
        .bind(serde_json::to_value(&candidate.tags).unwrap_or_default())
        .bind(niche)
        .bind(serde_json::Value::Object(candidate.metadata.clone()))
        .execute(&self.pool)
        .await
        .map_err(|e| ForgeError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ContentCandidate>> {
        let row = sqlx::query("SELECT * FROM content_candidates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;
        row.as_ref().map(row_to_candidate).transpose()
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ContentCandidate>> {
        let pattern = format!("%{query}%");
        let rows = sqlx::query(
            r"
            SELECT * FROM content_candidates
            WHERE title ILIKE $1 OR description ILIKE $1 OR niche ILIKE $1
            ORDER BY views DESC
            LIMIT $2
            ",
        )
        .bind(&pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ForgeError::Database(e.to_string()))?;
        rows.iter().map(row_to_candidate).collect()
    }

    async fn list_by_niche(&self, niche: &str) -> Result<Vec<ContentCandidate>> {
        let rows = sqlx::query(
            "SELECT * FROM content_candidates WHERE niche = $1 ORDER BY views DESC",
        )
        .bind(niche)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ForgeError::Database(e.to_string()))?;
        rows.iter().map(row_to_candidate).collect()
    }

    async fn put_pattern(&self, pattern: &ViralPattern) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO viral_patterns
                (content_id, id, hook_score, retention_estimate, pacing_bpm,
                 style_keywords, emotional_triggers, analyzed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (content_id) DO UPDATE SET
                id = EXCLUDED.id,
                hook_score = EXCLUDED.hook_score,
                retention_estimate = EXCLUDED.retention_estimate,
                pacing_bpm = EXCLUDED.pacing_bpm,
                style_keywords = EXCLUDED.style_keywords,
                emotional_triggers = EXCLUDED.emotional_triggers,
                analyzed_at = EXCLUDED.analyzed_at
            ",
        )
        .bind(&pattern.content_id)
        .bind(pattern.id)
        .bind(pattern.hook_score)
        .bind(pattern.retention_estimate)
        .bind(pattern.pacing_bpm)
        .bind(serde_json::to_value(&pattern.style_keywords).unwrap_or_default())
        .bind(serde_json::to_value(&pattern.emotional_triggers).unwrap_or_default())
        .bind(pattern.analyzed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ForgeError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_pattern(&self, content_id: &str) -> Result<Option<ViralPattern>> {
        let row = sqlx::query("SELECT * FROM viral_patterns WHERE content_id = $1")
            .bind(content_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;
        let Some(row) = row else { return Ok(None) };
        let style: serde_json::Value = row
            .try_get("style_keywords")
            .map_err(|e| ForgeError::Database(e.to_string()))?;
        let triggers: serde_json::Value = row
            .try_get("emotional_triggers")
            .map_err(|e| ForgeError::Database(e.to_string()))?;
        Ok(Some(ViralPattern {
            id: row
                .try_get("id")
                .map_err(|e| ForgeError::Database(e.to_string()))?,
            content_id: content_id.to_string(),
            hook_score: row
                .try_get("hook_score")
                .map_err(|e| ForgeError::Database(e.to_string()))?,
            retention_estimate: row
                .try_get("retention_estimate")
                .map_err(|e| ForgeError::Database(e.to_string()))?,
            pacing_bpm: row
                .try_get("pacing_bpm")
                .map_err(|e| ForgeError::Database(e.to_string()))?,
            style_keywords: serde_json::from_value(style).unwrap_or_default(),
            emotional_triggers: serde_json::from_value(triggers).unwrap_or_default(),
            analyzed_at: row
                .try_get("analyzed_at")
                .map_err(|e| ForgeError::Database(e.to_string()))?,
        }))
    }
}

// --- In-memory ---

#[derive(Default)]
pub struct MemoryCandidateStore {
    candidates: Mutex<HashMap<String, ContentCandidate>>,
    patterns: Mutex<HashMap<String, ViralPattern>>,
}

impl MemoryCandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.candidates.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CandidateStore for MemoryCandidateStore {
    async fn upsert(&self, candidate: &ContentCandidate, niche: &str) -> Result<()> {
        let mut map = self.candidates.lock().unwrap();
        match map.get_mut(&candidate.id) {
            Some(existing) => existing.absorb_rescan(candidate),
            None => {
                let mut fresh = candidate.clone();
                fresh.niche = niche.to_string();
                fresh.clamp_scores();
                map.insert(fresh.id.clone(), fresh);
            }
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ContentCandidate>> {
        Ok(self.candidates.lock().unwrap().get(id).cloned())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ContentCandidate>> {
        let needle = query.to_lowercase();
        let mut hits: Vec<ContentCandidate> = self
            .candidates
            .lock()
            .unwrap()
            .values()
            .filter(|c| {
                c.title.to_lowercase().contains(&needle)
                    || c.description.to_lowercase().contains(&needle)
                    || c.niche.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.views.cmp(&a.views));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn list_by_niche(&self, niche: &str) -> Result<Vec<ContentCandidate>> {
        let mut hits: Vec<ContentCandidate> = self
            .candidates
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.niche == niche)
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.views.cmp(&a.views));
        Ok(hits)
    }

    async fn put_pattern(&self, pattern: &ViralPattern) -> Result<()> {
        self.patterns
            .lock()
            .unwrap()
            .insert(pattern.content_id.clone(), pattern.clone());
        Ok(())
    }

    async fn get_pattern(&self, content_id: &str) -> Result<Option<ViralPattern>> {
        Ok(self.patterns.lock().unwrap().get(content_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn candidate(id: &str, views: u64) -> ContentCandidate {
        ContentCandidate::new(id, Platform::YouTube, format!("https://yt/{id}"))
            .with_title(format!("video {id}"))
            .with_views(views)
    }

    #[tokio::test]
    async fn upsert_is_create_only_on_immutable_fields() {
        let store = MemoryCandidateStore::new();
        store.upsert(&candidate("yt_1", 10), "AI").await.unwrap();

        let mut rescan = candidate("yt_1", 999);
        rescan.title = "hijacked title".into();
        rescan.engagement_score = 0.9;
        store.upsert(&rescan, "Other").await.unwrap();

        let stored = store.get("yt_1").await.unwrap().unwrap();
        assert_eq!(stored.views, 999, "mutable field updated");
        assert_eq!(stored.engagement_score, 0.9);
        assert_eq!(stored.title, "video yt_1", "immutable field preserved");
        assert_eq!(stored.niche, "AI", "first-tagged niche preserved");
    }

    #[tokio::test]
    async fn search_matches_title_description_niche() {
        let store = MemoryCandidateStore::new();
        let mut a = candidate("yt_a", 50);
        a.description = "deep gratitude practice".into();
        store.upsert(&a, "Motivation").await.unwrap();
        store.upsert(&candidate("yt_b", 100), "Gratitude").await.unwrap();

        let hits = store.search("gratitude", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "yt_b", "ordered by views desc");
    }

    #[tokio::test]
    async fn pattern_is_last_write_wins() {
        let store = MemoryCandidateStore::new();
        store.upsert(&candidate("yt_1", 1), "AI").await.unwrap();
        let mk = |hook| ViralPattern {
            id: Uuid::new_v4(),
            content_id: "yt_1".into(),
            hook_score: hook,
            retention_estimate: 0.5,
            pacing_bpm: None,
            style_keywords: vec![],
            emotional_triggers: vec![],
            analyzed_at: Utc::now(),
        };
        store.put_pattern(&mk(0.2)).await.unwrap();
        store.put_pattern(&mk(0.8)).await.unwrap();
        let stored = store.get_pattern("yt_1").await.unwrap().unwrap();
        assert_eq!(stored.hook_score, 0.8);
    }
}
