use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use viralforge_common::error::{ForgeError, Result};
use viralforge_common::{MonitoredNiche, NicheTrend, Platform};

/// Monitored niches plus the few process-wide toggles the sentinel reads
/// (autopilot).
#[async_trait]
pub trait NicheStore: Send + Sync {
    async fn active_niches(&self) -> Result<Vec<MonitoredNiche>>;
    async fn upsert_niche(&self, niche: &str, is_active: bool) -> Result<()>;
    async fn touch_scanned(&self, niche: &str, at: DateTime<Utc>) -> Result<()>;
    async fn upsert_trend(&self, trend: &NicheTrend) -> Result<()>;
    async fn get_trend(&self, niche: &str) -> Result<Option<NicheTrend>>;
    async fn autopilot_enabled(&self) -> Result<bool>;
    async fn set_autopilot(&self, enabled: bool) -> Result<()>;
}

// --- Postgres ---

pub struct PgNicheStore {
    pool: PgPool,
}

impl PgNicheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NicheStore for PgNicheStore {
    async fn active_niches(&self) -> Result<Vec<MonitoredNiche>> {
        let rows = sqlx::query(
            "SELECT niche, is_active, last_scanned_at FROM monitored_niches WHERE is_active",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ForgeError::Database(e.to_string()))?;
        rows.iter()
            .map(|row| {
                let db = |e: sqlx::Error| ForgeError::Database(e.to_string());
                Ok(MonitoredNiche {
                    niche: row.try_get("niche").map_err(db)?,
                    is_active: row.try_get("is_active").map_err(db)?,
                    last_scanned_at: row.try_get("last_scanned_at").map_err(db)?,
                })
            })
            .collect()
    }

    async fn upsert_niche(&self, niche: &str, is_active: bool) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO monitored_niches (niche, is_active)
            VALUES ($1, $2)
            ON CONFLICT (niche) DO UPDATE SET is_active = EXCLUDED.is_active
            ",
        )
        .bind(niche)
        .bind(is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| ForgeError::Database(e.to_string()))?;
        Ok(())
    }

    async fn touch_scanned(&self, niche: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE monitored_niches SET last_scanned_at = $2 WHERE niche = $1")
            .bind(niche)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;
        Ok(())
    }

    async fn upsert_trend(&self, trend: &NicheTrend) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO niche_trends (niche, platform, top_keywords, avg_engagement, last_updated)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (niche) DO UPDATE SET
                platform = EXCLUDED.platform,
                top_keywords = EXCLUDED.top_keywords,
                avg_engagement = EXCLUDED.avg_engagement,
                last_updated = EXCLUDED.last_updated
            ",
        )
        .bind(&trend.niche)
        .bind(trend.platform.as_str())
        .bind(serde_json::to_value(&trend.top_keywords).unwrap_or_default())
        .bind(trend.avg_engagement)
        .bind(trend.last_updated)
        .execute(&self.pool)
        .await
        .map_err(|e| ForgeError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_trend(&self, niche: &str) -> Result<Option<NicheTrend>> {
        let row = sqlx::query("SELECT * FROM niche_trends WHERE niche = $1")
            .bind(niche)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;
        let Some(row) = row else { return Ok(None) };
        let db = |e: sqlx::Error| ForgeError::Database(e.to_string());
        let platform: String = row.try_get("platform").map_err(db)?;
        let keywords: serde_json::Value = row.try_get("top_keywords").map_err(db)?;
        Ok(Some(NicheTrend {
            niche: niche.to_string(),
            platform: platform.parse::<Platform>().map_err(ForgeError::Database)?,
            top_keywords: serde_json::from_value(keywords).unwrap_or_default(),
            avg_engagement: row.try_get("avg_engagement").map_err(db)?,
            last_updated: row.try_get("last_updated").map_err(db)?,
        }))
    }

    async fn autopilot_enabled(&self) -> Result<bool> {
        let row = sqlx::query("SELECT value FROM system_settings WHERE key = 'auto_pilot'")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ForgeError::Database(e.to_string()))?;
        Ok(row
            .map(|r| {
                r.try_get::<String, _>("value")
                    .map(|v| v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false)
            })
            .unwrap_or(false))
    }

    async fn set_autopilot(&self, enabled: bool) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO system_settings (key, value) VALUES ('auto_pilot', $1)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value
            ",
        )
        .bind(enabled.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| ForgeError::Database(e.to_string()))?;
        Ok(())
    }
}

// --- In-memory ---

#[derive(Default)]
pub struct MemoryNicheStore {
    niches: Mutex<HashMap<String, MonitoredNiche>>,
    trends: Mutex<HashMap<String, NicheTrend>>,
    autopilot: Mutex<bool>,
}

impl MemoryNicheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NicheStore for MemoryNicheStore {
    async fn active_niches(&self) -> Result<Vec<MonitoredNiche>> {
        let mut niches: Vec<MonitoredNiche> = self
            .niches
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.is_active)
            .cloned()
            .collect();
        niches.sort_by(|a, b| a.niche.cmp(&b.niche));
        Ok(niches)
    }

    async fn upsert_niche(&self, niche: &str, is_active: bool) -> Result<()> {
        let mut niches = self.niches.lock().unwrap();
        let entry = niches
            .entry(niche.to_string())
            .or_insert_with(|| MonitoredNiche {
                niche: niche.to_string(),
                is_active,
                last_scanned_at: None,
            });
        entry.is_active = is_active;
        Ok(())
    }

    async fn touch_scanned(&self, niche: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(entry) = self.niches.lock().unwrap().get_mut(niche) {
            entry.last_scanned_at = Some(at);
        }
        Ok(())
    }

    async fn upsert_trend(&self, trend: &NicheTrend) -> Result<()> {
        self.trends
            .lock()
            .unwrap()
            .insert(trend.niche.clone(), trend.clone());
        Ok(())
    }

    async fn get_trend(&self, niche: &str) -> Result<Option<NicheTrend>> {
        Ok(self.trends.lock().unwrap().get(niche).cloned())
    }

    async fn autopilot_enabled(&self) -> Result<bool> {
        Ok(*self.autopilot.lock().unwrap())
    }

    async fn set_autopilot(&self, enabled: bool) -> Result<()> {
        *self.autopilot.lock().unwrap() = enabled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_active_niches_are_swept() {
        let store = MemoryNicheStore::new();
        store.upsert_niche("Motivation", true).await.unwrap();
        store.upsert_niche("Cooking", false).await.unwrap();

        let active = store.active_niches().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].niche, "Motivation");
    }

    #[tokio::test]
    async fn touch_scanned_records_time() {
        let store = MemoryNicheStore::new();
        store.upsert_niche("AI", true).await.unwrap();
        let now = Utc::now();
        store.touch_scanned("AI", now).await.unwrap();
        assert_eq!(
            store.active_niches().await.unwrap()[0].last_scanned_at,
            Some(now)
        );
    }

    #[tokio::test]
    async fn autopilot_defaults_off() {
        let store = MemoryNicheStore::new();
        assert!(!store.autopilot_enabled().await.unwrap());
        store.set_autopilot(true).await.unwrap();
        assert!(store.autopilot_enabled().await.unwrap());
    }
}
