use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::info;

use viralforge_common::error::{ForgeError, Result};
use viralforge_common::{Platform, SocialToken, TokenPayload};

/// Durable credential store. One row per (platform, account). All
/// expirations are absolute UTC.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Fetch the token for an account, or the platform's first account
    /// when no account is given.
    async fn get(&self, platform: Platform, account_id: Option<i64>)
        -> Result<Option<SocialToken>>;
    /// Write a fresh grant. `expires_at := now + expires_in`.
    async fn store(&self, platform: Platform, payload: &TokenPayload) -> Result<SocialToken>;
    async fn is_expired(&self, platform: Platform, account_id: Option<i64>) -> Result<bool>;
    /// Compare-and-set rotation of the access token. When the stored
    /// access token no longer matches `expected_access`, the stored row
    /// wins and is returned unchanged (another refresher got there first).
    async fn rotate_access(
        &self,
        platform: Platform,
        account_id: Option<i64>,
        expected_access: &str,
        payload: &TokenPayload,
    ) -> Result<SocialToken>;
}

fn token_from_payload(platform: Platform, payload: &TokenPayload, owner_id: i64) -> SocialToken {
    SocialToken {
        platform,
        account_handle: payload.open_id.clone().unwrap_or_default(),
        access_token: payload.access_token.clone(),
        refresh_token: payload.refresh_token.clone(),
        token_type: payload.token_type.clone(),
        scope: payload.scope.clone(),
        expires_at: payload
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs)),
        owner_id,
    }
}

/// Refreshes a grant against the platform's OAuth endpoint. One
/// implementation per platform, registered with the `TokenManager`.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, token: &SocialToken) -> anyhow::Result<TokenPayload>;
}

/// Serializes refreshes per (platform, account) so a burst of publishers
/// hitting an expired token produces exactly one upstream refresh call.
pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    refreshers: HashMap<Platform, Arc<dyn TokenRefresher>>,
    locks: Mutex<HashMap<(Platform, i64), Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self {
            store,
            refreshers: HashMap::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_refresher(
        mut self,
        platform: Platform,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        self.refreshers.insert(platform, refresher);
        self
    }

    fn lock_for(&self, platform: Platform, account_id: Option<i64>) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry((platform, account_id.unwrap_or(0)))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Return a token guaranteed usable for an outbound call: refreshed
    /// when inside the 60 s expiry window. A failed refresh is an Auth
    /// error; callers must not retry through it.
    pub async fn fresh_token(
        &self,
        platform: Platform,
        account_id: Option<i64>,
    ) -> Result<SocialToken> {
        let token = self
            .store
            .get(platform, account_id)
            .await?
            .ok_or_else(|| ForgeError::Auth(format!("no {platform} account connected")))?;

        if !token.needs_refresh(Utc::now()) {
            return Ok(token);
        }

        let lock = self.lock_for(platform, account_id);
        let _guard = lock.lock().await;

        // Re-read under the lock: a concurrent caller may have refreshed.
        let token = self
            .store
            .get(platform, account_id)
            .await?
            .ok_or_else(|| ForgeError::Auth(format!("no {platform} account connected")))?;
        if !token.needs_refresh(Utc::now()) {
            return Ok(token);
        }

        let refresher = self
            .refreshers
            .get(&platform)
            .ok_or_else(|| ForgeError::Auth(format!("no refresher for {platform}")))?;

        let payload = refresher
            .refresh(&token)
            .await
            .map_err(|e| ForgeError::Auth(format!("{platform} token refresh failed: {e}")))?;

        let rotated = self
            .store
            .rotate_access(platform, account_id, &token.access_token, &payload)
            .await?;
        info!(platform = %platform, "Access token refreshed");
        Ok(rotated)
    }
}

// --- Postgres ---

pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_token(row: &sqlx::postgres::PgRow) -> Result<SocialToken> {
    let db = |e: sqlx::Error| ForgeError::Database(e.to_string());
    let platform: String = row.try_get("platform").map_err(db)?;
    Ok(SocialToken {
        platform: platform.parse::<Platform>().map_err(ForgeError::Database)?,
        account_handle: row.try_get("account_handle").map_err(db)?,
        access_token: row.try_get("access_token").map_err(db)?,
        refresh_token: row.try_get("refresh_token").map_err(db)?,
        token_type: row.try_get("token_type").map_err(db)?,
        scope: row.try_get("scope").map_err(db)?,
        expires_at: row.try_get("expires_at").map_err(db)?,
        owner_id: row.try_get("owner_id").map_err(db)?,
    })
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn get(
        &self,
        platform: Platform,
        account_id: Option<i64>,
    ) -> Result<Option<SocialToken>> {
        let row = match account_id {
            Some(owner) => {
                sqlx::query("SELECT * FROM social_tokens WHERE platform = $1 AND owner_id = $2")
                    .bind(platform.as_str())
                    .bind(owner)
                    .fetch_optional(&self.pool)
                    .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM social_tokens WHERE platform = $1 ORDER BY account_handle LIMIT 1",
                )
                .bind(platform.as_str())
                .fetch_optional(&self.pool)
                .await
            }
        }
        .map_err(|e| ForgeError::Database(e.to_string()))?;
        row.as_ref().map(row_to_token).transpose()
    }

    async fn store(&self, platform: Platform, payload: &TokenPayload) -> Result<SocialToken> {
        let token = token_from_payload(platform, payload, 0);
        sqlx::query(
            r"
            INSERT INTO social_tokens
                (platform, account_handle, access_token, refresh_token,
                 token_type, scope, expires_at, owner_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (platform, account_handle) DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                token_type = EXCLUDED.token_type,
                scope = EXCLUDED.scope,
                expires_at = EXCLUDED.expires_at
            ",
        )
        .bind(token.platform.as_str())
        .bind(&token.account_handle)
        .bind(&token.access_token)
        .bind(&token.refresh_token)
        .bind(&token.token_type)
        .bind(&token.scope)
        .bind(token.expires_at)
        .bind(token.owner_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ForgeError::Database(e.to_string()))?;
        Ok(token)
    }

    async fn is_expired(&self, platform: Platform, account_id: Option<i64>) -> Result<bool> {
        Ok(match self.get(platform, account_id).await? {
            Some(token) => token.is_expired(Utc::now()),
            None => true,
        })
    }

    async fn rotate_access(
        &self,
        platform: Platform,
        account_id: Option<i64>,
        expected_access: &str,
        payload: &TokenPayload,
    ) -> Result<SocialToken> {
        let current = self
            .get(platform, account_id)
            .await?
            .ok_or_else(|| ForgeError::Auth(format!("no {platform} account connected")))?;

        let new_expires = payload
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));
        // Expiry is monotone across refreshes.
        let expires_at = match (current.expires_at, new_expires) {
            (Some(old), Some(new)) => Some(old.max(new)),
            (old, new) => new.or(old),
        };

        let result = sqlx::query(
            r"
            UPDATE social_tokens SET
                access_token = $4,
                refresh_token = COALESCE($5, refresh_token),
                expires_at = $6
            WHERE platform = $1 AND account_handle = $2 AND access_token = $3
            ",
        )
        .bind(platform.as_str())
        .bind(&current.account_handle)
        .bind(expected_access)
        .bind(&payload.access_token)
        .bind(&payload.refresh_token)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ForgeError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            // Lost the CAS race: another writer already rotated.
            return self
                .get(platform, account_id)
                .await?
                .ok_or_else(|| ForgeError::Auth(format!("no {platform} account connected")));
        }
        self.get(platform, account_id)
            .await?
            .ok_or_else(|| ForgeError::Auth(format!("no {platform} account connected")))
    }
}

// --- In-memory ---

#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<(Platform, i64), SocialToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: SocialToken, account_id: i64) {
        self.tokens
            .lock()
            .unwrap()
            .insert((token.platform, account_id), token);
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(
        &self,
        platform: Platform,
        account_id: Option<i64>,
    ) -> Result<Option<SocialToken>> {
        let tokens = self.tokens.lock().unwrap();
        Ok(match account_id {
            Some(id) => tokens.get(&(platform, id)).cloned(),
            None => {
                let mut keys: Vec<_> = tokens
                    .iter()
                    .filter(|((p, _), _)| *p == platform)
                    .collect();
                keys.sort_by_key(|((_, id), _)| *id);
                keys.first().map(|(_, t)| (*t).clone())
            }
        })
    }

    async fn store(&self, platform: Platform, payload: &TokenPayload) -> Result<SocialToken> {
        let token = token_from_payload(platform, payload, 0);
        self.tokens
            .lock()
            .unwrap()
            .insert((platform, 0), token.clone());
        Ok(token)
    }

    async fn is_expired(&self, platform: Platform, account_id: Option<i64>) -> Result<bool> {
        Ok(match self.get(platform, account_id).await? {
            Some(token) => token.is_expired(Utc::now()),
            None => true,
        })
    }

    async fn rotate_access(
        &self,
        platform: Platform,
        account_id: Option<i64>,
        expected_access: &str,
        payload: &TokenPayload,
    ) -> Result<SocialToken> {
        let mut tokens = self.tokens.lock().unwrap();
        let key = (platform, account_id.unwrap_or(0));
        let token = tokens
            .get_mut(&key)
            .ok_or_else(|| ForgeError::Auth(format!("no {platform} account connected")))?;
        if token.access_token != expected_access {
            return Ok(token.clone());
        }
        token.access_token = payload.access_token.clone();
        if payload.refresh_token.is_some() {
            token.refresh_token = payload.refresh_token.clone();
        }
        let new_expires = payload
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));
        token.expires_at = match (token.expires_at, new_expires) {
            (Some(old), Some(new)) => Some(old.max(new)),
            (old, new) => new.or(old),
        };
        Ok(token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn payload(access: &str, expires_in: i64) -> TokenPayload {
        TokenPayload {
            access_token: access.to_string(),
            refresh_token: Some("refresh-1".to_string()),
            token_type: Some("bearer".to_string()),
            scope: Some("video.publish".to_string()),
            expires_in: Some(expires_in),
            open_id: Some("creator".to_string()),
        }
    }

    #[tokio::test]
    async fn store_then_get_preserves_fields() {
        let store = MemoryTokenStore::new();
        store
            .store(Platform::TikTok, &payload("access-1", 3600))
            .await
            .unwrap();

        let token = store.get(Platform::TikTok, None).await.unwrap().unwrap();
        assert_eq!(token.access_token, "access-1");
        assert_eq!(token.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(token.scope.as_deref(), Some("video.publish"));
        assert_eq!(token.account_handle, "creator");
        assert!(!token.is_expired(Utc::now()));
    }

    #[tokio::test]
    async fn missing_token_counts_as_expired() {
        let store = MemoryTokenStore::new();
        assert!(store.is_expired(Platform::YouTube, None).await.unwrap());
    }

    #[tokio::test]
    async fn expiry_is_monotone_across_refreshes() {
        let store = MemoryTokenStore::new();
        let first = store
            .store(Platform::TikTok, &payload("access-1", 7200))
            .await
            .unwrap();

        // A refresh with a shorter expiry must not move expires_at backwards.
        let rotated = store
            .rotate_access(Platform::TikTok, None, "access-1", &payload("access-2", 60))
            .await
            .unwrap();
        assert_eq!(rotated.access_token, "access-2");
        assert!(rotated.expires_at.unwrap() >= first.expires_at.unwrap());
    }

    #[tokio::test]
    async fn rotate_cas_lets_first_writer_win() {
        let store = MemoryTokenStore::new();
        store
            .store(Platform::TikTok, &payload("access-1", 3600))
            .await
            .unwrap();

        store
            .rotate_access(Platform::TikTok, None, "access-1", &payload("access-2", 3600))
            .await
            .unwrap();
        // Stale expectation: the stored row wins unchanged.
        let result = store
            .rotate_access(Platform::TikTok, None, "access-1", &payload("access-3", 3600))
            .await
            .unwrap();
        assert_eq!(result.access_token, "access-2");
    }

    struct CountingRefresher(AtomicUsize);

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, _token: &SocialToken) -> anyhow::Result<TokenPayload> {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(payload("refreshed-access", 3600))
        }
    }

    #[tokio::test]
    async fn concurrent_fresh_token_refreshes_once() {
        let store = Arc::new(MemoryTokenStore::new());
        store
            .store(Platform::TikTok, &payload("stale", -10))
            .await
            .unwrap();

        let refresher = Arc::new(CountingRefresher(AtomicUsize::new(0)));
        let manager = Arc::new(
            TokenManager::new(store).with_refresher(Platform::TikTok, refresher.clone()),
        );

        let a = tokio::spawn({
            let m = manager.clone();
            async move { m.fresh_token(Platform::TikTok, None).await }
        });
        let b = tokio::spawn({
            let m = manager.clone();
            async move { m.fresh_token(Platform::TikTok, None).await }
        });

        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        assert_eq!(a.access_token, "refreshed-access");
        assert_eq!(b.access_token, "refreshed-access");
        assert_eq!(
            refresher.0.load(Ordering::SeqCst),
            1,
            "burst collapses to one upstream refresh"
        );
    }

    #[tokio::test]
    async fn refresh_failure_is_auth_error() {
        struct FailingRefresher;
        #[async_trait]
        impl TokenRefresher for FailingRefresher {
            async fn refresh(&self, _token: &SocialToken) -> anyhow::Result<TokenPayload> {
                anyhow::bail!("invalid_grant")
            }
        }

        let store = Arc::new(MemoryTokenStore::new());
        store
            .store(Platform::TikTok, &payload("stale", -10))
            .await
            .unwrap();
        let manager =
            TokenManager::new(store).with_refresher(Platform::TikTok, Arc::new(FailingRefresher));

        let err = manager.fresh_token(Platform::TikTok, None).await.unwrap_err();
        assert_eq!(err.kind(), viralforge_common::FailureKind::Auth);
    }
}
