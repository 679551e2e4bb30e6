use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use viralforge_common::error::{ForgeError, Result};

/// Shared, TTL-bounded key-value cache. Eventually consistent; callers
/// must tolerate stale or missing entries.
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
    /// Left-push onto a list and trim it to the most recent `keep` entries.
    async fn lpush_trim(&self, key: &str, value: &str, keep: usize) -> Result<()>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;
}

// --- Redis ---

pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
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
impl KvCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| ForgeError::Cache(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| ForgeError::Cache(e.to_string()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs)
            .await
            .map_err(|e| ForgeError::Cache(e.to_string()))
    }

    async fn lpush_trim(&self, key: &str, value: &str, keep: usize) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .lpush(key, value)
            .ltrim(key, 0, keep as isize - 1)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| ForgeError::Cache(e.to_string()))
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.lrange(key, start, stop)
            .await
            .map_err(|e| ForgeError::Cache(e.to_string()))
    }
}

// --- In-memory (tests, single-process deployments) ---

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
    lists: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((_, Some(expires))) if *expires <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), None));
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.entries.lock().unwrap().insert(
            key.to_string(),
            (
                value.to_string(),
                Some(Instant::now() + Duration::from_secs(ttl_secs)),
            ),
        );
        Ok(())
    }

    async fn lpush_trim(&self, key: &str, value: &str, keep: usize) -> Result<()> {
        let mut lists = self.lists.lock().unwrap();
        let list = lists.entry(key.to_string()).or_default();
        list.insert(0, value.to_string());
        list.truncate(keep);
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let lists = self.lists.lock().unwrap();
        let list = match lists.get(key) {
            Some(l) => l,
            None => return Ok(Vec::new()),
        };
        let len = list.len() as isize;
        let norm = |i: isize| -> usize {
            let v = if i < 0 { len + i } else { i };
            v.clamp(0, len) as usize
        };
        let (a, b) = (norm(start), norm(stop) + 1);
        Ok(list
            .get(a..b.min(list.len()))
            .unwrap_or_default()
            .to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_honors_ttl() {
        let cache = MemoryCache::new();
        cache.set_ex("k", "v", 3600).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        // Zero TTL expires on next read.
        cache.set_ex("gone", "v", 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.get("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lpush_trim_keeps_most_recent() {
        let cache = MemoryCache::new();
        for i in 0..5 {
            cache
                .lpush_trim("ring", &format!("e{i}"), 3)
                .await
                .unwrap();
        }
        let entries = cache.lrange("ring", 0, -1).await.unwrap();
        assert_eq!(entries, vec!["e4", "e3", "e2"]);
    }

    #[tokio::test]
    async fn lrange_partial_window() {
        let cache = MemoryCache::new();
        for i in 0..4 {
            cache
                .lpush_trim("ring", &format!("e{i}"), 10)
                .await
                .unwrap();
        }
        let top_two = cache.lrange("ring", 0, 1).await.unwrap();
        assert_eq!(top_two, vec!["e3", "e2"]);
    }
}
