use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;

use crate::error::FeedError;

/// Abstraction over the external key-value store used for the session
/// metadata mirror, connect tickets, and the threat-report queue.
///
/// Backed by Redis in production and an in-memory map in tests. The store is
/// advisory: the feed core writes to it best-effort and never reads its own
/// writes back.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), FeedError>;
    async fn get(&self, key: &str) -> Result<Option<String>, FeedError>;
    async fn del(&self, key: &str) -> Result<(), FeedError>;
    /// Prepend a value to the list at `key` (append-only queue semantics).
    async fn lpush(&self, key: &str, value: &str) -> Result<(), FeedError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests and store-less deployments)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    data: DashMap<String, String>,
    lists: DashMap<String, Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the list at `key`, newest first. Test helper.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.lists
            .get(key)
            .map(|v| v.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_ex(&self, key: &str, value: &str, _ttl_secs: u64) -> Result<(), FeedError> {
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, FeedError> {
        Ok(self.data.get(key).map(|v| v.value().clone()))
    }

    async fn del(&self, key: &str) -> Result<(), FeedError> {
        self.data.remove(key);
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), FeedError> {
        self.lists
            .entry(key.to_string())
            .or_default()
            .insert(0, value.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, FeedError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), FeedError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, FeedError> {
        let mut conn = self.conn.clone();
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn del(&self, key: &str) -> Result<(), FeedError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), FeedError> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(key, value).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_set_get_del() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", 60).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        store.del("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_lpush_is_newest_first() {
        let store = MemoryStore::new();
        store.lpush("q", "a").await.unwrap();
        store.lpush("q", "b").await.unwrap();
        assert_eq!(store.list("q"), vec!["b".to_string(), "a".to_string()]);
    }
}
