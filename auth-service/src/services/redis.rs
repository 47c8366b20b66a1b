use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};

use super::error::ServiceError;

/// Derived key/value cache. Values are opaque strings; callers own encoding.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, ServiceError>;
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), ServiceError>;
    /// Delete `keys`, returning how many existed. Deleting absent keys is not an error.
    async fn delete(&self, keys: &[String]) -> Result<u64, ServiceError>;
    async fn health_check(&self) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct RedisService {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %config.url, "Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl Cache for RedisService {
    async fn get(&self, key: &str) -> Result<Option<String>, ServiceError> {
        let mut conn = self.manager.clone();
        let value = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, ServiceError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key);
        }
        let removed: u64 = cmd.query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

/// In-memory cache with switchable failure modes.
#[derive(Default)]
pub struct MockCache {
    entries: Mutex<HashMap<String, String>>,
    deleted: Mutex<Vec<String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MockCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn unavailable() -> ServiceError {
        ServiceError::Redis(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "mock cache unavailable",
        )))
    }

    /// Store a raw value, bypassing any encoding.
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
    }

    pub fn get_raw(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get_raw(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Every key passed to `delete`, in call order, whether or not it existed.
    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear_deleted_log(&self) {
        self.deleted.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Cache for MockCache {
    async fn get(&self, key: &str) -> Result<Option<String>, ServiceError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let value = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock cache mutex poisoned: {}", e))?
            .get(key)
            .cloned();
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, _ttl_seconds: u64) -> Result<(), ServiceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock cache mutex poisoned: {}", e))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, ServiceError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.deleted
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock cache mutex poisoned: {}", e))?
            .extend(keys.iter().cloned());

        let mut entries = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock cache mutex poisoned: {}", e))?;
        let removed = keys.iter().filter(|k| entries.remove(k.as_str()).is_some()).count();
        Ok(removed as u64)
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_delete_is_idempotent() {
        let cache = MockCache::new();
        cache.set("a", "1", 60).await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string()];
        assert_eq!(cache.delete(&keys).await.unwrap(), 1);
        assert_eq!(cache.delete(&keys).await.unwrap(), 0);
        assert_eq!(cache.deleted_keys().len(), 4);
    }

    #[tokio::test]
    async fn test_mock_failure_modes() {
        let cache = MockCache::new();
        cache.fail_reads(true);
        assert!(matches!(cache.get("a").await, Err(ServiceError::Redis(_))));

        cache.fail_reads(false);
        cache.fail_writes(true);
        assert!(cache.set("a", "1", 60).await.is_err());
        assert_eq!(cache.get("a").await.unwrap(), None);
    }
}
