//! Shared key/value store contract.
//!
//! The circuit breaker and the result cache both persist through this narrow
//! trait. Production deployments back it with a networked cache; the bundled
//! [`MemoryStore`] keeps TTL semantics in process so the reliability
//! machinery works (and is testable) without external infrastructure.
//!
//! Store failures are never fatal to a request: callers treat an unreachable
//! store as a miss (cache) or a closed circuit (breaker).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

/// Failure talking to the backing store.
#[derive(Debug, Error)]
#[error("shared store error: {0}")]
pub struct StoreError(pub String);

/// Minimal async key/value contract with per-entry TTLs.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Fetch a value; `None` for missing or expired keys.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store a value with an expiry.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Remove a key. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Liveness probe for the health endpoint.
    async fn ping(&self) -> bool;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process TTL store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| e.expires_at > now).count()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        // Opportunistic sweep keeps the map from accumulating dead entries.
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }
}

/// Store stub that fails every operation. Used in tests to verify that the
/// breaker and cache degrade gracefully when the backing store is down.
pub struct UnreachableStore;

#[async_trait]
impl SharedStore for UnreachableStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError("store unreachable".to_string()))
    }

    async fn put(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), StoreError> {
        Err(StoreError("store unreachable".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError("store unreachable".to_string()))
    }

    async fn ping(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn values_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .put("k", "v".to_string(), Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        store
            .put("k", "v".to_string(), Duration::from_secs(10))
            .await
            .unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
