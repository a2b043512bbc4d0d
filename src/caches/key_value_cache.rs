//! Key-value cache trait and the typed handle used by the record layer.
//!
//! Backends store JSON values under string keys. The rest of the crate talks
//! to a cache through [`CacheHandle`], which never fails: a cache that cannot
//! be read behaves like an empty one, and a cache that cannot be written is
//! skipped.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The storage backend failed (e.g. LMDB).
    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

// =============================================================================
// KeyValueCache Trait
// =============================================================================

/// An asynchronous key-value store holding JSON values.
///
/// A missing key is `Ok(None)`, never an error.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Get the value for a key, returning `None` if not found.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store a value, replacing any previous one.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

// =============================================================================
// NoopKeyValueCache
// =============================================================================

/// A cache that never caches anything.
///
/// All reads miss and all writes silently succeed without storing. Used when
/// caching is disabled via configuration.
pub struct NoopKeyValueCache;

#[async_trait]
impl KeyValueCache for NoopKeyValueCache {
    async fn get(&self, _key: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Value) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// CacheHandle
// =============================================================================

/// A named, typed view of a [`KeyValueCache`].
///
/// Clones share the same store.
#[derive(Clone)]
pub struct CacheHandle {
    name: String,
    store: Arc<dyn KeyValueCache>,
}

impl CacheHandle {
    pub fn new(name: impl Into<String>, store: Arc<dyn KeyValueCache>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }

    /// A handle over [`NoopKeyValueCache`].
    pub fn noop() -> Self {
        Self::new("noop", Arc::new(NoopKeyValueCache))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read and decode a value. Backend failures and values that do not
    /// decode as `T` are logged and reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = match self.store.get(key).await {
            Ok(value) => value?,
            Err(e) => {
                tracing::warn!("cache {}: failed to read {}: {}", self.name, key, e);
                return None;
            }
        };
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::warn!("cache {}: ignoring undecodable {}: {}", self.name, key, e);
                None
            }
        }
    }

    /// Encode and store a value. Failures are logged and otherwise ignored.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("cache {}: failed to encode {}: {}", self.name, key, e);
                return;
            }
        };
        if let Err(e) = self.store.set(key, value).await {
            tracing::warn!("cache {}: failed to write {}: {}", self.name, key, e);
        }
    }

    /// Remove a key. Failures are logged and otherwise ignored.
    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            tracing::warn!("cache {}: failed to delete {}: {}", self.name, key, e);
        }
    }
}

impl std::fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHandle").field("name", &self.name).finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    /// A store whose reads and writes can be switched to fail.
    #[derive(Default)]
    pub(crate) struct FlakyCache {
        pub entries: Mutex<HashMap<String, Value>>,
        pub failing: AtomicBool,
    }

    impl FlakyCache {
        fn check(&self) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(CacheError::Database("backend offline".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl KeyValueCache for FlakyCache {
        async fn get(&self, key: &str) -> Result<Option<Value>> {
            self.check()?;
            Ok(self.entries.lock().await.get(key).cloned())
        }

        async fn set(&self, key: &str, value: Value) -> Result<()> {
            self.check()?;
            self.entries.lock().await.insert(key.to_string(), value);
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.check()?;
            self.entries.lock().await.remove(key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_noop_always_misses() {
        let handle = CacheHandle::noop();
        handle.set("k", &vec![1, 2, 3]).await;
        assert_eq!(handle.get::<Vec<i32>>("k").await, None);
        handle.delete("k").await;
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let handle = CacheHandle::new("test", Arc::new(FlakyCache::default()));
        handle.set("tree.main.data", &vec!["a".to_string()]).await;
        assert_eq!(
            handle.get::<Vec<String>>("tree.main.data").await,
            Some(vec!["a".to_string()])
        );
        handle.delete("tree.main.data").await;
        assert_eq!(handle.get::<Vec<String>>("tree.main.data").await, None);
    }

    #[tokio::test]
    async fn test_failures_are_misses() {
        let store = Arc::new(FlakyCache::default());
        let handle = CacheHandle::new("test", store.clone());
        handle.set("k", &1).await;

        store.failing.store(true, Ordering::SeqCst);
        assert_eq!(handle.get::<i32>("k").await, None);
        handle.set("k", &2).await;

        store.failing.store(false, Ordering::SeqCst);
        assert_eq!(handle.get::<i32>("k").await, Some(1));
    }

    #[tokio::test]
    async fn test_undecodable_value_is_a_miss() {
        let handle = CacheHandle::new("test", Arc::new(FlakyCache::default()));
        handle.set("k", "not a number").await;
        assert_eq!(handle.get::<u64>("k").await, None);
    }
}
