//! In-memory LRU cache.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;
use tokio::sync::Mutex;

use super::key_value_cache::{KeyValueCache, Result};

/// Number of entries kept when nothing else is configured.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// A process-local cache bounded by entry count.
///
/// The least recently used entry is evicted once the bound is reached.
pub struct MemoryKeyValueCache {
    entries: Mutex<LruCache<String, Value>>,
}

impl MemoryKeyValueCache {
    /// Create a cache holding at most `max_entries` values (at least one).
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of entries currently held.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl Default for MemoryKeyValueCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl KeyValueCache for MemoryKeyValueCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.lock().await.put(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.pop(key);
        Ok(())
    }
}
