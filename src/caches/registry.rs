//! Named cache instances.
//!
//! Every collection asks the [`CacheRegistry`] for its cache by name. Asking
//! twice for the same name yields handles over the same store, so separate
//! collections configured with one cache name share entries.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::key_value_cache::{CacheHandle, KeyValueCache, NoopKeyValueCache, Result};
use super::lmdb_cache::LmdbCacheEnv;
use super::memory_cache::MemoryKeyValueCache;

/// Where the registry's caches keep their entries.
#[derive(Clone)]
enum Backend {
    Disabled,
    Memory { max_entries: usize },
    Lmdb(LmdbCacheEnv),
}

/// Creates and remembers one cache per name.
pub struct CacheRegistry {
    backend: Backend,
    caches: Mutex<HashMap<String, CacheHandle>>,
}

impl CacheRegistry {
    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            caches: Mutex::new(HashMap::new()),
        }
    }

    /// Every cache never stores anything.
    pub fn disabled() -> Self {
        Self::with_backend(Backend::Disabled)
    }

    /// Every cache is an in-memory LRU of `max_entries` entries.
    pub fn memory(max_entries: usize) -> Self {
        Self::with_backend(Backend::Memory { max_entries })
    }

    /// Every cache is a named database in the LMDB environment at `path`.
    pub fn open_lmdb(path: &Path) -> Result<Self> {
        Ok(Self::with_backend(Backend::Lmdb(LmdbCacheEnv::open(path)?)))
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.backend, Backend::Disabled)
    }

    /// The cache named `name`, created on first use.
    ///
    /// If the backend cannot open the cache, a warning is logged and the
    /// returned handle does not cache.
    pub fn init(&self, name: &str) -> CacheHandle {
        let mut caches = self.caches.lock().unwrap();
        if let Some(handle) = caches.get(name) {
            return handle.clone();
        }

        let store: Arc<dyn KeyValueCache> = match &self.backend {
            Backend::Disabled => Arc::new(NoopKeyValueCache),
            Backend::Memory { max_entries } => Arc::new(MemoryKeyValueCache::new(*max_entries)),
            Backend::Lmdb(env) => match env.open_cache(name) {
                Ok(cache) => Arc::new(cache),
                Err(e) => {
                    tracing::warn!("cache {} unavailable, continuing without it: {}", name, e);
                    Arc::new(NoopKeyValueCache)
                }
            },
        };

        let handle = CacheHandle::new(name, store);
        caches.insert(name.to_string(), handle.clone());
        handle
    }
}
