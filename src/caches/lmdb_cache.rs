//! LMDB-backed persistent cache.
//!
//! One LMDB environment holds a named database per cache name, so caches
//! created with different names never see each other's keys. Values are
//! stored as JSON bytes.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use serde_json::Value;

use super::key_value_cache::{CacheError, KeyValueCache, Result};

/// Upper bound on the size of the memory map.
const MAP_SIZE: usize = 1024 * 1024 * 1024;

/// Upper bound on distinct cache names in one environment.
const MAX_DBS: u32 = 64;

fn db_error(e: impl std::fmt::Display) -> CacheError {
    CacheError::Database(e.to_string())
}

// =============================================================================
// LmdbCacheEnv
// =============================================================================

/// An open LMDB environment from which named caches are created.
#[derive(Clone)]
pub struct LmdbCacheEnv {
    env: Arc<Env>,
}

impl LmdbCacheEnv {
    /// Open (or create) the environment in directory `path`.
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(MAP_SIZE)
                .max_dbs(MAX_DBS)
                .open(path)
                .map_err(db_error)?
        };

        Ok(Self { env: Arc::new(env) })
    }

    /// Open (or create) the database for cache `name`.
    pub fn open_cache(&self, name: &str) -> Result<LmdbKeyValueCache> {
        let mut wtxn = self.env.write_txn().map_err(db_error)?;
        let db: Database<Str, Bytes> = self
            .env
            .create_database(&mut wtxn, Some(name))
            .map_err(db_error)?;
        wtxn.commit().map_err(db_error)?;

        Ok(LmdbKeyValueCache {
            env: self.env.clone(),
            db,
        })
    }
}

// =============================================================================
// LmdbKeyValueCache
// =============================================================================

/// A [`KeyValueCache`] stored in one named LMDB database.
pub struct LmdbKeyValueCache {
    env: Arc<Env>,
    db: Database<Str, Bytes>,
}

#[async_trait]
impl KeyValueCache for LmdbKeyValueCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let env = self.env.clone();
        let db = self.db;
        let key = key.to_string();

        let bytes = tokio::task::spawn_blocking(move || {
            let rtxn = env.read_txn().map_err(db_error)?;
            let value = db.get(&rtxn, &key).map_err(db_error)?.map(|v| v.to_vec());
            Ok::<_, CacheError>(value)
        })
        .await
        .map_err(db_error)??;

        match bytes {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| CacheError::Encoding(e.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let env = self.env.clone();
        let db = self.db;
        let key = key.to_string();
        let bytes = serde_json::to_vec(&value).map_err(|e| CacheError::Encoding(e.to_string()))?;

        tokio::task::spawn_blocking(move || {
            let mut wtxn = env.write_txn().map_err(db_error)?;
            db.put(&mut wtxn, &key, &bytes).map_err(db_error)?;
            wtxn.commit().map_err(db_error)?;
            Ok(())
        })
        .await
        .map_err(db_error)?
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let env = self.env.clone();
        let db = self.db;
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let mut wtxn = env.write_txn().map_err(db_error)?;
            db.delete(&mut wtxn, &key).map_err(db_error)?;
            wtxn.commit().map_err(db_error)?;
            Ok(())
        })
        .await
        .map_err(db_error)?
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let env = LmdbCacheEnv::open(temp_dir.path()).unwrap();
        let cache = env.open_cache("records").unwrap();

        assert_eq!(cache.get("tree.main.data").await.unwrap(), None);

        cache
            .set("tree.main.data", json!([{"id": "1", "name": "Ann"}]))
            .await
            .unwrap();
        assert_eq!(
            cache.get("tree.main.data").await.unwrap(),
            Some(json!([{"id": "1", "name": "Ann"}]))
        );

        cache.delete("tree.main.data").await.unwrap();
        assert_eq!(cache.get("tree.main.data").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_names_are_separate() {
        let temp_dir = TempDir::new().unwrap();
        let env = LmdbCacheEnv::open(temp_dir.path()).unwrap();
        let a = env.open_cache("a").unwrap();
        let b = env.open_cache("b").unwrap();

        a.set("k", json!(1)).await.unwrap();
        assert_eq!(b.get("k").await.unwrap(), None);

        let a_again = env.open_cache("a").unwrap();
        assert_eq!(a_again.get("k").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let env = LmdbCacheEnv::open(temp_dir.path()).unwrap();
            let cache = env.open_cache("records").unwrap();
            cache.set("k", json!("v")).await.unwrap();
        }
        let env = LmdbCacheEnv::open(temp_dir.path()).unwrap();
        let cache = env.open_cache("records").unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!("v")));
    }
}
