//! Fetch-or-reuse policy over a cache.
//!
//! [`get_or_set`] returns the cached value for a key if there is one and
//! otherwise computes, stores and returns it. [`get_or_set_validated`] also
//! asks a predicate whether a cached value may still be used; a rejected
//! value is logged and recomputed.
//!
//! Neither function limits concurrency or merges concurrent computations for
//! the same key; callers that need that wrap `compute` themselves.

use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::key_value_cache::CacheHandle;

/// Return the cached value for `key`, or compute and store it.
///
/// A failed computation stores nothing and returns the error.
pub async fn get_or_set<T, E, F, Fut>(cache: &CacheHandle, key: &str, compute: F) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    lookup_or_compute(cache, key, compute, None::<fn(&T) -> bool>).await
}

/// Like [`get_or_set`], but a cached value is used only if `is_still_valid`
/// accepts it.
pub async fn get_or_set_validated<T, E, F, Fut, V>(
    cache: &CacheHandle,
    key: &str,
    compute: F,
    is_still_valid: V,
) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    V: Fn(&T) -> bool,
{
    lookup_or_compute(cache, key, compute, Some(is_still_valid)).await
}

async fn lookup_or_compute<T, E, F, Fut, V>(
    cache: &CacheHandle,
    key: &str,
    compute: F,
    is_still_valid: Option<V>,
) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    V: Fn(&T) -> bool,
{
    if let Some(cached) = cache.get::<T>(key).await {
        match &is_still_valid {
            Some(check) if !check(&cached) => {
                tracing::warn!("cache invalidated for {}", key);
            }
            _ => return Ok(cached),
        }
    }

    let value = compute().await?;
    cache.set(key, &value).await;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caches::MemoryKeyValueCache;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn memory_cache() -> CacheHandle {
        CacheHandle::new("test", Arc::new(MemoryKeyValueCache::default()))
    }

    #[tokio::test]
    async fn test_computes_once_then_reuses() {
        let cache = memory_cache();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let value: Result<String, ()> = get_or_set(&cache, "k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("v".to_string())
            })
            .await;
            assert_eq!(value, Ok("v".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_value_is_recomputed_and_replaced() {
        let cache = memory_cache();
        cache.set("file.main.a.json", &"old-blob".to_string()).await;

        let value: Result<String, ()> = get_or_set_validated(
            &cache,
            "file.main.a.json",
            || async { Ok("new-blob".to_string()) },
            |cached: &String| cached == "new-blob",
        )
        .await;

        assert_eq!(value, Ok("new-blob".to_string()));
        assert_eq!(
            cache.get::<String>("file.main.a.json").await,
            Some("new-blob".to_string())
        );
    }

    #[tokio::test]
    async fn test_accepted_value_skips_compute() {
        let cache = memory_cache();
        cache.set("k", &5).await;

        let value: Result<i32, ()> =
            get_or_set_validated(&cache, "k", || async { Err(()) }, |_| true).await;
        assert_eq!(value, Ok(5));
    }

    #[tokio::test]
    async fn test_error_stores_nothing() {
        let cache = memory_cache();
        let value: Result<i32, String> =
            get_or_set(&cache, "k", || async { Err("offline".to_string()) }).await;
        assert_eq!(value, Err("offline".to_string()));
        assert_eq!(cache.get::<i32>("k").await, None);
    }

    #[tokio::test]
    async fn test_noop_cache_always_computes() {
        let cache = CacheHandle::noop();
        let calls = AtomicU32::new(0);

        for expected in 1..=3 {
            let value: Result<u32, ()> = get_or_set(&cache, "k", || async {
                Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
            })
            .await;
            assert_eq!(value, Ok(expected));
        }
    }
}
