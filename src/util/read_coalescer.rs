//! Collapsing of concurrent identical reads.
//!
//! [`ReadCoalescer`] lets concurrent callers asking for the same key share one
//! in-flight fetch. The first caller (the leader) runs the fetch; callers that
//! arrive while it is running wait and receive a clone of its result. Once the
//! fetch settles the key is released, so the next read fetches again.
//!
//! If the leader is dropped before finishing, waiting callers are woken and
//! retry; one of them becomes the new leader.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, OnceCell};

/// One in-flight fetch shared by a leader and its followers.
struct Slot<V, E> {
    result: OnceCell<Result<V, E>>,
    abandoned: AtomicBool,
    notify: Notify,
}

impl<V: Clone, E: Clone> Slot<V, E> {
    fn new() -> Self {
        Self {
            result: OnceCell::new(),
            abandoned: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Wait for the leader's result. `None` means the leader gave up.
    async fn wait(&self) -> Option<Result<V, E>> {
        loop {
            let notified = self.notify.notified();
            if let Some(result) = self.result.get() {
                return Some(result.clone());
            }
            if self.abandoned.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }
}

/// Releases the key when the leader finishes or is dropped mid-fetch.
struct LeaderGuard<'a, K: Hash + Eq, V, E> {
    in_flight: &'a Mutex<HashMap<K, Arc<Slot<V, E>>>>,
    key: &'a K,
    slot: Arc<Slot<V, E>>,
}

impl<K: Hash + Eq, V, E> Drop for LeaderGuard<'_, K, V, E> {
    fn drop(&mut self) {
        if self.slot.result.get().is_none() {
            self.slot.abandoned.store(true, Ordering::SeqCst);
        }
        {
            let mut map = self.in_flight.lock().unwrap();
            if map
                .get(self.key)
                .is_some_and(|current| Arc::ptr_eq(current, &self.slot))
            {
                map.remove(self.key);
            }
        }
        self.slot.notify.notify_waiters();
    }
}

/// Shares one in-flight fetch among concurrent callers with the same key.
pub struct ReadCoalescer<K, V, E> {
    in_flight: Mutex<HashMap<K, Arc<Slot<V, E>>>>,
}

impl<K, V, E> ReadCoalescer<K, V, E>
where
    K: Hash + Eq + Clone + Send,
    V: Clone + Send,
    E: Clone + Send,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `fetch` for `key`, or join a fetch for the same key already running.
    pub async fn call<F, Fut>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        loop {
            let (slot, is_leader) = {
                let mut map = self.in_flight.lock().unwrap();
                match map.get(&key) {
                    Some(slot) => (Arc::clone(slot), false),
                    None => {
                        let slot = Arc::new(Slot::new());
                        map.insert(key.clone(), Arc::clone(&slot));
                        (slot, true)
                    }
                }
            };

            if is_leader {
                let guard = LeaderGuard {
                    in_flight: &self.in_flight,
                    key: &key,
                    slot,
                };
                let result = fetch().await;
                let _ = guard.slot.result.set(result.clone());
                drop(guard);
                return result;
            }

            if let Some(result) = slot.wait().await {
                return result;
            }
        }
    }

    /// Number of keys with a fetch currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }
}

impl<K, V, E> Default for ReadCoalescer<K, V, E>
where
    K: Hash + Eq + Clone + Send,
    V: Clone + Send,
    E: Clone + Send,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_single_read() {
        let coalescer: ReadCoalescer<String, i32, String> = ReadCoalescer::new();
        let result = coalescer.call("tree".to_string(), || async { Ok(1) }).await;
        assert_eq!(result, Ok(1));
        assert_eq!(coalescer.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_error_is_shared_and_released() {
        let coalescer: ReadCoalescer<String, i32, String> = ReadCoalescer::new();
        let result = coalescer
            .call("tree".to_string(), || async { Err("offline".to_string()) })
            .await;
        assert_eq!(result, Err("offline".to_string()));
        assert_eq!(coalescer.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_reads_share_one_fetch() {
        let coalescer: Arc<ReadCoalescer<String, i32, ()>> = Arc::new(ReadCoalescer::new());
        let fetches = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coalescer = Arc::clone(&coalescer);
            let fetches = Arc::clone(&fetches);
            handles.push(tokio::spawn(async move {
                coalescer
                    .call("tree.main.data".to_string(), || async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(30)).await;
                        Ok(9)
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(9));
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_reads_fetch_again() {
        let coalescer: ReadCoalescer<String, u32, ()> = ReadCoalescer::new();
        let fetches = AtomicU32::new(0);

        for _ in 0..3 {
            coalescer
                .call("k".to_string(), || async {
                    Ok(fetches.fetch_add(1, Ordering::SeqCst))
                })
                .await
                .unwrap();
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_follower_takes_over_when_leader_cancelled() {
        let coalescer: Arc<ReadCoalescer<String, i32, ()>> = Arc::new(ReadCoalescer::new());

        let leader = {
            let coalescer = Arc::clone(&coalescer);
            tokio::spawn(async move {
                coalescer
                    .call("k".to_string(), || async {
                        sleep(Duration::from_secs(60)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        sleep(Duration::from_millis(10)).await;

        let follower = {
            let coalescer = Arc::clone(&coalescer);
            tokio::spawn(async move { coalescer.call("k".to_string(), || async { Ok(2) }).await })
        };
        sleep(Duration::from_millis(10)).await;

        leader.abort();
        let _ = leader.await;

        assert_eq!(follower.await.unwrap(), Ok(2));
        assert_eq!(coalescer.in_flight_count(), 0);
    }
}
