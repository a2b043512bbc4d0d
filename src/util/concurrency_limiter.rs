//! Bounded-parallelism limiter for remote calls.
//!
//! The [`ConcurrencyLimiter`] caps how many provider calls may be outstanding at
//! once. Callers that arrive while the limiter is full are queued and admitted
//! in arrival order as permits are returned.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

/// Number of concurrent remote reads allowed when nothing else is configured.
pub const DEFAULT_CONCURRENCY: usize = 5;

// =============================================================================
// Permit
// =============================================================================

/// A slot held in a [`ConcurrencyLimiter`].
///
/// Dropping the permit returns the slot and admits the next queued caller.
pub struct Permit {
    inner: Arc<Inner>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.inner.release();
    }
}

/// A queued acquire. If it is dropped after being granted a slot but before
/// turning it into a [`Permit`], the slot is handed back.
struct Waiting {
    receiver: Option<oneshot::Receiver<()>>,
    inner: Arc<Inner>,
}

impl Drop for Waiting {
    fn drop(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
            if receiver.try_recv().is_ok() {
                self.inner.release();
            }
        }
    }
}

// =============================================================================
// Internal State
// =============================================================================

struct Inner {
    state: Mutex<State>,
}

struct State {
    width: usize,
    in_use: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl Inner {
    /// Take a slot immediately, or enqueue and return the receiver to wait on.
    fn acquire_or_enqueue(&self) -> Option<oneshot::Receiver<()>> {
        let mut state = self.state.lock().unwrap();
        if state.in_use < state.width && state.waiters.is_empty() {
            state.in_use += 1;
            None
        } else {
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            Some(receiver)
        }
    }

    /// Hand the released slot to the oldest live waiter, or free it.
    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        while let Some(waiter) = state.waiters.pop_front() {
            // The slot transfers directly; `in_use` stays the same.
            if waiter.send(()).is_ok() {
                return;
            }
        }
        state.in_use = state.in_use.saturating_sub(1);
    }
}

// =============================================================================
// ConcurrencyLimiter
// =============================================================================

/// Limits the number of concurrently running operations.
///
/// Clones share the same slots.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<Inner>,
}

impl ConcurrencyLimiter {
    /// Create a limiter admitting at most `width` operations at a time.
    ///
    /// A width of zero is treated as one.
    pub fn new(width: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    width: width.max(1),
                    in_use: 0,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Permit {
        if let Some(receiver) = self.inner.acquire_or_enqueue() {
            let mut waiting = Waiting {
                receiver: Some(receiver),
                inner: Arc::clone(&self.inner),
            };
            if let Some(receiver) = waiting.receiver.as_mut() {
                let _ = receiver.await;
            }
            waiting.receiver = None;
        }
        Permit {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Run `f` once a slot is free, holding the slot until it completes.
    pub async fn run<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        f().await
    }

    /// Configured number of slots.
    pub fn width(&self) -> usize {
        self.inner.state.lock().unwrap().width
    }

    /// Number of slots currently held.
    pub fn in_use(&self) -> usize {
        self.inner.state.lock().unwrap().in_use
    }

    /// Number of callers waiting for a slot.
    pub fn waiting_count(&self) -> usize {
        self.inner.state.lock().unwrap().waiters.len()
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let limiter = ConcurrencyLimiter::new(2);

        let a = limiter.acquire().await;
        let b = limiter.acquire().await;
        assert_eq!(limiter.in_use(), 2);

        drop(a);
        assert_eq!(limiter.in_use(), 1);
        drop(b);
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn test_zero_width_admits_one() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.width(), 1);
        let value = limiter.run(|| async { 7 }).await;
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_waiter_admitted_on_release() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire().await;

        let limiter_clone = limiter.clone();
        let handle = tokio::spawn(async move {
            let _permit = limiter_clone.acquire().await;
            42
        });

        sleep(Duration::from_millis(10)).await;
        assert_eq!(limiter.waiting_count(), 1);
        assert!(!handle.is_finished());

        drop(held);
        assert_eq!(handle.await.unwrap(), 42);
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn test_never_exceeds_width() {
        let limiter = ConcurrencyLimiter::new(DEFAULT_CONCURRENCY);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                limiter
                    .run(|| async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(5)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= DEFAULT_CONCURRENCY);
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_leak_slot() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire().await;

        let limiter_clone = limiter.clone();
        let handle = tokio::spawn(async move {
            let _permit = limiter_clone.acquire().await;
        });
        sleep(Duration::from_millis(10)).await;
        handle.abort();
        let _ = handle.await;

        drop(held);
        assert_eq!(limiter.in_use(), 0);
        let _again = limiter.acquire().await;
        assert_eq!(limiter.in_use(), 1);
    }
}
