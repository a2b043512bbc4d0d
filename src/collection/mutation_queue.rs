//! Serialization of read-modify-write cycles.
//!
//! Each collection owns one [`MutationQueue`]. A mutation takes its place in
//! line at the moment [`MutationQueue::run`] is called, not when the returned
//! future is first polled, so mutations run strictly in call order. A
//! mutation that fails or is dropped before it finishes hands its turn on.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::Notify;

struct QueueState {
    next_ticket: u64,
    serving: u64,
    /// Tickets dropped before their turn came.
    abandoned: BTreeSet<u64>,
}

/// A FIFO of mutations on one collection.
pub struct MutationQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// A place in the queue. Dropping it gives up the place, or, if it is being
/// served, passes the turn to the next live ticket.
struct Turn<'a> {
    queue: &'a MutationQueue,
    ticket: u64,
}

impl Turn<'_> {
    async fn wait(&self) {
        loop {
            let notified = self.queue.notify.notified();
            if self.queue.state.lock().unwrap().serving == self.ticket {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.queue.state.lock().unwrap();
            if state.serving == self.ticket {
                state.serving += 1;
                loop {
                    let next = state.serving;
                    if !state.abandoned.remove(&next) {
                        break;
                    }
                    state.serving += 1;
                }
            } else {
                state.abandoned.insert(self.ticket);
            }
        }
        self.queue.notify.notify_waiters();
    }
}

impl MutationQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                next_ticket: 0,
                serving: 0,
                abandoned: BTreeSet::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Queue `f` behind every mutation already queued and run it when its
    /// turn comes.
    pub fn run<'a, F, Fut, T>(&'a self, f: F) -> impl Future<Output = T> + 'a
    where
        F: FnOnce() -> Fut + 'a,
        Fut: Future<Output = T> + 'a,
    {
        let turn = {
            let mut state = self.state.lock().unwrap();
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            Turn {
                queue: self,
                ticket,
            }
        };
        async move {
            turn.wait().await;
            let output = f().await;
            drop(turn);
            output
        }
    }

    /// Number of mutations queued or running.
    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap();
        (state.next_ticket - state.serving) as usize - state.abandoned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MutationQueue {
    fn default() -> Self {
        Self::new()
    }
}
