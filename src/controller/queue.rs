//! # Work Queue
//!
//! Deduplicating, rate-limited queue of reconciliation keys.
//!
//! Guarantees:
//! - A key is handed to at most one worker at a time.
//! - Adding a key that is already queued is a no-op.
//! - Adding a key that is being processed defers it until `done` is called,
//!   after which it is queued exactly once, however often it was re-added.
//!
//! Every `get` must be paired with a `done` for the same key.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

use super::backoff::ItemBackoff;

#[derive(Debug)]
struct QueueState<T> {
    /// Keys ready to be handed out, in insertion order
    queue: VecDeque<T>,
    /// Keys that need processing (queued, or re-added while processing)
    dirty: HashSet<T>,
    /// Keys currently held by a worker
    processing: HashSet<T>,
    shutting_down: bool,
}

/// Work queue shared between event handlers and workers
#[derive(Debug)]
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    rate_limiter: Mutex<ItemBackoff<T>>,
    notify: Notify,
}

impl<T> WorkQueue<T>
where
    T: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
{
    /// Create a queue whose rate limiter starts at `backoff_base` and caps at `backoff_max`
    #[must_use]
    pub fn new(backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            rate_limiter: Mutex::new(ItemBackoff::new(backoff_base, backoff_max)),
            notify: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rate_limiter(&self) -> MutexGuard<'_, ItemBackoff<T>> {
        self.rate_limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `item` as needing processing
    pub fn add(&self, item: T) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            trace!(?item, "key is being processed, deferring");
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for the next key
    ///
    /// Returns `None` once the queue has been shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent add or shut_down is not missed
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    /// Release `item` after processing; requeues it if it was re-added meanwhile
    pub fn done(&self, item: &T) {
        let mut state = self.state();
        state.processing.remove(item);
        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Add `item` once `delay` has elapsed
    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Add `item` after its next backoff delay
    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        let delay = self.rate_limiter().when(&item);
        trace!(?item, delay_ms = delay.as_millis(), "rate limited requeue");
        self.add_after(item, delay);
    }

    /// Reset the backoff of `item`; call after it was processed successfully
    pub fn forget(&self, item: &T) {
        self.rate_limiter().forget(item);
    }

    /// How many times `item` was rate limited since it was last forgotten
    #[must_use]
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.rate_limiter().retries(item)
    }

    /// Number of keys waiting to be handed out
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out keys; every pending and future `get` returns `None`
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }
}
