//! # Synchronizer
//!
//! Read-your-writes barrier between the API server and the local caches.
//!
//! Every write made through the [`RecordingClient`](crate::controller::store::RecordingClient)
//! is recorded here, keyed by the object's uid. [`Synchronizer::wait_until_synced`]
//! blocks until the caches reflect all recorded writes:
//!
//! - a create or update is caught up once the cache holds the same uid at a
//!   resource version at least as high as the recorded one;
//! - a deletion is caught up once the cache no longer holds that uid under
//!   the object's name.
//!
//! Informers call [`Synchronizer::signal`] after every cache change, which
//! sweeps the outstanding writes and wakes waiters so they re-check.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kube::ResourceExt;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::controller::cache::{CachedResource, ObjectCache, ObjectKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expected {
    Version(u64),
    Tombstone,
}

#[derive(Debug, Clone)]
struct PendingMutation {
    kind: ObjectKind,
    namespace: Option<String>,
    name: String,
    expected: Expected,
}

impl std::fmt::Display for PendingMutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ", self.kind.as_str())?;
        if let Some(ns) = &self.namespace {
            write!(f, "{ns}/")?;
        }
        match self.expected {
            Expected::Version(v) => write!(f, "{} ({v})", self.name),
            Expected::Tombstone => write!(f, "{} (deleted)", self.name),
        }
    }
}

#[derive(Debug, Default)]
struct SyncState {
    /// Outstanding writes by uid
    pending: HashMap<String, PendingMutation>,
    waiters: HashMap<u64, Arc<Notify>>,
    next_waiter: u64,
}

/// Consistency barrier over the local caches
#[derive(Debug)]
pub struct Synchronizer {
    cache: ObjectCache,
    state: Mutex<SyncState>,
}

/// Parse a resource version as a decimal integer
///
/// # Panics
///
/// Panics if `resource_version` is not a decimal integer; versions are
/// compared numerically and an opaque token cannot be ordered.
fn parse_version(resource_version: &str) -> u64 {
    resource_version
        .parse()
        .unwrap_or_else(|_| panic!("non-numeric resource version {resource_version:?}"))
}

fn identity<K: CachedResource>(obj: &K) -> (String, Option<String>) {
    let uid = obj
        .uid()
        .filter(|uid| !uid.is_empty())
        .unwrap_or_else(|| panic!("{} {} has no uid", K::KIND.as_str(), obj.name_any()));
    let rv = obj.resource_version().filter(|rv| !rv.is_empty());
    (uid, rv)
}

impl Synchronizer {
    #[must_use]
    pub fn new(cache: ObjectCache) -> Self {
        Self {
            cache,
            state: Mutex::new(SyncState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a successful create or update of `obj`
    ///
    /// The expected version only ever moves forward, and a recorded deletion
    /// is never overridden.
    ///
    /// # Panics
    ///
    /// Panics if `obj` has no uid, no resource version, or a resource version
    /// that is not a decimal integer.
    pub fn record_write<K: CachedResource>(&self, obj: &K) {
        let (uid, rv) = identity(obj);
        let rv = rv.unwrap_or_else(|| {
            panic!(
                "{} {} has no resource version",
                K::KIND.as_str(),
                obj.name_any()
            )
        });
        let version = parse_version(&rv);

        let mut state = self.state();
        let entry = state
            .pending
            .entry(uid)
            .or_insert_with(|| PendingMutation {
                kind: K::KIND,
                namespace: obj.namespace(),
                name: obj.name_any(),
                expected: Expected::Version(version),
            });
        if let Expected::Version(current) = entry.expected {
            if version > current {
                entry.expected = Expected::Version(version);
            }
        }
        trace!(pending = %entry, "recorded write");
        Self::wake(&state);
    }

    /// Record a successful deletion of `obj`
    ///
    /// # Panics
    ///
    /// Panics if `obj` has no uid.
    pub fn record_deletion<K: CachedResource>(&self, obj: &K) {
        let (uid, _) = identity(obj);

        let mut state = self.state();
        let entry = state
            .pending
            .entry(uid)
            .or_insert_with(|| PendingMutation {
                kind: K::KIND,
                namespace: obj.namespace(),
                name: obj.name_any(),
                expected: Expected::Tombstone,
            });
        entry.expected = Expected::Tombstone;
        trace!(pending = %entry, "recorded deletion");
        Self::wake(&state);
    }

    /// Clear the writes the caches caught up with and wake every waiter;
    /// called by the informers after each cache change
    ///
    /// Entries clear as soon as the caches catch up, whether or not anyone waits.
    pub fn signal(&self) {
        self.sweep();
        Self::wake(&self.state());
    }

    fn wake(state: &SyncState) {
        // A waiter that is busy sweeping keeps one stored permit and re-sweeps
        for notify in state.waiters.values() {
            notify.notify_one();
        }
    }

    /// Number of writes the caches have not caught up with yet
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    /// Block until the caches reflect every recorded write
    pub async fn wait_until_synced(&self) {
        let notify = Arc::new(Notify::new());
        let id = {
            let mut state = self.state();
            let id = state.next_waiter;
            state.next_waiter = state.next_waiter.wrapping_add(1);
            state.waiters.insert(id, Arc::clone(&notify));
            id
        };
        let _registration = WaiterRegistration { sync: self, id };

        loop {
            let remaining = self.sweep();
            if remaining == 0 {
                return;
            }
            debug!(remaining, "waiting for caches to catch up");
            notify.notified().await;
        }
    }

    /// Drop every pending entry the caches have caught up with; returns how many remain
    fn sweep(&self) -> usize {
        let mut state = self.state();
        state.pending.retain(|uid, item| {
            let cached = self
                .cache
                .lookup(item.kind, item.namespace.as_deref(), &item.name);
            let synced = match (item.expected, cached) {
                (Expected::Version(expected), Some(cached)) => {
                    cached.uid == *uid && parse_version(&cached.resource_version) >= expected
                }
                (Expected::Version(_), None) => false,
                // A different uid under the same name is a recreated object
                (Expected::Tombstone, Some(cached)) => cached.uid != *uid,
                (Expected::Tombstone, None) => true,
            };
            if synced {
                trace!(pending = %item, "cache caught up");
            }
            !synced
        });
        state.pending.len()
    }
}

struct WaiterRegistration<'a> {
    sync: &'a Synchronizer,
    id: u64,
}

impl Drop for WaiterRegistration<'_> {
    fn drop(&mut self) {
        self.sync.state().waiters.remove(&self.id);
    }
}
