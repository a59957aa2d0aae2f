//! # Types
//!
//! Core types for the reconciler.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::controller::cache::ObjectCache;
use crate::controller::events::WorkItem;
use crate::controller::queue::WorkQueue;
use crate::controller::selector::SelectorError;
use crate::controller::store::{ClusterApi, RecordingClient, StoreError};
use crate::controller::synchronizer::Synchronizer;
use crate::observability::EventPublisher;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("unexpected stringData in clustersecret {0}")]
    UnexpectedStringData(String),
    #[error("invalid namespace selector in clustersecret {name}: {source}")]
    InvalidSelector {
        name: String,
        #[source]
        source: SelectorError,
    },
    #[error(transparent)]
    Apply(#[from] ApplyErrors),
}

/// A managed secret write that failed during the apply pass
#[derive(Debug)]
pub struct ApplyFailure {
    pub operation: &'static str,
    pub namespace: String,
    pub name: String,
    pub error: StoreError,
}

impl fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error {} secret {}/{}: {}",
            self.operation, self.namespace, self.name, self.error
        )
    }
}

/// Every failure of one apply pass
#[derive(Debug, Default)]
pub struct ApplyErrors(pub Vec<ApplyFailure>);

impl ApplyErrors {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn push(&mut self, failure: ApplyFailure) {
        self.0.push(failure);
    }
}

impl fmt::Display for ApplyErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) occurred: ", self.0.len())?;
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApplyErrors {}

/// Shared state of the reconcile functions
#[derive(Clone)]
pub struct Reconciler {
    pub client: RecordingClient,
    pub cache: ObjectCache,
    pub queue: Arc<WorkQueue<WorkItem>>,
    pub synchronizer: Option<Arc<Synchronizer>>,
    pub events: Arc<dyn EventPublisher>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("client", &self.client)
            .field("cache", &self.cache)
            .field("synchronizer", &self.synchronizer.is_some())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Writes go through `api`; when a synchronizer is given they are recorded
    /// with it and every reconcile waits for the caches to catch up first.
    #[must_use]
    pub fn new(
        api: Arc<dyn ClusterApi>,
        cache: ObjectCache,
        queue: Arc<WorkQueue<WorkItem>>,
        synchronizer: Option<Arc<Synchronizer>>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            client: RecordingClient::new(api, synchronizer.clone()),
            cache,
            queue,
            synchronizer,
            events,
        }
    }

    /// Block until the caches reflect this process's writes, if a synchronizer is configured
    pub(crate) async fn wait_until_synced(&self) {
        if let Some(sync) = &self.synchronizer {
            sync.wait_until_synced().await;
        }
    }
}
