//! # Error Policy
//!
//! Error handling for the worker loop and the watch streams.
//!
//! Failed work items go back to the queue rate limited, so their retry delay
//! grows per key without blocking other keys. Watch stream errors are
//! classified and logged; the watcher's own backoff restarts the stream.

use std::sync::Arc;

use kube_runtime::watcher;
use tracing::{error, info, warn};

use crate::controller::events::WorkItem;
use crate::controller::queue::WorkQueue;
use crate::controller::reconciler::ReconcilerError;
use crate::observability;

/// Requeue a failed work item with per-key exponential backoff
pub fn handle_reconciliation_error(
    item: &WorkItem,
    error: &ReconcilerError,
    queue: &Arc<WorkQueue<WorkItem>>,
) {
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.worker.reconciliation_error",
        kind = item.kind(),
        resource.name = item.name(),
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}: {}", item, error);
    observability::metrics::increment_reconciliation_errors(item.kind());

    let retries = queue.num_requeues(item);
    queue.add_rate_limited(item.clone());
    observability::metrics::increment_workqueue_requeues();

    info!(
        retries = retries + 1,
        "Requeued {} with backoff (trigger source: error-backoff)", item
    );
}

/// Classification of a watch stream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    /// 404: the resource type is not served (CRD missing or removed)
    NotFound,
    /// 401/403: credentials expired or RBAC revoked
    Unauthorized,
    /// 410: resource version too old, the watcher relists
    Expired,
    /// 429: API server storage reinitializing or throttling
    Throttled,
    Other,
}

impl WatchErrorClass {
    /// Classify by the rendered error, as the watcher wraps API responses in several layers
    #[must_use]
    pub fn classify(error_string: &str) -> Self {
        // 404 before 401: a plain text 404 surfaces as a decode error mentioning the watch
        let is_not_found = error_string.contains("ObjectNotFound")
            || error_string.contains("404")
            || error_string.contains("not found");
        if is_not_found {
            return Self::NotFound;
        }
        if error_string.contains("401")
            || error_string.contains("Unauthorized")
            || error_string.contains("403")
            || error_string.contains("Forbidden")
        {
            return Self::Unauthorized;
        }
        if error_string.contains("410")
            || error_string.contains("too old resource version")
            || error_string.contains("Expired")
            || error_string.contains("Gone")
        {
            return Self::Expired;
        }
        if error_string.contains("429")
            || error_string.contains("storage is (re)initializing")
            || error_string.contains("TooManyRequests")
        {
            return Self::Throttled;
        }
        Self::Other
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "404",
            Self::Unauthorized => "401",
            Self::Expired => "410",
            Self::Throttled => "429",
            Self::Other => "other",
        }
    }
}

/// Log a watch stream error for `kind` and count it
pub fn handle_watch_stream_error(kind: &str, error: &watcher::Error) {
    let error_string = error.to_string();
    let class = WatchErrorClass::classify(&error_string);

    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        kind,
        error_type = class.as_str(),
        error = %error_string
    );
    let _error_guard = error_span.enter();

    observability::metrics::increment_watch_errors(kind);

    match class {
        WatchErrorClass::Unauthorized => {
            error!(
                "Watch on {} failed authentication - RBAC may have been revoked or token expired",
                kind
            );
            error!("   Verify the ClusterRole grants list/watch on namespaces, secrets and clustersecrets");
            error!("   Verify the ClusterRoleBinding still binds the controller ServiceAccount");
        }
        WatchErrorClass::Expired => {
            warn!("Watch resource version expired (410) for {}, relisting", kind);
        }
        WatchErrorClass::Throttled => {
            warn!("API server throttling watch on {} (429), backing off", kind);
        }
        WatchErrorClass::NotFound => {
            warn!(
                "{} not found (404) - the ClusterSecret CRD may not be installed. Error: {}",
                kind, error_string
            );
        }
        WatchErrorClass::Other => {
            error!("Watch stream error on {}: {}", kind, error_string);
        }
    }
}
