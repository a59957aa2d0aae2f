//! # Reconciler
//!
//! Core reconciliation logic for `ClusterSecret` resources.
//!
//! Two reconcile functions share one work queue:
//! - [`Reconciler::reconcile_namespace`] fans a namespace change out to the
//!   `ClusterSecret`s it may affect
//! - [`Reconciler::reconcile_cluster_secret`] creates, updates and deletes the
//!   managed secrets of one `ClusterSecret` and maintains its status

pub mod cluster_secret;
pub mod diff;
pub mod namespace;
pub mod status;
pub mod types;

pub use diff::{SecretKey, SecretOperation};
pub use types::{ApplyErrors, ApplyFailure, Reconciler, ReconcilerError};

use std::time::Instant;

use tracing::Instrument;

use crate::controller::events::WorkItem;
use crate::observability::metrics;

impl Reconciler {
    /// Run the reconcile function matching `item`
    ///
    /// # Errors
    ///
    /// Returns the reconcile function's error unchanged.
    pub async fn reconcile(&self, item: &WorkItem) -> Result<(), ReconcilerError> {
        let kind = item.kind();
        let span = tracing::info_span!(
            "controller.reconcile",
            kind,
            resource.name = item.name(),
        );

        let start = Instant::now();
        metrics::increment_reconciliations(kind);

        let result = async {
            match item {
                WorkItem::Namespace(name) => self.reconcile_namespace(name).await,
                WorkItem::ClusterSecret(name) => self.reconcile_cluster_secret(name).await,
            }
        }
        .instrument(span)
        .await;

        metrics::observe_reconciliation_duration(kind, start.elapsed().as_secs_f64());
        result
    }
}
