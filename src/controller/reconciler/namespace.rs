//! # Namespace Reconcile
//!
//! A namespace changed: find every `ClusterSecret` that may have to add or
//! remove a secret there and enqueue it. The namespace itself is never written.

use std::collections::BTreeSet;

use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use crate::controller::events::WorkItem;
use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::controller::selector::Selector;
use crate::observability::events::{actions, reasons};

impl Reconciler {
    /// Enqueue every `ClusterSecret` owning a secret in `name` or selecting it
    ///
    /// # Errors
    ///
    /// Only the local caches are read, so this currently always succeeds.
    pub async fn reconcile_namespace(&self, name: &str) -> Result<(), ReconcilerError> {
        self.wait_until_synced().await;

        let Some(namespace) = self.cache.namespace(name) else {
            debug!(namespace = %name, "namespace not found, skipping reconcile");
            return Ok(());
        };
        if namespace.metadata.deletion_timestamp.is_some() {
            debug!(namespace = %name, "namespace is being deleted, skipping reconcile");
            return Ok(());
        }

        let mut candidates: BTreeSet<String> = self
            .cache
            .managed_secrets_in_namespace(name)
            .iter()
            .map(|s| s.name_any())
            .collect();

        for cluster_secret in self.cache.cluster_secrets() {
            match Selector::parse(cluster_secret.spec.namespace_selector.as_ref()) {
                Ok(selector) if selector.matches(namespace.labels()) => {
                    candidates.insert(cluster_secret.name_any());
                }
                Ok(_) => {}
                Err(e) => warn!(
                    namespace = %name,
                    cluster_secret = %cluster_secret.name_any(),
                    error = %e,
                    "skipping clustersecret with invalid namespace selector"
                ),
            }
        }

        let resource_ref = namespace.object_ref(&());
        for cluster_secret in candidates {
            info!(namespace = %name, cluster_secret = %cluster_secret, "triggering clustersecret reconcile");
            self.events
                .publish(
                    &resource_ref,
                    EventType::Normal,
                    reasons::TRIGGER_RECONCILE,
                    actions::RECONCILE,
                    Some(format!(
                        "Triggered reconciliation of clustersecret {cluster_secret}"
                    )),
                )
                .await;
            self.queue.add(WorkItem::ClusterSecret(cluster_secret));
        }

        Ok(())
    }
}
