//! # ClusterSecret Reconcile
//!
//! Brings the managed secrets of one `ClusterSecret` in line with its spec.
//!
//! ## Reconciliation Flow
//!
//! 1. Wait for the caches to reflect this process's writes
//! 2. Read the `ClusterSecret` from the API server (never from the cache)
//! 3. Add the finalizer if missing
//! 4. Reject templates still carrying `stringData`
//! 5. Diff the cached managed secrets against the selected namespaces
//! 6. Write `Processing` or `Deleting` before touching any secret
//! 7. Apply every operation, collecting failures instead of stopping at the first
//! 8. Write `Error` (or keep `Deleting`, with the failures as message) and fail,
//!    or write `Ready`, or drop the finalizer when deleting

use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use crate::constants::FINALIZER;
use crate::controller::reconciler::diff::{desired_secrets, plan_operations, SecretOperation};
use crate::controller::reconciler::status::pre_apply_state;
use crate::controller::reconciler::{ApplyErrors, ApplyFailure, Reconciler, ReconcilerError};
use crate::controller::selector::Selector;
use crate::controller::store::StoreError;
use crate::crd::{ClusterSecret, ClusterSecretState};
use crate::observability::events::{actions, reasons};
use crate::observability::metrics;

impl Reconciler {
    /// Reconcile the `ClusterSecret` called `name`, which may no longer exist
    ///
    /// # Errors
    ///
    /// Returns store errors, template and selector errors, and the aggregated
    /// failures of the apply pass. Every error leads to a rate-limited retry.
    pub async fn reconcile_cluster_secret(&self, name: &str) -> Result<(), ReconcilerError> {
        self.wait_until_synced().await;

        let mut cluster_secret = self.client.get_cluster_secret(name).await?;
        let result = self.sync_cluster_secret(name, &mut cluster_secret).await;

        if let Some(cs) = &cluster_secret {
            let resource_ref = cs.object_ref(&());
            match &result {
                Ok(()) => {
                    self.events
                        .publish(
                            &resource_ref,
                            EventType::Normal,
                            reasons::RECONCILED,
                            actions::RECONCILE,
                            Some(format!("Successfully reconciled clustersecret {name}")),
                        )
                        .await;
                }
                Err(e) => {
                    self.events
                        .publish(
                            &resource_ref,
                            EventType::Warning,
                            reasons::RECONCILE_ERROR,
                            actions::RECONCILE,
                            Some(e.to_string()),
                        )
                        .await;
                }
            }
        }

        result
    }

    async fn sync_cluster_secret(
        &self,
        name: &str,
        cluster_secret: &mut Option<ClusterSecret>,
    ) -> Result<(), ReconcilerError> {
        if let Some(cs) = cluster_secret.as_mut() {
            if !cs.is_deleting() {
                self.ensure_finalizer(cs).await?;
            }
            if cs.spec.template.string_data.is_some() {
                return Err(ReconcilerError::UnexpectedStringData(name.to_string()));
            }
        }

        let existing = self.cache.managed_secrets(name);

        let desired = match cluster_secret.as_mut() {
            Some(cs) if !cs.is_deleting() => {
                match Selector::parse(cs.spec.namespace_selector.as_ref()) {
                    Ok(selector) => desired_secrets(cs, &selector, &self.cache.namespaces()),
                    Err(source) => {
                        let err = ReconcilerError::InvalidSelector {
                            name: name.to_string(),
                            source,
                        };
                        self.update_status(cs, ClusterSecretState::Error, Some(err.to_string()))
                            .await?;
                        return Err(err);
                    }
                }
            }
            _ => Vec::new(),
        };

        let generation = cluster_secret.as_ref().map_or(0, ClusterSecret::generation);
        let operations = plan_operations(existing, desired, generation);
        debug!(
            cluster_secret = %name,
            operations = operations.len(),
            "computed secret operations"
        );

        if let Some(cs) = cluster_secret.as_mut() {
            if let Some(state) = pre_apply_state(cs, !operations.is_empty()) {
                self.update_status(cs, state, None).await?;
            }
        }

        let mut failures = ApplyErrors::default();
        for (key, operation) in operations {
            let result = match &operation {
                SecretOperation::Create(secret) => {
                    self.client.create_secret(secret).await.map(drop)
                }
                SecretOperation::Update { desired, .. } => {
                    self.client.update_secret(desired).await.map(drop)
                }
                SecretOperation::Delete(existing) => self.client.delete_secret(existing).await,
            };
            match result {
                Ok(()) => {
                    metrics::increment_secret_operations(operation.kind());
                    info!(
                        cluster_secret = %name,
                        secret = %key,
                        operation = operation.kind(),
                        "applied secret operation"
                    );
                }
                Err(error) => {
                    metrics::increment_secret_operation_errors(operation.kind());
                    warn!(
                        cluster_secret = %name,
                        secret = %key,
                        operation = operation.kind(),
                        error = %error,
                        "secret operation failed"
                    );
                    failures.push(ApplyFailure {
                        operation: operation.verb(),
                        namespace: key.namespace,
                        name: key.name,
                        error,
                    });
                }
            }
        }

        let Some(cs) = cluster_secret.as_mut() else {
            return if failures.is_empty() {
                Ok(())
            } else {
                Err(failures.into())
            };
        };

        if !failures.is_empty() {
            let state = if cs.is_deleting() {
                ClusterSecretState::Deleting
            } else {
                ClusterSecretState::Error
            };
            if let Err(e) = self.update_status(cs, state, Some(failures.to_string())).await {
                warn!(cluster_secret = %name, error = %e, "failed to record apply failures in status");
            }
            return Err(failures.into());
        }

        if cs.is_deleting() {
            self.remove_finalizer(cs).await?;
            info!(cluster_secret = %name, "all managed secrets deleted, finalizer removed");
        } else {
            self.update_status(cs, ClusterSecretState::Ready, None).await?;
        }

        Ok(())
    }

    async fn ensure_finalizer(&self, cluster_secret: &mut ClusterSecret) -> Result<(), StoreError> {
        if cluster_secret.has_finalizer() {
            return Ok(());
        }
        let mut finalizers = cluster_secret.finalizers().to_vec();
        finalizers.push(FINALIZER.to_string());
        *cluster_secret = self
            .client
            .update_cluster_secret_finalizers(cluster_secret, finalizers)
            .await?;
        debug!(cluster_secret = %cluster_secret.name_any(), "added finalizer");
        Ok(())
    }

    async fn remove_finalizer(&self, cluster_secret: &mut ClusterSecret) -> Result<(), StoreError> {
        if !cluster_secret.has_finalizer() {
            return Ok(());
        }
        let finalizers = cluster_secret
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != FINALIZER)
            .cloned()
            .collect();
        *cluster_secret = self
            .client
            .update_cluster_secret_finalizers(cluster_secret, finalizers)
            .await?;
        Ok(())
    }
}
