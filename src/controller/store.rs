//! # Resource Store Access
//!
//! Writes and authoritative reads against the API server.
//!
//! [`ClusterApi`] is the seam between the reconciler and the cluster:
//! [`KubeClusterApi`] talks to a real API server, tests substitute an
//! in-memory fake. [`RecordingClient`] wraps any implementation and reports
//! every successful write to the [`Synchronizer`].

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams, Preconditions};
use kube::{Client, ResourceExt};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::constants::CONTROLLER_NAME;
use crate::controller::synchronizer::Synchronizer;
use crate::crd::{ClusterSecret, ClusterSecretStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("kubernetes API error: {0}")]
    Kube(#[source] kube::Error),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(e) if e.code == 404 => StoreError::NotFound(e.message.clone()),
            kube::Error::Api(e) if e.code == 409 => StoreError::Conflict(e.message.clone()),
            other => StoreError::Kube(other),
        }
    }
}

/// Operations the reconciler performs against the API server
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Read a `ClusterSecret`, bypassing any cache; `Ok(None)` if it does not exist
    async fn get_cluster_secret(&self, name: &str) -> Result<Option<ClusterSecret>, StoreError>;

    /// Replace the finalizers of `cluster_secret`, conditional on its resource version
    async fn update_cluster_secret_finalizers(
        &self,
        cluster_secret: &ClusterSecret,
        finalizers: Vec<String>,
    ) -> Result<ClusterSecret, StoreError>;

    /// Replace the status of `cluster_secret`, conditional on its resource version
    async fn update_cluster_secret_status(
        &self,
        cluster_secret: &ClusterSecret,
        status: &ClusterSecretStatus,
    ) -> Result<ClusterSecret, StoreError>;

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError>;

    /// Replace `secret`; its resource version is the concurrency token
    async fn update_secret(&self, secret: &Secret) -> Result<Secret, StoreError>;

    /// Delete `secret`, conditional on its uid and resource version
    async fn delete_secret(&self, secret: &Secret) -> Result<(), StoreError>;
}

/// [`ClusterApi`] backed by a kube client
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl std::fmt::Debug for KubeClusterApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterApi").finish_non_exhaustive()
    }
}

impl KubeClusterApi {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn cluster_secrets(&self) -> Api<ClusterSecret> {
        Api::all(self.client.clone())
    }

    fn secrets(&self, secret: &Secret) -> Api<Secret> {
        Api::namespaced(
            self.client.clone(),
            secret.namespace().as_deref().unwrap_or_default(),
        )
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..PostParams::default()
        }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_cluster_secret(&self, name: &str) -> Result<Option<ClusterSecret>, StoreError> {
        Ok(self.cluster_secrets().get_opt(name).await?)
    }

    async fn update_cluster_secret_finalizers(
        &self,
        cluster_secret: &ClusterSecret,
        finalizers: Vec<String>,
    ) -> Result<ClusterSecret, StoreError> {
        let patch = json!({
            "metadata": {
                "resourceVersion": cluster_secret.resource_version(),
                "finalizers": finalizers,
            }
        });
        Ok(self
            .cluster_secrets()
            .patch(
                &cluster_secret.name_any(),
                &PatchParams::apply(CONTROLLER_NAME),
                &Patch::Merge(patch),
            )
            .await?)
    }

    async fn update_cluster_secret_status(
        &self,
        cluster_secret: &ClusterSecret,
        status: &ClusterSecretStatus,
    ) -> Result<ClusterSecret, StoreError> {
        let patch = json!({
            "metadata": {
                "resourceVersion": cluster_secret.resource_version(),
            },
            "status": status,
        });
        Ok(self
            .cluster_secrets()
            .patch_status(
                &cluster_secret.name_any(),
                &PatchParams::apply(CONTROLLER_NAME),
                &Patch::Merge(patch),
            )
            .await?)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        Ok(self
            .secrets(secret)
            .create(&Self::post_params(), secret)
            .await?)
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        Ok(self
            .secrets(secret)
            .replace(&secret.name_any(), &Self::post_params(), secret)
            .await?)
    }

    async fn delete_secret(&self, secret: &Secret) -> Result<(), StoreError> {
        let params = DeleteParams {
            preconditions: Some(Preconditions {
                resource_version: secret.resource_version(),
                uid: secret.uid(),
            }),
            ..DeleteParams::default()
        };
        self.secrets(secret)
            .delete(&secret.name_any(), &params)
            .await?;
        Ok(())
    }
}

/// Store client that reports successful writes to the synchronizer
#[derive(Clone)]
pub struct RecordingClient {
    api: Arc<dyn ClusterApi>,
    synchronizer: Option<Arc<Synchronizer>>,
}

impl std::fmt::Debug for RecordingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingClient")
            .field("synchronizer", &self.synchronizer.is_some())
            .finish_non_exhaustive()
    }
}

impl RecordingClient {
    #[must_use]
    pub fn new(api: Arc<dyn ClusterApi>, synchronizer: Option<Arc<Synchronizer>>) -> Self {
        Self { api, synchronizer }
    }

    fn record_write<K: crate::controller::cache::CachedResource>(&self, obj: &K) {
        if let Some(sync) = &self.synchronizer {
            sync.record_write(obj);
        }
    }

    /// # Errors
    ///
    /// Propagates store failures other than not-found.
    pub async fn get_cluster_secret(&self, name: &str) -> Result<Option<ClusterSecret>, StoreError> {
        self.api.get_cluster_secret(name).await
    }

    /// # Errors
    ///
    /// Propagates store failures, including conflicts on a stale resource version.
    pub async fn update_cluster_secret_finalizers(
        &self,
        cluster_secret: &ClusterSecret,
        finalizers: Vec<String>,
    ) -> Result<ClusterSecret, StoreError> {
        let updated = self
            .api
            .update_cluster_secret_finalizers(cluster_secret, finalizers)
            .await?;
        // Dropping the last finalizer of a deleting object removes it
        if updated.is_deleting() && updated.finalizers().is_empty() {
            if let Some(sync) = &self.synchronizer {
                sync.record_deletion(&updated);
            }
        } else {
            self.record_write(&updated);
        }
        Ok(updated)
    }

    /// # Errors
    ///
    /// Propagates store failures, including conflicts on a stale resource version.
    pub async fn update_cluster_secret_status(
        &self,
        cluster_secret: &ClusterSecret,
        status: &ClusterSecretStatus,
    ) -> Result<ClusterSecret, StoreError> {
        let updated = self
            .api
            .update_cluster_secret_status(cluster_secret, status)
            .await?;
        self.record_write(&updated);
        Ok(updated)
    }

    /// # Errors
    ///
    /// Propagates store failures; an existing secret of the same name is a conflict.
    pub async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let created = self.api.create_secret(secret).await?;
        self.record_write(&created);
        Ok(created)
    }

    /// # Errors
    ///
    /// Propagates store failures, including conflicts on a stale resource version.
    pub async fn update_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let updated = self.api.update_secret(secret).await?;
        self.record_write(&updated);
        Ok(updated)
    }

    /// Delete `secret`; a secret that is already gone counts as deleted
    ///
    /// # Errors
    ///
    /// Propagates store failures, including precondition conflicts.
    pub async fn delete_secret(&self, secret: &Secret) -> Result<(), StoreError> {
        match self.api.delete_secret(secret).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                debug!(
                    namespace = ?secret.namespace(),
                    secret = %secret.name_any(),
                    "secret already deleted"
                );
            }
            Err(e) => return Err(e),
        }
        if let Some(sync) = &self.synchronizer {
            sync.record_deletion(secret);
        }
        Ok(())
    }
}
