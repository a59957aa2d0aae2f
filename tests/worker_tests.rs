//! # Worker Tests
//!
//! Workers pulling from the shared queue against the in-memory cluster.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{cluster_secret, template, FakeCluster, Harness};
use k8s_openapi::api::core::v1::Secret;

use clustersecret_controller::controller::reconciler::Reconciler;
use clustersecret_controller::controller::store::{ClusterApi, StoreError};
use clustersecret_controller::crd::{ClusterSecret, ClusterSecretState, ClusterSecretStatus};
use clustersecret_controller::observability::NoopEventPublisher;
use clustersecret_controller::runtime::worker::{spawn_workers, supervise};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_workers_converge_and_stop_on_cancel() {
    let h = Harness::new();
    for ns in ["ns1", "ns2", "ns3"] {
        h.cluster.create_namespace(ns, &[("env", "prod")]);
    }
    h.cluster.apply_cluster_secret(cluster_secret(
        "a",
        Some(&[("env", "prod")]),
        template(&[("k", "v")]),
    ));
    h.cluster
        .apply_cluster_secret(cluster_secret("b", None, template(&[("k", "v")])));

    let cancel = CancellationToken::new();
    let workers = spawn_workers(Arc::clone(&h.reconciler), 2, cancel.clone());

    eventually("both clustersecrets to be ready", || {
        h.cluster.state_of("a") == Some(ClusterSecretState::Ready)
            && h.cluster.state_of("b") == Some(ClusterSecretState::Ready)
    })
    .await;
    assert_eq!(h.cluster.managed_namespaces("a").len(), 3);
    assert_eq!(h.cluster.managed_namespaces("b").len(), 3);

    cancel.cancel();
    tokio::time::timeout(
        Duration::from_secs(1),
        supervise(workers, JoinSet::new(), CancellationToken::new()),
    )
    .await
    .expect("workers stop after cancel")
    .expect("no worker panicked");
}

#[tokio::test]
async fn test_failed_reconcile_is_retried_with_backoff() {
    let h = Harness::new();
    h.cluster.create_namespace("ns1", &[]);
    h.cluster
        .apply_cluster_secret(cluster_secret("r", None, template(&[("k", "v")])));
    h.drain().await;
    assert!(h.cluster.secret("ns1", "r").is_some());

    let cancel = CancellationToken::new();
    let workers = spawn_workers(Arc::clone(&h.reconciler), 1, cancel.clone());

    h.cluster.fail_deletes_of("ns1", "r");
    h.cluster.delete_cluster_secret("r");
    eventually("the failed delete to be reported", || {
        h.cluster
            .cluster_secret("r")
            .and_then(|cs| cs.status)
            .and_then(|s| s.conditions.into_iter().next())
            .and_then(|c| c.message)
            .is_some_and(|m| m.contains("error deleting secret ns1/r"))
    })
    .await;
    assert_eq!(h.cluster.state_of("r"), Some(ClusterSecretState::Deleting));

    h.cluster.clear_failures();
    eventually("the clustersecret to be removed", || {
        h.cluster.cluster_secret("r").is_none()
    })
    .await;
    assert!(h.cluster.secret("ns1", "r").is_none());

    cancel.cancel();
    supervise(workers, JoinSet::new(), CancellationToken::new())
        .await
        .expect("no worker panicked");
}

/// Hands out `ClusterSecret`s whose resource version is an opaque token
struct OpaqueVersions(Arc<FakeCluster>);

#[async_trait]
impl ClusterApi for OpaqueVersions {
    async fn get_cluster_secret(&self, name: &str) -> Result<Option<ClusterSecret>, StoreError> {
        self.0.get_cluster_secret(name).await
    }

    async fn update_cluster_secret_finalizers(
        &self,
        cluster_secret: &ClusterSecret,
        finalizers: Vec<String>,
    ) -> Result<ClusterSecret, StoreError> {
        let mut updated = self
            .0
            .update_cluster_secret_finalizers(cluster_secret, finalizers)
            .await?;
        updated.metadata.resource_version = Some("opaque-token".to_string());
        Ok(updated)
    }

    async fn update_cluster_secret_status(
        &self,
        cluster_secret: &ClusterSecret,
        status: &ClusterSecretStatus,
    ) -> Result<ClusterSecret, StoreError> {
        self.0.update_cluster_secret_status(cluster_secret, status).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        self.0.create_secret(secret).await
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        self.0.update_secret(secret).await
    }

    async fn delete_secret(&self, secret: &Secret) -> Result<(), StoreError> {
        self.0.delete_secret(secret).await
    }
}

#[tokio::test]
async fn test_non_numeric_resource_version_stops_the_workers() {
    let h = Harness::new();
    h.cluster.create_namespace("ns1", &[]);
    h.cluster
        .apply_cluster_secret(cluster_secret("r", None, template(&[("k", "v")])));
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(OpaqueVersions(Arc::clone(&h.cluster))),
        h.cache.clone(),
        Arc::clone(&h.queue),
        h.synchronizer.clone(),
        Arc::new(NoopEventPublisher),
    ));

    let cancel = CancellationToken::new();
    let workers = spawn_workers(reconciler, 2, cancel.clone());
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        supervise(workers, JoinSet::new(), CancellationToken::new()),
    )
    .await
    .expect("supervise returns without waiting for the idle worker")
    .expect_err("a panicking worker is fatal");

    assert!(err.to_string().starts_with("worker task panicked"), "{err}");
    assert!(!cancel.is_cancelled());
}
