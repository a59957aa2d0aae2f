//! # Secret Diff
//!
//! Computes the create, update and delete operations that bring the managed
//! secrets of one `ClusterSecret` to the desired set.
//!
//! Operations are keyed by `(namespace, name)` over the union of existing and
//! desired secrets:
//!
//! | existing | desired | operation |
//! |----------|---------|-----------|
//! | yes      | no      | delete    |
//! | no       | yes     | create    |
//! | yes      | yes     | update, unless already built from the current generation |
//!
//! The `source-generation` annotation is the only change signal; secret
//! contents are never compared.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::warn;

use crate::constants::{ANNOTATION_KEY_GENERATION, LABEL_KEY_NAME};
use crate::controller::selector::Selector;
use crate::crd::ClusterSecret;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecretKey {
    pub namespace: String,
    pub name: String,
}

impl SecretKey {
    fn of(secret: &Secret) -> Self {
        Self {
            namespace: secret.namespace().unwrap_or_default(),
            name: secret.name_any(),
        }
    }
}

impl std::fmt::Display for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone)]
pub enum SecretOperation {
    Create(Secret),
    /// `desired` carries the resource version of `existing`
    Update {
        existing: Arc<Secret>,
        desired: Secret,
    },
    /// Conditional on the uid and resource version of the cached secret
    Delete(Arc<Secret>),
}

impl SecretOperation {
    /// Operation name as used in metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SecretOperation::Create(_) => "create",
            SecretOperation::Update { .. } => "update",
            SecretOperation::Delete(_) => "delete",
        }
    }

    /// Progressive form, for error messages
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            SecretOperation::Create(_) => "creating",
            SecretOperation::Update { .. } => "updating",
            SecretOperation::Delete(_) => "deleting",
        }
    }
}

/// Managed secret for `cluster_secret` in `namespace`
#[must_use]
pub fn build_secret(namespace: &str, cluster_secret: &ClusterSecret) -> Secret {
    let name = cluster_secret.name_any();
    Secret {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.clone()),
            labels: Some(BTreeMap::from([(LABEL_KEY_NAME.to_string(), name)])),
            annotations: Some(BTreeMap::from([(
                ANNOTATION_KEY_GENERATION.to_string(),
                cluster_secret.generation().to_string(),
            )])),
            ..ObjectMeta::default()
        },
        type_: cluster_secret.spec.template.type_.clone(),
        data: Some(cluster_secret.spec.template.data.clone()),
        ..Secret::default()
    }
}

/// Generation recorded on a managed secret
///
/// A missing or unparseable annotation yields `None`, which marks the secret
/// as stale so the next pass rewrites it.
#[must_use]
pub fn source_generation(secret: &Secret) -> Option<i64> {
    let value = secret.annotations().get(ANNOTATION_KEY_GENERATION)?;
    match value.parse() {
        Ok(generation) => Some(generation),
        Err(_) => {
            warn!(
                namespace = ?secret.namespace(),
                secret = %secret.name_any(),
                annotation = %value,
                "unparseable source generation, treating secret as stale"
            );
            None
        }
    }
}

/// Desired secrets: one per namespace matched by `selector` that is not being deleted
#[must_use]
pub fn desired_secrets(
    cluster_secret: &ClusterSecret,
    selector: &Selector,
    namespaces: &[Arc<Namespace>],
) -> Vec<Secret> {
    namespaces
        .iter()
        .filter(|ns| ns.metadata.deletion_timestamp.is_none())
        .filter(|ns| selector.matches(ns.labels()))
        .map(|ns| build_secret(&ns.name_any(), cluster_secret))
        .collect()
}

/// Operations turning `existing` into `desired`
///
/// Pairs whose existing secret already records `generation` (or a later one)
/// produce no operation.
#[must_use]
pub fn plan_operations(
    existing: Vec<Arc<Secret>>,
    desired: Vec<Secret>,
    generation: i64,
) -> BTreeMap<SecretKey, SecretOperation> {
    let mut existing: BTreeMap<SecretKey, Arc<Secret>> = existing
        .into_iter()
        .map(|s| (SecretKey::of(&s), s))
        .collect();
    let mut operations = BTreeMap::new();

    for mut secret in desired {
        let key = SecretKey::of(&secret);
        match existing.remove(&key) {
            None => {
                operations.insert(key, SecretOperation::Create(secret));
            }
            Some(current) => {
                if source_generation(&current).is_some_and(|g| g >= generation) {
                    continue;
                }
                secret.metadata.resource_version = current.resource_version();
                operations.insert(
                    key,
                    SecretOperation::Update {
                        existing: current,
                        desired: secret,
                    },
                );
            }
        }
    }

    for (key, current) in existing {
        operations.insert(key, SecretOperation::Delete(current));
    }

    operations
}
