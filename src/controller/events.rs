//! # Event Intake
//!
//! Turns watch events into work queue keys.
//!
//! - Namespace added or modified: `WorkItem::Namespace`. Deletions are ignored,
//!   the API server removes a namespace's secrets together with it.
//! - `ClusterSecret` added: `WorkItem::ClusterSecret`.
//! - `ClusterSecret` modified: only when `metadata.generation` changed, so
//!   status writes do not re-trigger reconciliation.
//! - `ClusterSecret` deleted: always, recovering the name from the tombstone
//!   when the live object is gone.

use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tracing::debug;

use crate::crd::ClusterSecret;

/// Reconciliation key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkItem {
    /// A namespace whose labels may have changed
    Namespace(String),
    /// A `ClusterSecret` whose managed secrets must be brought up to date
    ClusterSecret(String),
}

impl WorkItem {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            WorkItem::Namespace(_) => "namespace",
            WorkItem::ClusterSecret(_) => "clustersecret",
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            WorkItem::Namespace(name) | WorkItem::ClusterSecret(name) => name,
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind(), self.name())
    }
}

/// Change observed on a watched object, delivered after the local cache was updated
#[derive(Debug, Clone)]
pub enum WatchEvent<K> {
    Added(Arc<K>),
    Modified { old: Arc<K>, new: Arc<K> },
    Deleted(DeletedObject<K>),
}

/// Object carried by a delete event
#[derive(Debug, Clone)]
pub enum DeletedObject<K> {
    /// The delete itself was observed
    Live(Arc<K>),
    /// The object vanished while the watch was down; only its last cached state is known
    Tombstone {
        /// Cache key (`namespace/name` or `name`)
        key: String,
        last_known: Option<Arc<K>>,
    },
}

impl<K> DeletedObject<K> {
    /// The deleted object's last known state
    ///
    /// # Panics
    ///
    /// Panics on a tombstone without a last known state; the informer always
    /// attaches one, so its absence means cache corruption.
    #[must_use]
    pub fn object(&self) -> &Arc<K> {
        match self {
            DeletedObject::Live(obj) => obj,
            DeletedObject::Tombstone {
                key,
                last_known: Some(obj),
            } => {
                debug!(key = %key, "recovered deleted object from tombstone");
                obj
            }
            DeletedObject::Tombstone {
                key,
                last_known: None,
            } => panic!("malformed tombstone for {key}: no last known state"),
        }
    }
}

/// Work item for a namespace event
#[must_use]
pub fn namespace_work_item(event: &WatchEvent<Namespace>) -> Option<WorkItem> {
    match event {
        WatchEvent::Added(ns) | WatchEvent::Modified { new: ns, .. } => {
            Some(WorkItem::Namespace(ns.name_any()))
        }
        WatchEvent::Deleted(_) => None,
    }
}

/// Work item for a `ClusterSecret` event
#[must_use]
pub fn cluster_secret_work_item(event: &WatchEvent<ClusterSecret>) -> Option<WorkItem> {
    match event {
        WatchEvent::Added(cs) => Some(WorkItem::ClusterSecret(cs.name_any())),
        WatchEvent::Modified { old, new } => {
            if old.metadata.generation == new.metadata.generation {
                debug!(
                    cluster_secret = %new.name_any(),
                    "generation unchanged, ignoring update"
                );
                None
            } else {
                Some(WorkItem::ClusterSecret(new.name_any()))
            }
        }
        WatchEvent::Deleted(deleted) => Some(WorkItem::ClusterSecret(deleted.object().name_any())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ClusterSecretSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn namespace(name: &str) -> Arc<Namespace> {
        Arc::new(Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        })
    }

    fn cluster_secret(name: &str, generation: i64, rv: &str) -> Arc<ClusterSecret> {
        let mut cs = ClusterSecret::new(name, ClusterSecretSpec::default());
        cs.metadata.generation = Some(generation);
        cs.metadata.resource_version = Some(rv.to_string());
        Arc::new(cs)
    }

    mod namespace_tests {
        use super::*;

        #[test]
        fn test_add_and_update_enqueue() {
            let ns = namespace("ns1");
            assert_eq!(
                namespace_work_item(&WatchEvent::Added(Arc::clone(&ns))),
                Some(WorkItem::Namespace("ns1".into()))
            );
            assert_eq!(
                namespace_work_item(&WatchEvent::Modified {
                    old: Arc::clone(&ns),
                    new: ns
                }),
                Some(WorkItem::Namespace("ns1".into()))
            );
        }

        #[test]
        fn test_delete_is_ignored() {
            let event = WatchEvent::Deleted(DeletedObject::Live(namespace("ns1")));
            assert_eq!(namespace_work_item(&event), None);
        }
    }

    mod cluster_secret_tests {
        use super::*;

        #[test]
        fn test_status_only_update_is_ignored() {
            let event = WatchEvent::Modified {
                old: cluster_secret("r", 1, "10"),
                new: cluster_secret("r", 1, "11"),
            };
            assert_eq!(cluster_secret_work_item(&event), None);
        }

        #[test]
        fn test_generation_bump_enqueues() {
            let event = WatchEvent::Modified {
                old: cluster_secret("r", 1, "10"),
                new: cluster_secret("r", 2, "12"),
            };
            assert_eq!(
                cluster_secret_work_item(&event),
                Some(WorkItem::ClusterSecret("r".into()))
            );
        }

        #[test]
        fn test_delete_recovers_name_from_tombstone() {
            let event = WatchEvent::Deleted(DeletedObject::Tombstone {
                key: "r".into(),
                last_known: Some(cluster_secret("r", 4, "20")),
            });
            assert_eq!(
                cluster_secret_work_item(&event),
                Some(WorkItem::ClusterSecret("r".into()))
            );
        }

        #[test]
        #[should_panic(expected = "malformed tombstone")]
        fn test_tombstone_without_object_panics() {
            let event: WatchEvent<ClusterSecret> = WatchEvent::Deleted(DeletedObject::Tombstone {
                key: "r".into(),
                last_known: None,
            });
            let _ = cluster_secret_work_item(&event);
        }
    }

    #[test]
    fn test_work_item_display() {
        assert_eq!(
            WorkItem::ClusterSecret("r".into()).to_string(),
            "clustersecret/r"
        );
        assert_eq!(WorkItem::Namespace("ns1".into()).name(), "ns1");
    }
}
