//! # Local Object Cache
//!
//! Eventually-consistent mirrors of the objects the controller reads on
//! every reconcile, kept current by one watch per kind.
//!
//! The [`ObjectCache`] is the read side (cheap to clone, shared by the
//! reconciler and the synchronizer). Each [`Informer`] owns the write side of
//! one store, applies watch events to it, and reports what changed as
//! [`WatchEvent`]s *after* the store reflects the change.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::watcher;
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::constants::LABEL_KEY_NAME;
use crate::controller::events::{DeletedObject, WatchEvent};
use crate::crd::ClusterSecret;
use crate::runtime::error_policy::handle_watch_stream_error;

/// Kinds of objects the controller caches and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Namespace,
    Secret,
    ClusterSecret,
}

impl ObjectKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Namespace => "Namespace",
            ObjectKind::Secret => "Secret",
            ObjectKind::ClusterSecret => "ClusterSecret",
        }
    }
}

/// Resource types that live in the [`ObjectCache`]
pub trait CachedResource:
    Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static
{
    const KIND: ObjectKind;
}

impl CachedResource for Namespace {
    const KIND: ObjectKind = ObjectKind::Namespace;
}

impl CachedResource for Secret {
    const KIND: ObjectKind = ObjectKind::Secret;
}

impl CachedResource for ClusterSecret {
    const KIND: ObjectKind = ObjectKind::ClusterSecret;
}

/// Identity and version of a cached object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedVersion {
    pub uid: String,
    pub resource_version: String,
}

/// Read side of the local caches
#[derive(Clone)]
pub struct ObjectCache {
    namespaces: Store<Namespace>,
    secrets: Store<Secret>,
    cluster_secrets: Store<ClusterSecret>,
}

/// Write side of the local caches, one writer per kind
pub struct CacheWriters {
    pub namespaces: reflector::store::Writer<Namespace>,
    pub secrets: reflector::store::Writer<Secret>,
    pub cluster_secrets: reflector::store::Writer<ClusterSecret>,
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("namespaces", &self.namespaces.state().len())
            .field("secrets", &self.secrets.state().len())
            .field("cluster_secrets", &self.cluster_secrets.state().len())
            .finish()
    }
}

impl std::fmt::Debug for CacheWriters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWriters").finish_non_exhaustive()
    }
}

impl ObjectCache {
    /// Create empty caches together with their writers
    #[must_use]
    pub fn new() -> (Self, CacheWriters) {
        let (namespaces, namespaces_writer) = reflector::store();
        let (secrets, secrets_writer) = reflector::store();
        let (cluster_secrets, cluster_secrets_writer) = reflector::store();
        (
            Self {
                namespaces,
                secrets,
                cluster_secrets,
            },
            CacheWriters {
                namespaces: namespaces_writer,
                secrets: secrets_writer,
                cluster_secrets: cluster_secrets_writer,
            },
        )
    }

    /// Wait until every store has completed its initial list
    ///
    /// # Errors
    ///
    /// Fails if a writer was dropped before its first list completed.
    pub async fn wait_until_ready(&self) -> Result<(), reflector::store::WriterDropped> {
        self.namespaces.wait_until_ready().await?;
        self.secrets.wait_until_ready().await?;
        self.cluster_secrets.wait_until_ready().await?;
        Ok(())
    }

    #[must_use]
    pub fn namespace(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.get(&ObjectRef::new(name))
    }

    #[must_use]
    pub fn namespaces(&self) -> Vec<Arc<Namespace>> {
        self.namespaces.state()
    }

    #[must_use]
    pub fn cluster_secrets(&self) -> Vec<Arc<ClusterSecret>> {
        self.cluster_secrets.state()
    }

    /// Secrets owned by the `ClusterSecret` named `owner`, across all namespaces
    #[must_use]
    pub fn managed_secrets(&self, owner: &str) -> Vec<Arc<Secret>> {
        self.secrets
            .state()
            .into_iter()
            .filter(|s| s.labels().get(LABEL_KEY_NAME).is_some_and(|v| v == owner))
            .collect()
    }

    /// All managed secrets living in `namespace`
    #[must_use]
    pub fn managed_secrets_in_namespace(&self, namespace: &str) -> Vec<Arc<Secret>> {
        self.secrets
            .state()
            .into_iter()
            .filter(|s| {
                s.namespace().as_deref() == Some(namespace) && s.labels().contains_key(LABEL_KEY_NAME)
            })
            .collect()
    }

    /// Identity and version of a cached object, `None` if the cache does not hold it
    #[must_use]
    pub fn lookup(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<CachedVersion> {
        fn version<K: Resource<DynamicType = ()> + Clone + 'static>(
            store: &Store<K>,
            namespace: Option<&str>,
            name: &str,
        ) -> Option<CachedVersion> {
            let mut key = ObjectRef::new(name);
            if let Some(ns) = namespace {
                key = key.within(ns);
            }
            store.get(&key).map(|obj| CachedVersion {
                uid: obj.meta().uid.clone().unwrap_or_default(),
                resource_version: obj.meta().resource_version.clone().unwrap_or_default(),
            })
        }

        match kind {
            ObjectKind::Namespace => version(&self.namespaces, None, name),
            ObjectKind::Secret => version(&self.secrets, namespace, name),
            ObjectKind::ClusterSecret => version(&self.cluster_secrets, None, name),
        }
    }
}

fn cache_key<K: Resource>(obj: &K) -> String {
    match obj.meta().namespace.as_deref() {
        Some(ns) => format!("{ns}/{}", obj.name_any()),
        None => obj.name_any(),
    }
}

/// Applies watch events of one kind to its store and derives typed change events
pub struct Informer<K: CachedResource> {
    writer: reflector::store::Writer<K>,
    reader: Store<K>,
    /// Store contents when the current relist started
    relist_snapshot: Option<HashMap<ObjectRef<K>, Arc<K>>>,
    /// Objects delivered by the current relist
    relisted: Vec<ObjectRef<K>>,
}

impl<K: CachedResource> std::fmt::Debug for Informer<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Informer")
            .field("kind", &K::KIND)
            .field("relisting", &self.relist_snapshot.is_some())
            .finish_non_exhaustive()
    }
}

impl<K: CachedResource> Informer<K> {
    #[must_use]
    pub fn new(writer: reflector::store::Writer<K>) -> Self {
        let reader = writer.as_reader();
        Self {
            writer,
            reader,
            relist_snapshot: None,
            relisted: Vec::new(),
        }
    }

    /// Apply `event` to the store and return the resulting changes
    ///
    /// Relists are diffed against the previous store contents: objects that
    /// disappeared while the watch was down come back as tombstones.
    pub fn process(&mut self, event: &watcher::Event<K>) -> Vec<WatchEvent<K>> {
        match event {
            watcher::Event::Apply(obj) => {
                let key = ObjectRef::from_obj(obj);
                let old = self.reader.get(&key);
                self.writer.apply_watcher_event(event);
                let Some(new) = self.reader.get(&key) else {
                    return Vec::new();
                };
                match old {
                    Some(old) => vec![WatchEvent::Modified { old, new }],
                    None => vec![WatchEvent::Added(new)],
                }
            }
            watcher::Event::Delete(obj) => {
                let key = ObjectRef::from_obj(obj);
                let last = self.reader.get(&key).unwrap_or_else(|| Arc::new(obj.clone()));
                self.writer.apply_watcher_event(event);
                vec![WatchEvent::Deleted(DeletedObject::Live(last))]
            }
            watcher::Event::Init => {
                let snapshot = self
                    .reader
                    .state()
                    .into_iter()
                    .map(|obj| (ObjectRef::from_obj(obj.as_ref()), obj))
                    .collect();
                self.relist_snapshot = Some(snapshot);
                self.relisted.clear();
                self.writer.apply_watcher_event(event);
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                self.relisted.push(ObjectRef::from_obj(obj));
                self.writer.apply_watcher_event(event);
                Vec::new()
            }
            watcher::Event::InitDone => {
                self.writer.apply_watcher_event(event);
                let mut previous = self.relist_snapshot.take().unwrap_or_default();
                let mut changes = Vec::new();

                for key in self.relisted.drain(..) {
                    let Some(new) = self.reader.get(&key) else {
                        continue;
                    };
                    match previous.remove(&key) {
                        None => changes.push(WatchEvent::Added(new)),
                        Some(old) if old.meta().resource_version != new.meta().resource_version => {
                            changes.push(WatchEvent::Modified { old, new });
                        }
                        Some(_) => {}
                    }
                }

                for (_, gone) in previous {
                    changes.push(WatchEvent::Deleted(DeletedObject::Tombstone {
                        key: cache_key(gone.as_ref()),
                        last_known: Some(gone),
                    }));
                }

                debug!(
                    kind = K::KIND.as_str(),
                    changes = changes.len(),
                    "relist complete"
                );
                changes
            }
        }
    }

    /// Watch `api` until `cancel` fires, feeding every change to `handler`
    pub async fn run<F>(
        mut self,
        api: Api<K>,
        config: watcher::Config,
        handler: F,
        cancel: CancellationToken,
    ) where
        F: Fn(&WatchEvent<K>) + Send,
    {
        let kind = K::KIND.as_str();
        info!(kind, "starting informer");

        let stream = watcher(api, config).default_backoff();
        futures::pin_mut!(stream);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        for change in self.process(&event) {
                            handler(&change);
                        }
                    }
                    Some(Err(e)) => handle_watch_stream_error(kind, &e),
                    None => break,
                },
            }
        }

        info!(kind, "informer stopped");
    }
}

/// Watch configuration for secrets: only those carrying the ownership label
#[must_use]
pub fn managed_secrets_watch_config() -> watcher::Config {
    watcher::Config::default().labels(LABEL_KEY_NAME)
}
