//! Common test utilities for the controller integration tests
//!
//! [`FakeCluster`] is an in-memory API server: it assigns uids and numeric
//! resource versions, enforces optimistic concurrency, and feeds every change
//! into the controller's caches through the real informers. Watch delivery can
//! be held back to simulate a lagging cache.

#![allow(dead_code, reason = "not every test binary uses every helper")]

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, Time};
use k8s_openapi::ByteString;
use kube::runtime::events::EventType;
use kube::runtime::watcher;
use kube::ResourceExt;

use clustersecret_controller::constants::{ANNOTATION_KEY_GENERATION, LABEL_KEY_NAME};
use clustersecret_controller::controller::cache::{CacheWriters, Informer, ObjectCache};
use clustersecret_controller::controller::events::{
    cluster_secret_work_item, namespace_work_item, WorkItem,
};
use clustersecret_controller::controller::queue::WorkQueue;
use clustersecret_controller::controller::reconciler::{Reconciler, ReconcilerError};
use clustersecret_controller::controller::store::{ClusterApi, StoreError};
use clustersecret_controller::controller::synchronizer::Synchronizer;
use clustersecret_controller::crd::{
    ClusterSecret, ClusterSecretSpec, ClusterSecretState, ClusterSecretStatus, SecretTemplate,
};
use clustersecret_controller::observability::EventPublisher;

/// Store write performed through [`ClusterApi`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    CreateSecret { namespace: String, name: String },
    UpdateSecret { namespace: String, name: String },
    DeleteSecret { namespace: String, name: String },
    Finalizers(String),
    Status(String),
}

impl Write {
    #[must_use]
    pub fn is_secret_write(&self) -> bool {
        matches!(
            self,
            Write::CreateSecret { .. } | Write::UpdateSecret { .. } | Write::DeleteSecret { .. }
        )
    }
}

type SecretKey = (String, String);

#[derive(Default)]
struct ClusterState {
    namespaces: BTreeMap<String, Namespace>,
    secrets: BTreeMap<SecretKey, Secret>,
    cluster_secrets: BTreeMap<String, ClusterSecret>,
    next_version: u64,
    next_uid: u64,
    writes: Vec<Write>,
    failing_deletes: HashSet<SecretKey>,
}

impl ClusterState {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn new_uid(&mut self) -> String {
        self.next_uid += 1;
        format!("uid-{}", self.next_uid)
    }
}

enum PendingEvent {
    Namespace(watcher::Event<Namespace>),
    Secret(watcher::Event<Secret>),
    ClusterSecret(watcher::Event<ClusterSecret>),
}

struct WatchFeed {
    namespaces: Informer<Namespace>,
    secrets: Informer<Secret>,
    cluster_secrets: Informer<ClusterSecret>,
    held: bool,
    pending: VecDeque<PendingEvent>,
    queue: Arc<WorkQueue<WorkItem>>,
    synchronizer: Option<Arc<Synchronizer>>,
}

impl WatchFeed {
    fn deliver(&mut self, event: PendingEvent) {
        match event {
            PendingEvent::Namespace(event) => {
                for change in self.namespaces.process(&event) {
                    if let Some(item) = namespace_work_item(&change) {
                        self.queue.add(item);
                    }
                }
            }
            PendingEvent::Secret(event) => {
                self.secrets.process(&event);
            }
            PendingEvent::ClusterSecret(event) => {
                for change in self.cluster_secrets.process(&event) {
                    if let Some(item) = cluster_secret_work_item(&change) {
                        self.queue.add(item);
                    }
                }
            }
        }
        if let Some(sync) = &self.synchronizer {
            sync.signal();
        }
    }
}

/// In-memory API server feeding the controller's caches
pub struct FakeCluster {
    state: Mutex<ClusterState>,
    feed: Mutex<WatchFeed>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn deletion_timestamp() -> Time {
    serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z"))
        .expect("valid timestamp")
}

fn secret_key(secret: &Secret) -> SecretKey {
    (
        secret.namespace().expect("secret has a namespace"),
        secret.name_any(),
    )
}

impl FakeCluster {
    fn new(
        cache_writers: CacheWriters,
        queue: Arc<WorkQueue<WorkItem>>,
        synchronizer: Option<Arc<Synchronizer>>,
    ) -> Self {
        let mut feed = WatchFeed {
            namespaces: Informer::new(cache_writers.namespaces),
            secrets: Informer::new(cache_writers.secrets),
            cluster_secrets: Informer::new(cache_writers.cluster_secrets),
            held: false,
            pending: VecDeque::new(),
            queue,
            synchronizer,
        };
        // Mark every store as listed
        feed.namespaces.process(&watcher::Event::Init);
        feed.namespaces.process(&watcher::Event::InitDone);
        feed.secrets.process(&watcher::Event::Init);
        feed.secrets.process(&watcher::Event::InitDone);
        feed.cluster_secrets.process(&watcher::Event::Init);
        feed.cluster_secrets.process(&watcher::Event::InitDone);

        Self {
            state: Mutex::new(ClusterState::default()),
            feed: Mutex::new(feed),
        }
    }

    fn emit(&self, event: PendingEvent) {
        let mut feed = lock(&self.feed);
        if feed.held {
            feed.pending.push_back(event);
        } else {
            feed.deliver(event);
        }
    }

    fn emit_secret(&self, event: watcher::Event<Secret>) {
        // The secret watch only sees managed secrets
        let managed = match &event {
            watcher::Event::Apply(s) | watcher::Event::Delete(s) => {
                s.labels().contains_key(LABEL_KEY_NAME)
            }
            _ => true,
        };
        if managed {
            self.emit(PendingEvent::Secret(event));
        }
    }

    // ---- watch control ----

    /// Queue watch events instead of delivering them
    pub fn hold_watch_events(&self) {
        lock(&self.feed).held = true;
    }

    /// Deliver every held event and resume immediate delivery
    pub fn release_watch_events(&self) {
        let mut feed = lock(&self.feed);
        feed.held = false;
        while let Some(event) = feed.pending.pop_front() {
            feed.deliver(event);
        }
    }

    /// Deliver the oldest held event; returns false if none was held
    pub fn deliver_next_event(&self) -> bool {
        let mut feed = lock(&self.feed);
        match feed.pending.pop_front() {
            Some(event) => {
                feed.deliver(event);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn held_events(&self) -> usize {
        lock(&self.feed).pending.len()
    }

    // ---- out-of-band changes (not recorded as controller writes) ----

    pub fn create_namespace(&self, name: &str, labels: &[(&str, &str)]) {
        let mut state = lock(&self.state);
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                uid: Some(state.new_uid()),
                resource_version: Some(state.bump_version()),
                labels: Some(string_map(labels)),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        state.namespaces.insert(name.to_string(), namespace.clone());
        drop(state);
        self.emit(PendingEvent::Namespace(watcher::Event::Apply(namespace)));
    }

    pub fn set_namespace_labels(&self, name: &str, labels: &[(&str, &str)]) {
        let mut state = lock(&self.state);
        let version = state.bump_version();
        let namespace = state.namespaces.get_mut(name).expect("namespace exists");
        namespace.metadata.labels = Some(string_map(labels));
        namespace.metadata.resource_version = Some(version);
        let namespace = namespace.clone();
        drop(state);
        self.emit(PendingEvent::Namespace(watcher::Event::Apply(namespace)));
    }

    /// Put `name` into the terminating phase
    pub fn terminate_namespace(&self, name: &str) {
        let mut state = lock(&self.state);
        let version = state.bump_version();
        let namespace = state.namespaces.get_mut(name).expect("namespace exists");
        namespace.metadata.deletion_timestamp = Some(deletion_timestamp());
        namespace.metadata.resource_version = Some(version);
        let namespace = namespace.clone();
        drop(state);
        self.emit(PendingEvent::Namespace(watcher::Event::Apply(namespace)));
    }

    /// Create or edit a `ClusterSecret`; spec changes bump the generation
    pub fn apply_cluster_secret(&self, cluster_secret: ClusterSecret) {
        let name = cluster_secret.name_any();
        let mut state = lock(&self.state);
        let version = state.bump_version();
        let updated = match state.cluster_secrets.get(&name).cloned() {
            Some(mut current) => {
                if current.spec != cluster_secret.spec {
                    current.metadata.generation = Some(current.generation() + 1);
                    current.spec = cluster_secret.spec;
                }
                current.metadata.resource_version = Some(version);
                current
            }
            None => {
                let mut created = cluster_secret;
                created.metadata.uid = Some(state.new_uid());
                created.metadata.generation = Some(1);
                created.metadata.resource_version = Some(version);
                created
            }
        };
        state.cluster_secrets.insert(name, updated.clone());
        drop(state);
        self.emit(PendingEvent::ClusterSecret(watcher::Event::Apply(updated)));
    }

    /// Request deletion; the object stays until its finalizers are gone
    pub fn delete_cluster_secret(&self, name: &str) {
        let mut state = lock(&self.state);
        let Some(mut current) = state.cluster_secrets.get(name).cloned() else {
            return;
        };
        if current.finalizers().is_empty() {
            state.cluster_secrets.remove(name);
            drop(state);
            self.emit(PendingEvent::ClusterSecret(watcher::Event::Delete(current)));
            return;
        }
        // The API server bumps the generation of objects held back by finalizers
        current.metadata.deletion_timestamp = Some(deletion_timestamp());
        current.metadata.generation = Some(current.generation() + 1);
        current.metadata.resource_version = Some(state.bump_version());
        state.cluster_secrets.insert(name.to_string(), current.clone());
        drop(state);
        self.emit(PendingEvent::ClusterSecret(watcher::Event::Apply(current)));
    }

    /// Write a secret directly, as another actor would
    pub fn put_secret(&self, mut secret: Secret) {
        let mut state = lock(&self.state);
        let key = secret_key(&secret);
        secret.metadata.uid = state
            .secrets
            .get(&key)
            .and_then(|s| s.metadata.uid.clone())
            .or_else(|| Some(state.new_uid()));
        secret.metadata.resource_version = Some(state.bump_version());
        state.secrets.insert(key, secret.clone());
        drop(state);
        self.emit_secret(watcher::Event::Apply(secret));
    }

    /// Make every delete of `namespace/name` fail
    pub fn fail_deletes_of(&self, namespace: &str, name: &str) {
        lock(&self.state)
            .failing_deletes
            .insert((namespace.to_string(), name.to_string()));
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failing_deletes.clear();
    }

    // ---- inspection ----

    #[must_use]
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        lock(&self.state)
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Namespaces holding a secret owned by `owner`
    #[must_use]
    pub fn managed_namespaces(&self, owner: &str) -> BTreeSet<String> {
        lock(&self.state)
            .secrets
            .values()
            .filter(|s| s.labels().get(LABEL_KEY_NAME).is_some_and(|v| v == owner))
            .filter_map(ResourceExt::namespace)
            .collect()
    }

    #[must_use]
    pub fn cluster_secret(&self, name: &str) -> Option<ClusterSecret> {
        lock(&self.state).cluster_secrets.get(name).cloned()
    }

    #[must_use]
    pub fn state_of(&self, name: &str) -> Option<ClusterSecretState> {
        self.cluster_secret(name).and_then(|cs| cs.state())
    }

    #[must_use]
    pub fn writes(&self) -> Vec<Write> {
        lock(&self.state).writes.clone()
    }

    #[must_use]
    pub fn secret_writes(&self) -> Vec<Write> {
        self.writes()
            .into_iter()
            .filter(Write::is_secret_write)
            .collect()
    }

    pub fn clear_writes(&self) {
        lock(&self.state).writes.clear();
    }

    fn conflict(kind: &str, name: &str) -> StoreError {
        StoreError::Conflict(format!(
            "Operation cannot be fulfilled on {kind} \"{name}\": the object has been modified"
        ))
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_cluster_secret(&self, name: &str) -> Result<Option<ClusterSecret>, StoreError> {
        Ok(self.cluster_secret(name))
    }

    async fn update_cluster_secret_finalizers(
        &self,
        cluster_secret: &ClusterSecret,
        finalizers: Vec<String>,
    ) -> Result<ClusterSecret, StoreError> {
        let name = cluster_secret.name_any();
        let mut state = lock(&self.state);
        let Some(mut current) = state.cluster_secrets.get(&name).cloned() else {
            return Err(StoreError::NotFound(name));
        };
        if current.metadata.resource_version != cluster_secret.metadata.resource_version {
            return Err(Self::conflict("clustersecrets", &name));
        }
        current.metadata.finalizers = Some(finalizers);
        current.metadata.resource_version = Some(state.bump_version());
        state.writes.push(Write::Finalizers(name.clone()));

        let removed = current.is_deleting() && current.finalizers().is_empty();
        if removed {
            state.cluster_secrets.remove(&name);
        } else {
            state.cluster_secrets.insert(name, current.clone());
        }
        drop(state);

        let event = if removed {
            watcher::Event::Delete(current.clone())
        } else {
            watcher::Event::Apply(current.clone())
        };
        self.emit(PendingEvent::ClusterSecret(event));
        Ok(current)
    }

    async fn update_cluster_secret_status(
        &self,
        cluster_secret: &ClusterSecret,
        status: &ClusterSecretStatus,
    ) -> Result<ClusterSecret, StoreError> {
        let name = cluster_secret.name_any();
        let mut state = lock(&self.state);
        let Some(mut current) = state.cluster_secrets.get(&name).cloned() else {
            return Err(StoreError::NotFound(name));
        };
        if current.metadata.resource_version != cluster_secret.metadata.resource_version {
            return Err(Self::conflict("clustersecrets", &name));
        }
        current.status = Some(status.clone());
        current.metadata.resource_version = Some(state.bump_version());
        state.writes.push(Write::Status(name.clone()));
        state.cluster_secrets.insert(name, current.clone());
        drop(state);

        self.emit(PendingEvent::ClusterSecret(watcher::Event::Apply(
            current.clone(),
        )));
        Ok(current)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let key = secret_key(secret);
        let mut state = lock(&self.state);
        if state.secrets.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "secrets \"{}\" already exists",
                key.1
            )));
        }
        let mut created = secret.clone();
        created.metadata.uid = Some(state.new_uid());
        created.metadata.resource_version = Some(state.bump_version());
        state.writes.push(Write::CreateSecret {
            namespace: key.0.clone(),
            name: key.1.clone(),
        });
        state.secrets.insert(key, created.clone());
        drop(state);

        self.emit_secret(watcher::Event::Apply(created.clone()));
        Ok(created)
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let key = secret_key(secret);
        let mut state = lock(&self.state);
        let Some(current) = state.secrets.get(&key).cloned() else {
            return Err(StoreError::NotFound(format!("{}/{}", key.0, key.1)));
        };
        if current.metadata.resource_version != secret.metadata.resource_version {
            return Err(Self::conflict("secrets", &key.1));
        }
        let mut updated = secret.clone();
        updated.metadata.uid = current.metadata.uid.clone();
        updated.metadata.resource_version = Some(state.bump_version());
        state.writes.push(Write::UpdateSecret {
            namespace: key.0.clone(),
            name: key.1.clone(),
        });
        state.secrets.insert(key, updated.clone());
        drop(state);

        self.emit_secret(watcher::Event::Apply(updated.clone()));
        Ok(updated)
    }

    async fn delete_secret(&self, secret: &Secret) -> Result<(), StoreError> {
        let key = secret_key(secret);
        let mut state = lock(&self.state);
        if state.failing_deletes.contains(&key) {
            return Err(StoreError::Conflict(format!(
                "injected failure deleting {}/{}",
                key.0, key.1
            )));
        }
        let Some(current) = state.secrets.get(&key).cloned() else {
            return Err(StoreError::NotFound(format!("{}/{}", key.0, key.1)));
        };
        if current.metadata.uid != secret.metadata.uid
            || current.metadata.resource_version != secret.metadata.resource_version
        {
            return Err(Self::conflict("secrets", &key.1));
        }
        state.writes.push(Write::DeleteSecret {
            namespace: key.0.clone(),
            name: key.1.clone(),
        });
        state.secrets.remove(&key);
        drop(state);

        self.emit_secret(watcher::Event::Delete(current));
        Ok(())
    }
}

/// Event captured by [`RecordingEventPublisher`]
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub object: String,
    pub warning: bool,
    pub reason: String,
    pub note: Option<String>,
}

/// Event publisher that keeps every event in memory
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        lock(&self.events).clone()
    }

    #[must_use]
    pub fn reasons_for(&self, object: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.object == object)
            .map(|e| e.reason)
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        lock(&self.events).push(RecordedEvent {
            object: resource_ref.name.clone().unwrap_or_default(),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            note,
        });
    }
}

/// Reconciler wired to a [`FakeCluster`]
pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub cache: ObjectCache,
    pub queue: Arc<WorkQueue<WorkItem>>,
    pub synchronizer: Option<Arc<Synchronizer>>,
    pub events: Arc<RecordingEventPublisher>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    /// Harness whose reconciles wait for the caches to catch up
    #[must_use]
    pub fn new() -> Self {
        Self::build(true)
    }

    #[must_use]
    pub fn without_synchronizer() -> Self {
        Self::build(false)
    }

    fn build(with_synchronizer: bool) -> Self {
        let (cache, writers) = ObjectCache::new();
        let queue = Arc::new(WorkQueue::new(
            std::time::Duration::from_millis(5),
            std::time::Duration::from_secs(1),
        ));
        let synchronizer =
            with_synchronizer.then(|| Arc::new(Synchronizer::new(cache.clone())));
        let cluster = Arc::new(FakeCluster::new(
            writers,
            Arc::clone(&queue),
            synchronizer.clone(),
        ));
        let events = Arc::new(RecordingEventPublisher::default());
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&cluster) as Arc<dyn ClusterApi>,
            cache.clone(),
            Arc::clone(&queue),
            synchronizer.clone(),
            Arc::clone(&events) as Arc<dyn EventPublisher>,
        ));
        Self {
            cluster,
            cache,
            queue,
            synchronizer,
            events,
            reconciler,
        }
    }

    pub async fn reconcile(&self, name: &str) -> Result<(), ReconcilerError> {
        self.reconciler.reconcile_cluster_secret(name).await
    }

    /// Process queued keys until the queue is empty; returns the keys processed
    pub async fn drain(&self) -> Vec<WorkItem> {
        let mut processed = Vec::new();
        while !self.queue.is_empty() {
            assert!(processed.len() < 1000, "queue did not drain");
            let Some(item) = self.queue.get().await else {
                break;
            };
            if self.reconciler.reconcile(&item).await.is_ok() {
                self.queue.forget(&item);
            }
            self.queue.done(&item);
            processed.push(item);
        }
        processed
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

// ---- builders ----

#[must_use]
pub fn string_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[must_use]
pub fn template(pairs: &[(&str, &str)]) -> SecretTemplate {
    SecretTemplate {
        type_: Some("Opaque".to_string()),
        data: pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
            .collect(),
        string_data: None,
    }
}

#[must_use]
pub fn cluster_secret(
    name: &str,
    selector: Option<&[(&str, &str)]>,
    template: SecretTemplate,
) -> ClusterSecret {
    ClusterSecret::new(
        name,
        ClusterSecretSpec {
            namespace_selector: selector.map(|labels| LabelSelector {
                match_labels: Some(string_map(labels)),
                match_expressions: None,
            }),
            template,
        },
    )
}

/// Data of a stored secret as UTF-8 strings
#[must_use]
pub fn secret_data(secret: &Secret) -> BTreeMap<String, String> {
    secret
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(&v.0).into_owned()))
        .collect()
}

#[must_use]
pub fn source_generation(secret: &Secret) -> Option<String> {
    secret.annotations().get(ANNOTATION_KEY_GENERATION).cloned()
}
