//! # Worker Pool
//!
//! Wires the informers, the work queue and a fixed pool of reconcile workers
//! together.
//!
//! Shutdown order on cancellation:
//! 1. the queue is shut down, so event intake stops and no new keys are handed out
//! 2. every worker finishes the key it holds and exits
//! 3. the informers stop once no worker can still be waiting on the caches
//!
//! A panicking worker or informer is fatal: [`supervise`] returns an error at
//! once and the remaining tasks are aborted.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::{Api, Client};
use kube_runtime::watcher;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::controller::cache::{
    managed_secrets_watch_config, CachedResource, Informer, ObjectCache,
};
use crate::controller::events::{
    cluster_secret_work_item, namespace_work_item, WatchEvent, WorkItem,
};
use crate::controller::queue::WorkQueue;
use crate::controller::reconciler::Reconciler;
use crate::controller::store::KubeClusterApi;
use crate::controller::synchronizer::Synchronizer;
use crate::crd::ClusterSecret;
use crate::observability::{metrics, EventPublisher};
use crate::runtime::error_policy::handle_reconciliation_error;

/// Running controller: informers plus worker pool
pub struct Controller {
    queue: Arc<WorkQueue<WorkItem>>,
    workers: JoinSet<()>,
    informers: JoinSet<()>,
    informer_cancel: CancellationToken,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("workers", &self.workers.len())
            .field("informers", &self.informers.len())
            .field("queue_depth", &self.queue.len())
            .finish()
    }
}

/// Queue `item`, keeping the depth gauge current
fn enqueue(queue: &WorkQueue<WorkItem>, item: WorkItem) {
    queue.add(item);
    metrics::set_workqueue_depth(queue.len());
}

fn spawn_informer<K, F>(
    api: Api<K>,
    config: watcher::Config,
    writer: kube::runtime::reflector::store::Writer<K>,
    synchronizer: Option<Arc<Synchronizer>>,
    intake: F,
    cancel: CancellationToken,
    tasks: &mut JoinSet<()>,
) where
    K: CachedResource,
    F: Fn(&WatchEvent<K>) + Send + 'static,
{
    let handler = move |event: &WatchEvent<K>| {
        if let Some(sync) = &synchronizer {
            sync.signal();
        }
        intake(event);
    };
    tasks.spawn(Informer::new(writer).run(api, config, handler, cancel));
}

impl Controller {
    /// Start informers for namespaces, managed secrets and `ClusterSecret`s,
    /// wait for the caches to fill, then start the worker pool
    ///
    /// Returns early without workers if `cancel` fires while the caches are filling.
    ///
    /// # Errors
    ///
    /// Fails if an informer stops before its cache completed the initial list.
    pub async fn start(
        client: Client,
        config: &ControllerConfig,
        events: Arc<dyn EventPublisher>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let (cache, writers) = ObjectCache::new();
        let queue = Arc::new(WorkQueue::new(
            config.backoff_start_duration(),
            config.backoff_max_duration(),
        ));
        let synchronizer = config
            .enable_synchronizer
            .then(|| Arc::new(Synchronizer::new(cache.clone())));
        let informer_cancel = CancellationToken::new();

        info!(
            workers = config.worker_count,
            synchronizer = synchronizer.is_some(),
            "Starting controller"
        );

        let namespace_queue = Arc::clone(&queue);
        let cluster_secret_queue = Arc::clone(&queue);
        let mut informers = JoinSet::new();
        spawn_informer(
            Api::<Namespace>::all(client.clone()),
            watcher::Config::default(),
            writers.namespaces,
            synchronizer.clone(),
            move |event| {
                if let Some(item) = namespace_work_item(event) {
                    enqueue(&namespace_queue, item);
                }
            },
            informer_cancel.clone(),
            &mut informers,
        );
        spawn_informer(
            Api::<Secret>::all(client.clone()),
            managed_secrets_watch_config(),
            writers.secrets,
            synchronizer.clone(),
            |_event| {},
            informer_cancel.clone(),
            &mut informers,
        );
        spawn_informer(
            Api::<ClusterSecret>::all(client.clone()),
            watcher::Config::default(),
            writers.cluster_secrets,
            synchronizer.clone(),
            move |event| {
                if let Some(item) = cluster_secret_work_item(event) {
                    enqueue(&cluster_secret_queue, item);
                }
            },
            informer_cancel.clone(),
            &mut informers,
        );

        let mut controller = Self {
            queue: Arc::clone(&queue),
            workers: JoinSet::new(),
            informers,
            informer_cancel,
        };

        info!("Waiting for caches to sync...");
        tokio::select! {
            () = cancel.cancelled() => {
                warn!("Cancelled before caches synced");
                queue.shut_down();
                return Ok(controller);
            }
            ready = cache.wait_until_ready() => {
                ready.context("Informer stopped before its cache synced")?;
            }
        }
        info!("Caches synced");

        let reconciler = Arc::new(Reconciler::new(
            Arc::new(KubeClusterApi::new(client)),
            cache,
            Arc::clone(&queue),
            synchronizer,
            events,
        ));
        controller.workers = spawn_workers(reconciler, config.worker_count, cancel);
        Ok(controller)
    }

    /// Block until every worker has exited, then stop the informers
    ///
    /// # Errors
    ///
    /// Fails as soon as any worker or informer panics.
    pub async fn wait(self) -> Result<()> {
        supervise(self.workers, self.informers, self.informer_cancel).await
    }
}

fn check_joined(joined: Result<(), JoinError>, task: &str) -> Result<()> {
    match joined {
        Ok(()) => Ok(()),
        Err(e) if e.is_panic() => {
            error!(task, "task panicked, stopping controller");
            Err(anyhow!("{task} task panicked: {e}"))
        }
        Err(e) => {
            warn!(task, error = %e, "task did not complete");
            Ok(())
        }
    }
}

/// Wait for the workers to exit, then cancel and join the informers
///
/// Dropping the sets on an early return aborts every task still running.
///
/// # Errors
///
/// Returns on the first panicking worker or informer without waiting for the rest.
pub async fn supervise(
    mut workers: JoinSet<()>,
    mut informers: JoinSet<()>,
    informer_cancel: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            joined = workers.join_next() => match joined {
                Some(joined) => check_joined(joined, "worker")?,
                None => break,
            },
            Some(joined) = informers.join_next() => check_joined(joined, "informer")?,
        }
    }

    informer_cancel.cancel();
    while let Some(joined) = informers.join_next().await {
        check_joined(joined, "informer")?;
    }
    info!("Controller stopped");
    Ok(())
}

/// Spawn `count` workers sharing the reconciler's queue
///
/// The queue is shut down once `cancel` fires.
#[must_use]
pub fn spawn_workers(
    reconciler: Arc<Reconciler>,
    count: usize,
    cancel: CancellationToken,
) -> JoinSet<()> {
    let queue = Arc::clone(&reconciler.queue);
    tokio::spawn(async move {
        cancel.cancelled().await;
        info!("Shutting down work queue");
        queue.shut_down();
    });

    let mut workers = JoinSet::new();
    for id in 0..count.max(1) {
        workers.spawn(run_worker(id, Arc::clone(&reconciler)));
    }
    workers
}

/// Process keys until the queue shuts down
pub async fn run_worker(id: usize, reconciler: Arc<Reconciler>) {
    let queue = Arc::clone(&reconciler.queue);
    debug!(worker = id, "worker started");

    while let Some(item) = queue.get().await {
        metrics::set_workqueue_depth(queue.len());
        match reconciler.reconcile(&item).await {
            Ok(()) => queue.forget(&item),
            Err(e) => handle_reconciliation_error(&item, &e, &queue),
        }
        queue.done(&item);
    }

    debug!(worker = id, "worker stopped");
}
