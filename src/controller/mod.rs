//! # Controller
//!
//! Core controller modules for the `ClusterSecret` controller.
//!
//! - `backoff`: exponential backoff for rate-limited requeues
//! - `cache`: local object caches and the informers feeding them
//! - `crdgen`: CRD generation utility
//! - `events`: work items and watch event intake
//! - `queue`: deduplicating, rate-limited work queue
//! - `reconciler`: core reconciliation logic
//! - `selector`: label selector evaluation
//! - `server`: HTTP server for metrics and health checks
//! - `store`: API server access
//! - `synchronizer`: read-your-writes barrier over the caches

pub mod backoff;
pub mod cache;
pub mod crdgen;
pub mod events;
pub mod queue;
pub mod reconciler;
pub mod selector;
pub mod server;
pub mod store;
pub mod synchronizer;
