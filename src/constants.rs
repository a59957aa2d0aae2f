//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Name the controller reports as, and the finalizer it places on every `ClusterSecret`
///
/// The admission webhook refers to the same string, so it must never change.
pub const CONTROLLER_NAME: &str = "clustersecret-operator.cs.sap.com";

/// Finalizer gating physical deletion of a `ClusterSecret`
pub const FINALIZER: &str = CONTROLLER_NAME;

/// Label on every managed `Secret`, value is the owning `ClusterSecret` name
pub const LABEL_KEY_NAME: &str = "clustersecrets.core.cs.sap.com/name";

/// Annotation on every managed `Secret`, value is the `ClusterSecret` generation it was built from
pub const ANNOTATION_KEY_GENERATION: &str = "clustersecrets.core.cs.sap.com/generation";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default number of reconcile workers
pub const DEFAULT_WORKER_COUNT: usize = 3;

/// Default per-item exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 5;

/// Default per-item exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 1_000_000;

/// Default lease name used for leader election
pub const DEFAULT_LEASE_NAME: &str = "clustersecret-operator";

/// Default lease duration (seconds)
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 15;

/// Default lease renew interval while leading (seconds)
pub const DEFAULT_LEASE_RENEW_INTERVAL_SECS: u64 = 2;

/// Default retry interval while waiting for leadership (seconds)
pub const DEFAULT_LEASE_RETRY_INTERVAL_SECS: u64 = 2;

/// Namespace file mounted into every pod with a service account token
pub const SERVICE_ACCOUNT_NAMESPACE_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";
