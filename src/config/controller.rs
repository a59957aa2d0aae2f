//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use super::{env_var_non_empty, env_var_or_default, env_var_or_default_bool};
use crate::constants::{
    DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_START_MS, DEFAULT_LEASE_DURATION_SECS,
    DEFAULT_LEASE_NAME, DEFAULT_LEASE_RENEW_INTERVAL_SECS, DEFAULT_LEASE_RETRY_INTERVAL_SECS,
    DEFAULT_WORKER_COUNT,
};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of reconcile workers pulling from the work queue
    pub worker_count: usize,
    /// Per-item exponential backoff starting value (milliseconds)
    /// Delay before the first retry of a failed key
    pub backoff_start_ms: u64,
    /// Per-item exponential backoff maximum value (milliseconds)
    pub backoff_max_ms: u64,
    /// Block every reconcile until the local caches reflect this process' own writes
    pub enable_synchronizer: bool,
    /// Namespace the controller runs in (used as the lease namespace fallback)
    pub controller_namespace: Option<String>,
    /// Name of the lease used for leader election
    pub lease_name: String,
    /// How long a lease stays valid without renewal (seconds)
    pub lease_duration_secs: u64,
    /// How often the leader renews its lease (seconds)
    pub lease_renew_interval_secs: u64,
    /// How often a follower retries acquiring the lease (seconds)
    pub lease_retry_interval_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            enable_synchronizer: false,
            controller_namespace: None,
            lease_name: DEFAULT_LEASE_NAME.to_string(),
            lease_duration_secs: DEFAULT_LEASE_DURATION_SECS,
            lease_renew_interval_secs: DEFAULT_LEASE_RENEW_INTERVAL_SECS,
            lease_retry_interval_secs: DEFAULT_LEASE_RETRY_INTERVAL_SECS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            worker_count: env_var_or_default("WORKER_COUNT", DEFAULT_WORKER_COUNT).max(1),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            enable_synchronizer: env_var_or_default_bool("ENABLE_SYNCHRONIZER", false),
            controller_namespace: env_var_non_empty("POD_NAMESPACE"),
            lease_name: env_var_non_empty("LEASE_NAME")
                .unwrap_or_else(|| DEFAULT_LEASE_NAME.to_string()),
            lease_duration_secs: env_var_or_default(
                "LEASE_DURATION_SECS",
                DEFAULT_LEASE_DURATION_SECS,
            ),
            lease_renew_interval_secs: env_var_or_default(
                "LEASE_RENEW_INTERVAL_SECS",
                DEFAULT_LEASE_RENEW_INTERVAL_SECS,
            ),
            lease_retry_interval_secs: env_var_or_default(
                "LEASE_RETRY_INTERVAL_SECS",
                DEFAULT_LEASE_RETRY_INTERVAL_SECS,
            ),
        }
    }

    /// Get backoff start duration
    #[must_use]
    pub fn backoff_start_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_start_ms)
    }

    /// Get backoff max duration
    #[must_use]
    pub fn backoff_max_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    #[must_use]
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    #[must_use]
    pub fn lease_renew_interval(&self) -> Duration {
        Duration::from_secs(self.lease_renew_interval_secs)
    }

    #[must_use]
    pub fn lease_retry_interval(&self) -> Duration {
        Duration::from_secs(self.lease_retry_interval_secs)
    }
}
