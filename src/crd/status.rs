//! # ClusterSecret Status
//!
//! Status types for tracking reconciliation state and conditions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The only condition type a `ClusterSecret` carries
pub const CONDITION_TYPE_READY: &str = "Ready";

pub const CONDITION_STATUS_TRUE: &str = "True";

pub const CONDITION_STATUS_FALSE: &str = "False";

/// Status of the `ClusterSecret` resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSecretStatus {
    /// Generation the controller last acted on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Lifecycle state in short human readable form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ClusterSecretState>,
    /// State expressed as conditions (for `kubectl wait` et al.)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Lifecycle state of a `ClusterSecret`
///
/// `Processing` and `Deleting` are written before secrets are touched,
/// `Ready` and `Error` only after a complete apply pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ClusterSecretState {
    Processing,
    Deleting,
    Error,
    Ready,
}

impl ClusterSecretState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ClusterSecretState::Processing => "Processing",
            ClusterSecretState::Deleting => "Deleting",
            ClusterSecretState::Error => "Error",
            ClusterSecretState::Ready => "Ready",
        }
    }
}

impl fmt::Display for ClusterSecretState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observation about the resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    /// One of `True`, `False`, `Unknown`
    pub status: String,
    /// RFC3339 time of the last write of this condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
    /// RFC3339 time `status` last changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
