//! # Custom Resource Definitions
//!
//! CRD types for the ClusterSecret controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `ClusterSecret` resource, its spec and the secret template
//! - `status.rs` - Status types for tracking reconciliation state

mod spec;
mod status;

pub use spec::{ClusterSecret, ClusterSecretSpec, SecretTemplate};
pub use status::{
    ClusterSecretState, ClusterSecretStatus, Condition, CONDITION_STATUS_FALSE,
    CONDITION_STATUS_TRUE, CONDITION_TYPE_READY,
};
