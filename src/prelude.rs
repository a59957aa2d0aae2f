//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use clustersecret_controller::prelude::*;
//! ```

// CRD types - most commonly used
pub use crate::crd::*;

// Reconciler types - core controller functionality
pub use crate::controller::events::WorkItem;
pub use crate::controller::queue::WorkQueue;
pub use crate::controller::reconciler::{Reconciler, ReconcilerError};
pub use crate::controller::store::{ClusterApi, KubeClusterApi, StoreError};
pub use crate::controller::synchronizer::Synchronizer;

// Config types - for configuration management
pub use crate::config::{ControllerConfig, ServerConfig};

// Event publishing
pub use crate::observability::{EventPublisher, KubeEventPublisher, NoopEventPublisher};
