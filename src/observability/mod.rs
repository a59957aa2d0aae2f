//! # Observability
//!
//! - `metrics`: Prometheus metrics collection
//! - `events`: Kubernetes Event publishing

pub mod events;
pub mod metrics;

pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};
