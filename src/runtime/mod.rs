//! # Runtime
//!
//! Process-level plumbing around the reconcilers:
//!
//! - `initialization`: rustls, tracing, metrics and HTTP server startup
//! - `error_policy`: requeue on reconcile failure, watch error classification
//! - `leader_election`: Lease based single active instance
//! - `worker`: informers plus the reconcile worker pool

pub mod error_policy;
pub mod initialization;
pub mod leader_election;
pub mod worker;
