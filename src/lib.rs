//! ClusterSecret Controller Library
//!
//! Fans the secret template of every cluster-scoped `ClusterSecret` out into
//! a `Secret` in each namespace its selector matches, and keeps those copies
//! in line with the template, the selector and the namespace labels.
//!
//! ## Quick Start
//!
//! ```rust
//! use clustersecret_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
