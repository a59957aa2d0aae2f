//! # CRD Generator
//!
//! Renders the `ClusterSecret` CustomResourceDefinition as YAML from the Rust
//! type definitions.
//!
//! ## Usage
//!
//! ```bash
//! # Generate CRD YAML
//! cargo run --bin crdgen > crds/clustersecrets.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::core::CustomResourceExt;

use crate::crd::ClusterSecret;

/// Header written above the generated YAML
pub const HEADER: &str = "\
# This file is auto-generated by crdgen
# DO NOT EDIT THIS FILE MANUALLY
# Change the types in src/crd and regenerate
#
---
";

/// The CRD document, header included
///
/// # Errors
///
/// Fails if the CRD cannot be serialized to YAML.
pub fn crd_yaml() -> Result<String, serde_yaml::Error> {
    let yaml = serde_yaml::to_string(&ClusterSecret::crd())?;
    Ok(format!("{HEADER}{yaml}"))
}
