//! # ClusterSecret Spec
//!
//! The cluster-scoped source of truth: a secret template plus the selector
//! deciding which namespaces receive a copy.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::ByteString;
use kube::{CustomResource, ResourceExt};
use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::FINALIZER;

/// Desired state of a `ClusterSecret`
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ClusterSecret",
    group = "core.cs.sap.com",
    version = "v1alpha1",
    plural = "clustersecrets",
    status = "crate::crd::ClusterSecretStatus",
    shortname = "csec",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSecretSpec {
    /// Namespaces receiving a copy of the secret; absent selects every namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "label_selector_schema")]
    pub namespace_selector: Option<LabelSelector>,
    /// Shape of the distributed secrets
    pub template: SecretTemplate,
}

/// Template every managed `Secret` is built from
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretTemplate {
    /// Secret type, e.g. `Opaque`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Secret payload, base64 encoded on the wire
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(schema_with = "byte_map_schema")]
    pub data: BTreeMap<String, ByteString>,
    /// Legacy plain-text payload; the admission webhook folds it into `data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_data: Option<BTreeMap<String, String>>,
}

fn label_selector_schema(_gen: &mut SchemaGenerator) -> Schema {
    schemars::json_schema!({
        "type": "object",
        "description": "Label selector for target namespaces (matchLabels / matchExpressions).",
        "properties": {
            "matchLabels": {
                "type": "object",
                "additionalProperties": { "type": "string" }
            },
            "matchExpressions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["key", "operator"],
                    "properties": {
                        "key": { "type": "string" },
                        "operator": { "type": "string" },
                        "values": { "type": "array", "items": { "type": "string" } }
                    }
                }
            }
        }
    })
}

fn byte_map_schema(_gen: &mut SchemaGenerator) -> Schema {
    schemars::json_schema!({
        "type": "object",
        "additionalProperties": { "type": "string", "format": "byte" }
    })
}

impl ClusterSecret {
    /// Generation as assigned by the API server (0 when unset)
    #[must_use]
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or_default()
    }

    /// Whether the API server has marked this object for deletion
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether our finalizer is present
    #[must_use]
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == FINALIZER)
    }

    /// Current state recorded in status, if any
    #[must_use]
    pub fn state(&self) -> Option<crate::crd::ClusterSecretState> {
        self.status.as_ref().and_then(|s| s.state)
    }

    /// `observedGeneration` recorded in status (0 when unset)
    #[must_use]
    pub fn observed_generation(&self) -> i64 {
        self.status
            .as_ref()
            .and_then(|s| s.observed_generation)
            .unwrap_or_default()
    }
}
