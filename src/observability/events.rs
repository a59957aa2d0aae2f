//! # Kubernetes Events
//!
//! Trait-based wrapper around `kube::runtime::events::Recorder` so the
//! reconciler can emit Events visible via `kubectl describe`.
//!
//! Events are fire-and-forget: failures are logged as warnings and never
//! reach the reconcile result.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events about an object
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`
    ///
    /// * `reason` - machine-readable reason, e.g. `Reconciled`
    /// * `action` - what was done, e.g. `Reconcile`
    /// * `note` - optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production publisher backed by the events API
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// `controller_name` is reported as the Event's reporting component
    #[must_use]
    pub fn new(client: Client, controller_name: &str, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                object = ?resource_ref.name,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Publisher that drops every Event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`
pub mod reasons {
    /// A namespace change triggered a `ClusterSecret` reconcile
    pub const TRIGGER_RECONCILE: &str = "TriggerClusterSecretReconcile";
    /// All managed secrets are up to date
    pub const RECONCILED: &str = "Reconciled";
    /// The reconcile failed
    pub const RECONCILE_ERROR: &str = "ReconcileError";
}

/// Event actions, shown in the ACTION column of `kubectl get events`
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
}
