//! Leader election using Kubernetes Leases
//!
//! Only the instance holding the `coordination.k8s.io/v1` Lease runs the
//! controller. Losing the lease must stop all in-flight work, so the holder
//! gets a [`LeaderGuard`] whose [`LeaderGuard::lost`] resolves on loss.
//!
//! # Atomicity
//!
//! Uses resourceVersion for compare-and-swap semantics. If the lease changes
//! between read and write, the update fails with 409 Conflict and we retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::CONTROLLER_NAME;

#[derive(Debug, Error)]
pub enum LeaderElectionError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("lease {0} has no resourceVersion")]
    MissingResourceVersion(String),
    #[error("invalid lease timestamp: {0}")]
    Timestamp(#[from] serde_json::Error),
}

/// Lease coordinates and timing
#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    pub lease_name: String,
    pub namespace: String,
    /// Unique per process
    pub identity: String,
    pub lease_duration: Duration,
    pub renew_interval: Duration,
    pub retry_interval: Duration,
}

/// What to do with the lease as currently stored
#[derive(Debug, Clone, PartialEq, Eq)]
enum LeaseAction {
    Create,
    Renew,
    TakeOver { transitions: i32 },
    Wait { holder: Option<String> },
}

/// Lease timestamps travel as RFC3339 strings with microsecond precision
fn micro_time(at: DateTime<Utc>) -> Result<MicroTime, LeaderElectionError> {
    Ok(serde_json::from_value(json!(
        at.to_rfc3339_opts(SecondsFormat::Micros, true)
    ))?)
}

fn parse_micro_time(time: &MicroTime) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn lease_action(lease: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> LeaseAction {
    let Some(lease) = lease else {
        return LeaseAction::Create;
    };
    let spec = lease.spec.as_ref();
    let holder = spec.and_then(|s| s.holder_identity.clone());

    if holder.as_deref() == Some(identity) {
        return LeaseAction::Renew;
    }

    let renew_time = spec
        .and_then(|s| s.renew_time.as_ref())
        .and_then(parse_micro_time);
    let duration_secs = spec.and_then(|s| s.lease_duration_seconds);
    let expired = match (renew_time, duration_secs) {
        (Some(renewed), Some(duration)) => {
            now > renewed + chrono::Duration::seconds(i64::from(duration))
        }
        _ => true,
    };

    if expired || holder.as_deref().is_none_or(str::is_empty) {
        LeaseAction::TakeOver {
            transitions: spec.and_then(|s| s.lease_transitions).unwrap_or(0),
        }
    } else {
        LeaseAction::Wait { holder }
    }
}

/// Leader elector using Kubernetes Leases
pub struct LeaderElector {
    client: Client,
    config: LeaderElectionConfig,
    is_leader: Arc<AtomicBool>,
    observed_leader: Mutex<Option<String>>,
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("config", &self.config)
            .field("is_leader", &self.is_leader.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl LeaderElector {
    #[must_use]
    pub fn new(client: Client, config: LeaderElectionConfig) -> Self {
        Self {
            client,
            config,
            is_leader: Arc::new(AtomicBool::new(false)),
            observed_leader: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    fn api(&self) -> Api<Lease> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    /// Block until leadership is acquired, then return a guard
    ///
    /// The guard keeps renewing the lease; its `lost()` resolves once
    /// renewal fails.
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(
            identity = %self.config.identity,
            lease = %self.config.lease_name,
            namespace = %self.config.namespace,
            "Waiting for leadership..."
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.config.identity, "Leadership acquired");
                    self.is_leader.store(true, Ordering::SeqCst);
                    return self.create_guard();
                }
                Ok(false) => {
                    debug!(
                        identity = %self.config.identity,
                        retry_secs = self.config.retry_interval.as_secs(),
                        "Lease held by another, waiting..."
                    );
                }
                Err(e) => {
                    warn!(
                        identity = %self.config.identity,
                        error = %e,
                        retry_secs = self.config.retry_interval.as_secs(),
                        "Failed to acquire lease, retrying..."
                    );
                }
            }
            tokio::time::sleep(self.config.retry_interval).await;
        }
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    fn observe_leader(&self, holder: Option<&str>) {
        let mut observed = self
            .observed_leader
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if observed.as_deref() != holder {
            if let Some(holder) = holder {
                info!(leader = %holder, "new leader elected");
            }
            *observed = holder.map(str::to_string);
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let api = self.api();
        let now = Utc::now();

        let existing = match api.get(&self.config.lease_name).await {
            Ok(lease) => Some(lease),
            Err(kube::Error::Api(e)) if e.code == 404 => None,
            Err(e) => return Err(e.into()),
        };

        match lease_action(existing.as_ref(), &self.config.identity, now) {
            LeaseAction::Create => self.create_lease(&api, now).await,
            LeaseAction::Renew => match existing {
                Some(lease) => self.renew_lease(&api, lease, now).await,
                None => Ok(false),
            },
            LeaseAction::TakeOver { transitions } => {
                let rv = existing.and_then(|l| l.metadata.resource_version);
                self.take_over_lease(&api, rv, now, transitions).await
            }
            LeaseAction::Wait { holder } => {
                self.observe_leader(holder.as_deref());
                Ok(false)
            }
        }
    }

    fn lease(&self, resource_version: Option<String>, spec: LeaseSpec) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.config.lease_name.clone()),
                namespace: Some(self.config.namespace.clone()),
                resource_version,
                ..Default::default()
            },
            spec: Some(spec),
        }
    }

    fn lease_duration_secs(&self) -> i32 {
        i32::try_from(self.config.lease_duration.as_secs()).unwrap_or(i32::MAX)
    }

    async fn create_lease(
        &self,
        api: &Api<Lease>,
        now: DateTime<Utc>,
    ) -> Result<bool, LeaderElectionError> {
        let lease = self.lease(
            None,
            LeaseSpec {
                holder_identity: Some(self.config.identity.clone()),
                lease_duration_seconds: Some(self.lease_duration_secs()),
                acquire_time: Some(micro_time(now)?),
                renew_time: Some(micro_time(now)?),
                lease_transitions: Some(0),
                ..Default::default()
            },
        );

        match api.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!(identity = %self.config.identity, "Created new lease");
                self.observe_leader(Some(&self.config.identity));
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.config.identity, "Lease creation conflict, will retry");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn renew_lease(
        &self,
        api: &Api<Lease>,
        mut lease: Lease,
        now: DateTime<Utc>,
    ) -> Result<bool, LeaderElectionError> {
        if lease.metadata.resource_version.is_none() {
            return Err(LeaderElectionError::MissingResourceVersion(
                self.config.lease_name.clone(),
            ));
        }
        if let Some(spec) = lease.spec.as_mut() {
            spec.renew_time = Some(micro_time(now)?);
        }

        match api
            .replace(&self.config.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => {
                debug!(identity = %self.config.identity, "Lease renewed");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                warn!(identity = %self.config.identity, "Lease renewal conflict - lost leadership");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn take_over_lease(
        &self,
        api: &Api<Lease>,
        resource_version: Option<String>,
        now: DateTime<Utc>,
        transitions: i32,
    ) -> Result<bool, LeaderElectionError> {
        let rv = resource_version.ok_or_else(|| {
            LeaderElectionError::MissingResourceVersion(self.config.lease_name.clone())
        })?;

        let lease = self.lease(
            Some(rv),
            LeaseSpec {
                holder_identity: Some(self.config.identity.clone()),
                lease_duration_seconds: Some(self.lease_duration_secs()),
                acquire_time: Some(micro_time(now)?),
                renew_time: Some(micro_time(now)?),
                lease_transitions: Some(transitions.saturating_add(1)),
                ..Default::default()
            },
        );

        match api
            .replace(&self.config.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => {
                info!(
                    identity = %self.config.identity,
                    transitions = transitions.saturating_add(1),
                    "Took over expired lease"
                );
                self.observe_leader(Some(&self.config.identity));
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(identity = %self.config.identity, "Lease takeover conflict, will retry");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        loop {
            tokio::time::sleep(self.config.renew_interval).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    warn!(identity = %self.config.identity, "Leadership lost");
                    self.is_leader.store(false, Ordering::SeqCst);
                    let _ = lost_tx.send(());
                    return;
                }
            }
        }
    }

    /// Clear the holder so a standby can take over without waiting for expiry
    async fn release_lease(&self) -> Result<(), LeaderElectionError> {
        let api = self.api();

        let lease = match api.get(&self.config.lease_name).await {
            Ok(l) => l,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(identity = %self.config.identity, "Lease not found, nothing to release");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let holder = lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref());
        if holder != Some(self.config.identity.as_str()) {
            debug!(identity = %self.config.identity, "Not the lease holder, nothing to release");
            return Ok(());
        }

        let past = Utc::now() - chrono::Duration::seconds(60);
        let patch = json!({
            "metadata": { "resourceVersion": lease.metadata.resource_version },
            "spec": {
                "holderIdentity": null,
                "renewTime": past.to_rfc3339_opts(SecondsFormat::Micros, true)
            }
        });

        api.patch(
            &self.config.lease_name,
            &PatchParams::apply(CONTROLLER_NAME),
            &Patch::Merge(&patch),
        )
        .await?;

        info!(identity = %self.config.identity, "Lease released for fast failover");
        Ok(())
    }
}

/// Guard that maintains leadership
///
/// While this guard exists the lease is renewed periodically. The renewal
/// task is aborted when the guard is dropped.
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl std::fmt::Debug for LeaderGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderGuard")
            .field("identity", &self.elector.config.identity)
            .finish_non_exhaustive()
    }
}

impl LeaderGuard {
    /// Wait until leadership is lost
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }

    /// Release leadership by clearing the lease holder
    ///
    /// # Errors
    ///
    /// Returns API errors from reading or patching the lease.
    pub async fn release_leadership(&self) -> Result<(), LeaderElectionError> {
        self.renewal_task.abort();
        self.elector.release_lease().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.elector.is_leader.store(false, Ordering::SeqCst);
        self.renewal_task.abort();
        info!(identity = %self.elector.config.identity, "Leadership released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(holder: Option<&str>, renewed: DateTime<Utc>, duration: i32) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some("lease".to_string()),
                resource_version: Some("7".to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: holder.map(str::to_string),
                lease_duration_seconds: Some(duration),
                renew_time: Some(micro_time(renewed).expect("valid time")),
                lease_transitions: Some(3),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_micro_time_round_trips_through_wire_format() {
        let now = Utc::now();
        let parsed = parse_micro_time(&micro_time(now).expect("valid time")).expect("parses");
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn test_missing_lease_is_created() {
        assert_eq!(lease_action(None, "me", Utc::now()), LeaseAction::Create);
    }

    #[test]
    fn test_own_lease_is_renewed() {
        let now = Utc::now();
        let lease = lease(Some("me"), now, 15);
        assert_eq!(lease_action(Some(&lease), "me", now), LeaseAction::Renew);
    }

    #[test]
    fn test_live_foreign_lease_is_respected() {
        let now = Utc::now();
        let lease = lease(Some("other"), now - chrono::Duration::seconds(5), 15);
        assert_eq!(
            lease_action(Some(&lease), "me", now),
            LeaseAction::Wait {
                holder: Some("other".to_string())
            }
        );
    }

    #[test]
    fn test_expired_or_released_lease_is_taken_over() {
        let now = Utc::now();
        let expired = lease(Some("other"), now - chrono::Duration::seconds(30), 15);
        assert_eq!(
            lease_action(Some(&expired), "me", now),
            LeaseAction::TakeOver { transitions: 3 }
        );

        let released = lease(None, now, 15);
        assert_eq!(
            lease_action(Some(&released), "me", now),
            LeaseAction::TakeOver { transitions: 3 }
        );
    }
}
