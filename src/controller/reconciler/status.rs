//! # Status
//!
//! `ClusterSecret` lifecycle state and its `Ready` condition.
//!
//! ```text
//! Processing -> Ready | Error        after an apply pass
//! Ready      -> Processing           new generation or pending operations
//! Error      -> Processing           new generation (Error is sticky otherwise)
//! any        -> Deleting             deletion requested
//! ```
//!
//! Writes that change neither state, observed generation nor message are skipped.

use chrono::{SecondsFormat, Utc};
use kube::ResourceExt;
use tracing::debug;

use crate::controller::reconciler::Reconciler;
use crate::controller::store::StoreError;
use crate::crd::{
    ClusterSecret, ClusterSecretState, ClusterSecretStatus, Condition, CONDITION_STATUS_FALSE,
    CONDITION_STATUS_TRUE, CONDITION_TYPE_READY,
};

/// State to write before the apply pass, if any
///
/// Error is kept until the apply pass resolves it, unless deletion was
/// requested.
#[must_use]
pub fn pre_apply_state(
    cluster_secret: &ClusterSecret,
    has_operations: bool,
) -> Option<ClusterSecretState> {
    if cluster_secret.is_deleting() {
        return Some(ClusterSecretState::Deleting);
    }
    if cluster_secret.state() == Some(ClusterSecretState::Error) {
        return None;
    }
    if cluster_secret.generation() > cluster_secret.observed_generation() || has_operations {
        return Some(ClusterSecretState::Processing);
    }
    None
}

fn ready_condition(status: Option<&ClusterSecretStatus>) -> Option<&Condition> {
    status?
        .conditions
        .iter()
        .find(|c| c.r#type == CONDITION_TYPE_READY)
}

/// Status for `state`, or `None` if it would not change anything
///
/// `now` is an RFC3339 timestamp used for the condition's update time, and for
/// its transition time when the condition status flips.
#[must_use]
pub fn build_status(
    cluster_secret: &ClusterSecret,
    state: ClusterSecretState,
    message: Option<String>,
    now: &str,
) -> Option<ClusterSecretStatus> {
    let current = cluster_secret.status.as_ref();
    let previous = ready_condition(current);

    let unchanged = cluster_secret.state() == Some(state)
        && current.and_then(|s| s.observed_generation) == Some(cluster_secret.generation())
        && previous.and_then(|c| c.message.as_ref()) == message.as_ref();
    if unchanged {
        return None;
    }

    let condition_status = if state == ClusterSecretState::Ready {
        CONDITION_STATUS_TRUE
    } else {
        CONDITION_STATUS_FALSE
    };
    let last_transition_time = match previous {
        Some(c) if c.status == condition_status => c.last_transition_time.clone(),
        _ => Some(now.to_string()),
    };

    Some(ClusterSecretStatus {
        observed_generation: Some(cluster_secret.generation()),
        state: Some(state),
        conditions: vec![Condition {
            r#type: CONDITION_TYPE_READY.to_string(),
            status: condition_status.to_string(),
            last_update_time: Some(now.to_string()),
            last_transition_time,
            reason: Some(format!("ClusterSecret{state}")),
            message,
        }],
    })
}

impl Reconciler {
    /// Persist `state`, replacing `cluster_secret` with the written object
    ///
    /// The write is conditional on the resource version of `cluster_secret`.
    pub(crate) async fn update_status(
        &self,
        cluster_secret: &mut ClusterSecret,
        state: ClusterSecretState,
        message: Option<String>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let Some(status) = build_status(cluster_secret, state, message, &now) else {
            return Ok(());
        };

        debug!(
            cluster_secret = %cluster_secret.name_any(),
            state = %state,
            generation = cluster_secret.generation(),
            "updating status"
        );
        *cluster_secret = self
            .client
            .update_cluster_secret_status(cluster_secret, &status)
            .await?;
        Ok(())
    }
}
