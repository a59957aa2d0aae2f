//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `clustersecret_reconciliations_total{kind}` - Total number of reconciliations
//! - `clustersecret_reconciliation_errors_total{kind}` - Total number of failed reconciliations
//! - `clustersecret_reconciliation_duration_seconds{kind}` - Duration of reconciliations
//! - `clustersecret_secret_operations_total{operation}` - Managed secret writes (create, update, delete)
//! - `clustersecret_secret_operation_errors_total{operation}` - Failed managed secret writes
//! - `clustersecret_workqueue_depth` - Keys waiting in the work queue
//! - `clustersecret_workqueue_requeues_total` - Rate-limited requeues
//! - `clustersecret_watch_errors_total{kind}` - Errors reported by the watch streams

use anyhow::Result;
use prometheus::{HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry};
use prometheus::core::Collector;
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "clustersecret_reconciliations_total",
            "Total number of reconciliations by work item kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "clustersecret_reconciliation_errors_total",
            "Total number of failed reconciliations by work item kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "clustersecret_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static SECRET_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "clustersecret_secret_operations_total",
            "Total number of managed secret writes by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create SECRET_OPERATIONS_TOTAL metric - this should never happen")
});

static SECRET_OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "clustersecret_secret_operation_errors_total",
            "Total number of failed managed secret writes by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create SECRET_OPERATION_ERRORS_TOTAL metric - this should never happen")
});

static WORKQUEUE_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "clustersecret_workqueue_depth",
        "Number of keys waiting in the work queue",
    )
    .expect("Failed to create WORKQUEUE_DEPTH metric - this should never happen")
});

static WORKQUEUE_REQUEUES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "clustersecret_workqueue_requeues_total",
        "Total number of rate-limited requeues",
    )
    .expect("Failed to create WORKQUEUE_REQUEUES_TOTAL metric - this should never happen")
});

static WATCH_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "clustersecret_watch_errors_total",
            "Total number of watch stream errors by resource kind",
        ),
        &["kind"],
    )
    .expect("Failed to create WATCH_ERRORS_TOTAL metric - this should never happen")
});

fn register<C: Collector + Clone + 'static>(collector: &C) -> Result<()> {
    match REGISTRY.register(Box::new(collector.clone())) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Register all metrics with the crate registry; safe to call more than once
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    register(&*RECONCILIATIONS_TOTAL)?;
    register(&*RECONCILIATION_ERRORS_TOTAL)?;
    register(&*RECONCILIATION_DURATION)?;
    register(&*SECRET_OPERATIONS_TOTAL)?;
    register(&*SECRET_OPERATION_ERRORS_TOTAL)?;
    register(&*WORKQUEUE_DEPTH)?;
    register(&*WORKQUEUE_REQUEUES_TOTAL)?;
    register(&*WATCH_ERRORS_TOTAL)?;
    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

pub fn increment_secret_operations(operation: &str) {
    SECRET_OPERATIONS_TOTAL.with_label_values(&[operation]).inc();
}

pub fn increment_secret_operation_errors(operation: &str) {
    SECRET_OPERATION_ERRORS_TOTAL
        .with_label_values(&[operation])
        .inc();
}

pub fn set_workqueue_depth(depth: usize) {
    WORKQUEUE_DEPTH.set(i64::try_from(depth).unwrap_or(i64::MAX));
}

pub fn increment_workqueue_requeues() {
    WORKQUEUE_REQUEUES_TOTAL.inc();
}

pub fn increment_watch_errors(kind: &str) {
    WATCH_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}
