//! Observability for the autoscaler
//!
//! Provides:
//! - Prometheus metrics (tick latency, fetch/resize counters, decisions by outcome)
//! - Structured event logging with tracing

use crate::engine::Decision;
use crate::models::Cluster;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// Buckets for tick latency in seconds; a tick is a handful of HTTP calls
const TICK_LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Samples per metric shown in the snapshot dump
const SNAPSHOT_TAIL: usize = 3;

static GLOBAL_METRICS: OnceLock<ScalerMetricsInner> = OnceLock::new();

struct ScalerMetricsInner {
    tick_latency_seconds: Histogram,
    ticks: IntCounter,
    fetch_errors: IntCounter,
    resize_requests: IntCounter,
    resize_errors: IntCounter,
    decisions: IntCounterVec,
    current_size_index: IntGauge,
    processes_observed: IntGauge,
}

impl ScalerMetricsInner {
    fn new() -> Self {
        Self {
            tick_latency_seconds: register_histogram!(
                "atlas_autoscaler_tick_latency_seconds",
                "Time spent in one control loop iteration, excluding sleep",
                TICK_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),

            ticks: register_int_counter!(
                "atlas_autoscaler_ticks_total",
                "Control loop iterations started"
            )
            .expect("Failed to register ticks_total"),

            fetch_errors: register_int_counter!(
                "atlas_autoscaler_fetch_errors_total",
                "Iterations aborted because the snapshot could not be fetched"
            )
            .expect("Failed to register fetch_errors_total"),

            resize_requests: register_int_counter!(
                "atlas_autoscaler_resize_requests_total",
                "Resize requests sent to the control plane"
            )
            .expect("Failed to register resize_requests_total"),

            resize_errors: register_int_counter!(
                "atlas_autoscaler_resize_errors_total",
                "Resize requests rejected or failed"
            )
            .expect("Failed to register resize_errors_total"),

            decisions: register_int_counter_vec!(
                "atlas_autoscaler_decisions_total",
                "Decisions taken, by outcome",
                &["outcome"]
            )
            .expect("Failed to register decisions_total"),

            current_size_index: register_int_gauge!(
                "atlas_autoscaler_current_size_index",
                "Position of the observed size in the catalog, -1 if unknown"
            )
            .expect("Failed to register current_size_index"),

            processes_observed: register_int_gauge!(
                "atlas_autoscaler_processes_observed",
                "Member processes in the last snapshot"
            )
            .expect("Failed to register processes_observed"),
        }
    }
}

/// Handle to the process-wide Prometheus metrics. Clones share the same
/// underlying collectors.
#[derive(Clone)]
pub struct ScalerMetrics {
    _private: (),
}

impl Default for ScalerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ScalerMetricsInner {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new)
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().tick_latency_seconds.observe(duration_secs);
    }

    pub fn inc_ticks(&self) {
        self.inner().ticks.inc();
    }

    pub fn inc_fetch_errors(&self) {
        self.inner().fetch_errors.inc();
    }

    pub fn inc_resize_requests(&self) {
        self.inner().resize_requests.inc();
    }

    pub fn inc_resize_errors(&self) {
        self.inner().resize_errors.inc();
    }

    pub fn record_decision(&self, decision: &Decision) {
        self.inner()
            .decisions
            .with_label_values(&[decision.outcome.as_str()])
            .inc();
    }

    pub fn set_current_size_index(&self, index: Option<usize>) {
        let value = index.map(|i| i as i64).unwrap_or(-1);
        self.inner().current_size_index.set(value);
    }

    pub fn set_processes_observed(&self, count: usize) {
        self.inner().processes_observed.set(count as i64);
    }
}

/// Event-style logs with a fixed `cluster` field
#[derive(Clone)]
pub struct StructuredLogger {
    cluster: String,
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn log_startup(&self, version: &str, project_id: &str, dry_run: bool) {
        info!(
            event = "scaler_started",
            cluster = %self.cluster,
            project_id = %project_id,
            version = %version,
            dry_run = dry_run,
            "Autoscaler started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "scaler_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "Autoscaler shutting down"
        );
    }

    /// Dump the snapshot: state, size and the tail of every member's series
    pub fn log_snapshot(&self, snapshot: &Cluster) {
        info!(
            event = "cluster_snapshot",
            cluster = %self.cluster,
            state = %snapshot.lifecycle_state,
            provider = %snapshot.provider,
            size = %snapshot.size_name,
            processes = snapshot.processes.len(),
            "Observed cluster"
        );

        for process in &snapshot.processes {
            for (metric, series) in &process.metrics {
                let tail: Vec<f64> = series.tail(SNAPSHOT_TAIL).iter().map(|m| m.value).collect();
                debug!(
                    cluster = %self.cluster,
                    role = ?process.role,
                    process = %process.alias,
                    metric = %metric,
                    tail = ?tail,
                    "Member metric"
                );
            }
        }
    }

    pub fn log_decision(&self, decision: &Decision) {
        info!(
            event = "scaling_decision",
            cluster = %self.cluster,
            current = %decision.current,
            target = %decision.target,
            outcome = decision.outcome.as_str(),
            "Scaling decision"
        );
    }

    pub fn log_not_quiescent(&self, state: &str) {
        info!(
            event = "change_in_flight",
            cluster = %self.cluster,
            state = %state,
            "Cluster is not idle, skipping decision"
        );
    }

    pub fn log_unknown_size(&self, size: &str) {
        warn!(
            event = "unknown_size",
            cluster = %self.cluster,
            size = %size,
            "Unknown cluster size, the size catalog needs an entry for it"
        );
    }

    pub fn log_resize(&self, from: &str, to: &str, dry_run: bool) {
        info!(
            event = "resize_requested",
            cluster = %self.cluster,
            from = %from,
            to = %to,
            dry_run = dry_run,
            "Scaling cluster"
        );
    }

    pub fn log_resize_failed(&self, from: &str, to: &str, error: &str) {
        warn!(
            event = "resize_failed",
            cluster = %self.cluster,
            from = %from,
            to = %to,
            error = %error,
            "Resize request failed, will re-evaluate next tick"
        );
    }

    pub fn log_fetch_failed(&self, error: &str, transient: bool) {
        warn!(
            event = "fetch_failed",
            cluster = %self.cluster,
            error = %error,
            transient = transient,
            "Failed to fetch cluster snapshot, skipping iteration"
        );
    }
}
