//! Control loop implementation
//!
//! Iterations are strictly sequential: fetch completes before the decision,
//! the decision completes before any resize, and the next fetch only starts
//! after the sleep. The stop signal is only observed while sleeping, so a
//! resize request that was sent always runs to completion.

use super::{fetch_snapshot, DecisionLog, TickOutcome};
use crate::atlas::{ControlPlane, MeasurementWindow, MetricsSource};
use crate::catalog::SizeCatalog;
use crate::engine::{decide, Decision};
use crate::error::Result as AtlasResult;
use crate::health::{components, HealthRegistry};
use crate::models::{Cluster, ClusterState};
use crate::observability::{ScalerMetrics, StructuredLogger};
use crate::sink::{MeasurementRecord, MeasurementSink};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Sleep between iterations (default: 60 seconds)
    pub interval: Duration,
    /// Measurement query window
    pub window: MeasurementWindow,
    /// Decide and log, but never send resize requests
    pub dry_run: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            window: MeasurementWindow::LAST_HOUR_BY_MINUTE,
            dry_run: false,
        }
    }
}

/// Fetch → decide → act → sleep loop for a single cluster
pub struct ControlLoop {
    project_id: String,
    cluster_name: String,
    source: Arc<dyn MetricsSource>,
    control_plane: Arc<dyn ControlPlane>,
    catalog: Arc<SizeCatalog>,
    sink: Option<Arc<dyn MeasurementSink>>,
    config: LoopConfig,
    history: DecisionLog,
    health: HealthRegistry,
    metrics: ScalerMetrics,
    logger: StructuredLogger,
}

impl ControlLoop {
    pub fn history(&self) -> DecisionLog {
        self.history.clone()
    }

    pub fn health(&self) -> HealthRegistry {
        self.health.clone()
    }

    /// Probe the metrics source once before the loop starts. A failure here
    /// is fatal for the caller.
    pub async fn preflight(&self) -> AtlasResult<ClusterState> {
        let state = self.source.cluster_state().await?;

        if !self.catalog.contains(&state.size_name) {
            self.logger.log_unknown_size(&state.size_name);
        }

        info!(
            cluster = %self.cluster_name,
            size = %state.size_name,
            state = %state.lifecycle_state,
            members = state.members.len(),
            "Preflight check passed"
        );
        self.health.set_ready(true).await;
        Ok(state)
    }

    /// Run until the shutdown signal arrives (or its sender is dropped)
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            cluster = %self.cluster_name,
            interval_secs = self.config.interval.as_secs(),
            dry_run = self.config.dry_run,
            "Starting control loop"
        );

        loop {
            self.run_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = shutdown.recv() => {
                    info!("Shutting down control loop");
                    break;
                }
            }
        }
    }

    /// Execute a single iteration and record its outcome
    pub async fn run_once(&self) -> TickOutcome {
        let start = Instant::now();
        self.metrics.inc_ticks();

        let outcome = self.tick().await;

        self.metrics.observe_tick_latency(start.elapsed().as_secs_f64());
        self.history.push(outcome.clone()).await;
        outcome
    }

    async fn tick(&self) -> TickOutcome {
        let snapshot = match fetch_snapshot(self.source.as_ref(), &self.cluster_name, self.config.window).await {
            Ok(snapshot) => {
                self.health.record_success(components::METRICS_SOURCE).await;
                snapshot
            }
            Err(e) => {
                self.metrics.inc_fetch_errors();
                self.logger.log_fetch_failed(&e.to_string(), e.is_transient());
                self.health
                    .record_degraded(components::METRICS_SOURCE, e.to_string())
                    .await;
                return TickOutcome::FetchFailed {
                    error: e.to_string(),
                };
            }
        };

        self.logger.log_snapshot(&snapshot);
        self.metrics.set_processes_observed(snapshot.processes.len());
        self.metrics
            .set_current_size_index(self.catalog.lookup(&snapshot.size_name).map(|e| e.index()));
        self.persist(&snapshot).await;

        if !snapshot.lifecycle_state.is_quiescent() {
            self.logger.log_not_quiescent(snapshot.lifecycle_state.as_str());
            return TickOutcome::NotQuiescent {
                size: snapshot.size_name,
                state: snapshot.lifecycle_state.to_string(),
            };
        }

        if !self.catalog.contains(&snapshot.size_name) {
            self.logger.log_unknown_size(&snapshot.size_name);
            self.health
                .record_degraded(
                    components::SIZE_CATALOG,
                    format!("size {} is not in the catalog", snapshot.size_name),
                )
                .await;
            return TickOutcome::UnknownSize {
                size: snapshot.size_name,
            };
        }
        self.health.record_success(components::SIZE_CATALOG).await;

        let decision = decide(&snapshot.size_name, snapshot.primary(), &self.catalog);
        self.metrics.record_decision(&decision);
        self.logger.log_decision(&decision);

        if !decision.is_change() {
            return TickOutcome::Unchanged { decision };
        }

        self.act(&snapshot, decision).await
    }

    async fn act(&self, snapshot: &Cluster, decision: Decision) -> TickOutcome {
        if self.config.dry_run {
            self.logger.log_resize(&decision.current, &decision.target, true);
            return TickOutcome::DryRun { decision };
        }

        let request = snapshot.resize_to(&decision.target);
        self.metrics.inc_resize_requests();
        self.logger.log_resize(&decision.current, &decision.target, false);

        match self.control_plane.resize(&request).await {
            Ok(()) => {
                self.health.record_success(components::CONTROL_PLANE).await;
                TickOutcome::Resized { decision }
            }
            Err(e) => {
                self.metrics.inc_resize_errors();
                self.logger
                    .log_resize_failed(&decision.current, &decision.target, &e.to_string());
                self.health
                    .record_failure(components::CONTROL_PLANE, e.to_string())
                    .await;
                TickOutcome::ResizeFailed {
                    decision,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Hand the snapshot's raw measurements to the history sink, if any
    async fn persist(&self, snapshot: &Cluster) {
        let Some(sink) = &self.sink else {
            return;
        };

        let now = Utc::now();
        let records: Vec<MeasurementRecord> = snapshot
            .processes
            .iter()
            .map(|p| MeasurementRecord::capture(&self.project_id, snapshot, p, now))
            .collect();

        if let Err(e) = sink.record(&records).await {
            warn!(error = %e, "Failed to persist measurement history");
        }
    }
}

/// Builder for [`ControlLoop`]
pub struct ControlLoopBuilder {
    project_id: String,
    cluster_name: Option<String>,
    source: Option<Arc<dyn MetricsSource>>,
    control_plane: Option<Arc<dyn ControlPlane>>,
    catalog: Option<Arc<SizeCatalog>>,
    sink: Option<Arc<dyn MeasurementSink>>,
    config: LoopConfig,
    history: Option<DecisionLog>,
    health: Option<HealthRegistry>,
}

impl ControlLoopBuilder {
    pub fn new() -> Self {
        Self {
            project_id: String::new(),
            cluster_name: None,
            source: None,
            control_plane: None,
            catalog: None,
            sink: None,
            config: LoopConfig::default(),
            history: None,
            health: None,
        }
    }

    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    pub fn cluster_name(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = Some(cluster_name.into());
        self
    }

    pub fn source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn control_plane(mut self, control_plane: Arc<dyn ControlPlane>) -> Self {
        self.control_plane = Some(control_plane);
        self
    }

    pub fn catalog(mut self, catalog: Arc<SizeCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn MeasurementSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.config.dry_run = dry_run;
        self
    }

    pub fn history(mut self, history: DecisionLog) -> Self {
        self.history = Some(history);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<ControlLoop> {
        let cluster_name = self
            .cluster_name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Cluster name is required"))?;
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Metrics source is required"))?;
        let control_plane = self
            .control_plane
            .ok_or_else(|| anyhow::anyhow!("Control plane is required"))?;

        Ok(ControlLoop {
            project_id: self.project_id,
            logger: StructuredLogger::new(&cluster_name),
            cluster_name,
            source,
            control_plane,
            catalog: self.catalog.unwrap_or_default(),
            sink: self.sink,
            config: self.config,
            history: self.history.unwrap_or_default(),
            health: self.health.unwrap_or_default(),
            metrics: ScalerMetrics::new(),
        })
    }
}

impl Default for ControlLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::async_trait;
    use crate::engine::Outcome;
    use crate::error::AtlasError;
    use crate::health::{ComponentStatus, UNHEALTHY_AFTER};
    use crate::models::{
        LifecycleState, MemberRef, MetricSeries, ProcessRole, ResizeRequest,
        DISK_PARTITION_IOPS_READ, DISK_PARTITION_IOPS_WRITE,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory metrics source
    struct FakeSource {
        size: String,
        state: LifecycleState,
        read: Vec<f64>,
        write: Vec<f64>,
        fail_state: bool,
        fail_metrics: bool,
        metric_calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(size: &str, read: &[f64], write: &[f64]) -> Self {
            Self {
                size: size.to_string(),
                state: LifecycleState::Idle,
                read: read.to_vec(),
                write: write.to_vec(),
                fail_state: false,
                fail_metrics: false,
                metric_calls: AtomicUsize::new(0),
            }
        }

        fn member(id: &str, role: ProcessRole) -> MemberRef {
            MemberRef {
                id: id.to_string(),
                alias: format!("{id}:27017"),
                locator: format!("https://example.invalid/{id}"),
                role,
            }
        }
    }

    #[async_trait]
    impl MetricsSource for FakeSource {
        async fn cluster_state(&self) -> AtlasResult<ClusterState> {
            if self.fail_state {
                return Err(AtlasError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(ClusterState {
                size_name: self.size.clone(),
                lifecycle_state: self.state.clone(),
                provider: "GCP".to_string(),
                region: "WESTERN_EUROPE".to_string(),
                disk_size_gb: Some(40.0),
                members: vec![
                    Self::member("h0", ProcessRole::Secondary),
                    Self::member("h1", ProcessRole::Primary),
                ],
            })
        }

        async fn member_metrics(
            &self,
            member: &MemberRef,
            _window: MeasurementWindow,
        ) -> AtlasResult<HashMap<String, MetricSeries>> {
            self.metric_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_metrics {
                return Err(AtlasError::Decode("truncated body".to_string()));
            }

            let mut metrics = HashMap::new();
            if member.role == ProcessRole::Primary {
                metrics.insert(DISK_PARTITION_IOPS_READ.to_string(), MetricSeries::from_values(&self.read));
                metrics.insert(DISK_PARTITION_IOPS_WRITE.to_string(), MetricSeries::from_values(&self.write));
            } else {
                // Secondaries are busy but must not influence the decision
                metrics.insert(DISK_PARTITION_IOPS_READ.to_string(), MetricSeries::from_values(&[1e6, 1e6]));
                metrics.insert(DISK_PARTITION_IOPS_WRITE.to_string(), MetricSeries::from_values(&[1e6, 1e6]));
            }
            Ok(metrics)
        }
    }

    /// Control plane that records requests
    #[derive(Default)]
    struct FakePlane {
        requests: Mutex<Vec<ResizeRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl ControlPlane for FakePlane {
        async fn resize(&self, request: &ResizeRequest) -> AtlasResult<()> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(AtlasError::Status {
                    status: 409,
                    body: "CLUSTER_ALREADY_UPDATING".to_string(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSink {
        records: Mutex<Vec<MeasurementRecord>>,
    }

    #[async_trait]
    impl MeasurementSink for FakeSink {
        async fn record(&self, records: &[MeasurementRecord]) -> Result<()> {
            self.records.lock().unwrap().extend_from_slice(records);
            Ok(())
        }
    }

    fn build(source: FakeSource, plane: Arc<FakePlane>) -> ControlLoop {
        ControlLoopBuilder::new()
            .project_id("proj")
            .cluster_name("db2")
            .source(Arc::new(source))
            .control_plane(plane)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_scale_up_issues_resize() {
        let plane = Arc::new(FakePlane::default());
        let control = build(FakeSource::new("M30", &[1500.0, 1500.0], &[0.0, 0.0]), plane.clone());

        let outcome = control.run_once().await;

        let TickOutcome::Resized { decision } = &outcome else {
            panic!("expected resize, got {outcome:?}");
        };
        assert_eq!(decision.target, "M40");
        assert_eq!(decision.outcome, Outcome::ScaleUp);

        let requests = plane.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].size_name, "M40");
        assert_eq!(requests[0].cluster_name, "db2");
        assert_eq!(requests[0].provider, "GCP");
        assert_eq!(requests[0].region, "WESTERN_EUROPE");
    }

    #[tokio::test]
    async fn test_steady_load_sends_nothing() {
        let plane = Arc::new(FakePlane::default());
        let control = build(FakeSource::new("M40", &[0.0, 0.0], &[4000.0, 0.0]), plane.clone());

        let outcome = control.run_once().await;

        assert!(matches!(outcome, TickOutcome::Unchanged { ref decision } if decision.outcome == Outcome::Steady));
        assert!(plane.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_change_in_flight_skips_decision() {
        let plane = Arc::new(FakePlane::default());
        let mut source = FakeSource::new("M30", &[1500.0, 1500.0], &[0.0, 0.0]);
        source.state = LifecycleState::Updating;
        let control = build(source, plane.clone());

        let outcome = control.run_once().await;

        assert_eq!(
            outcome,
            TickOutcome::NotQuiescent {
                size: "M30".to_string(),
                state: "UPDATING".to_string()
            }
        );
        assert!(plane.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_iteration() {
        let plane = Arc::new(FakePlane::default());
        let mut source = FakeSource::new("M30", &[1500.0, 1500.0], &[0.0, 0.0]);
        source.fail_state = true;
        let control = build(source, plane.clone());

        let outcome = control.run_once().await;

        assert!(matches!(outcome, TickOutcome::FetchFailed { .. }));
        assert!(plane.requests.lock().unwrap().is_empty());

        let health = control.health().health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_repeated_fetch_failures_stay_degraded() {
        let mut source = FakeSource::new("M30", &[0.0, 0.0], &[0.0, 0.0]);
        source.fail_state = true;
        let control = build(source, Arc::new(FakePlane::default()));

        for _ in 0..UNHEALTHY_AFTER + 1 {
            control.run_once().await;
        }

        let health = control.health().health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::METRICS_SOURCE].consecutive_failures,
            UNHEALTHY_AFTER + 1
        );
    }

    #[tokio::test]
    async fn test_repeated_unknown_size_stays_degraded() {
        let control = build(
            FakeSource::new("M10", &[0.0, 0.0], &[0.0, 0.0]),
            Arc::new(FakePlane::default()),
        );

        for _ in 0..UNHEALTHY_AFTER + 1 {
            control.run_once().await;
        }

        let health = control.health().health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_member_failure_aborts_whole_fetch() {
        let plane = Arc::new(FakePlane::default());
        let mut source = FakeSource::new("M30", &[1500.0, 1500.0], &[0.0, 0.0]);
        source.fail_metrics = true;
        let control = build(source, plane.clone());

        let outcome = control.run_once().await;

        assert!(matches!(outcome, TickOutcome::FetchFailed { ref error } if error.contains("truncated")));
        assert!(plane.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_size_is_reported() {
        let plane = Arc::new(FakePlane::default());
        let control = build(FakeSource::new("M10", &[1500.0, 1500.0], &[0.0, 0.0]), plane.clone());

        let outcome = control.run_once().await;

        assert_eq!(outcome, TickOutcome::UnknownSize { size: "M10".to_string() });
        assert!(plane.requests.lock().unwrap().is_empty());

        let health = control.health().health().await;
        assert_eq!(
            health.components[components::SIZE_CATALOG].status,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_resize_failure_does_not_stop_loop() {
        let plane = Arc::new(FakePlane {
            fail: true,
            ..Default::default()
        });
        let control = build(FakeSource::new("M40", &[0.0, 0.0], &[0.0, 0.0]), plane.clone());

        let first = control.run_once().await;
        let second = control.run_once().await;

        assert!(matches!(first, TickOutcome::ResizeFailed { ref decision, .. } if decision.target == "M30"));
        assert!(matches!(second, TickOutcome::ResizeFailed { .. }));
        // One attempt per tick, no retries within a tick
        assert_eq!(plane.requests.lock().unwrap().len(), 2);
        assert_eq!(control.history().recent().await.len(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_never_resizes() {
        let plane = Arc::new(FakePlane::default());
        let control = ControlLoopBuilder::new()
            .cluster_name("db2")
            .source(Arc::new(FakeSource::new("M30", &[1500.0, 1500.0], &[0.0, 0.0])))
            .control_plane(plane.clone())
            .dry_run(true)
            .build()
            .unwrap();

        let outcome = control.run_once().await;

        assert!(matches!(outcome, TickOutcome::DryRun { ref decision } if decision.target == "M40"));
        assert!(plane.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_is_refetched_every_tick() {
        let plane = Arc::new(FakePlane::default());
        let source = Arc::new(FakeSource::new("M40", &[0.0, 0.0], &[4000.0, 0.0]));
        let control = ControlLoopBuilder::new()
            .cluster_name("db2")
            .source(source.clone())
            .control_plane(plane)
            .build()
            .unwrap();

        control.run_once().await;
        control.run_once().await;

        // Two members per tick
        assert_eq!(source.metric_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_measurements_are_persisted() {
        let sink = Arc::new(FakeSink::default());
        let control = ControlLoopBuilder::new()
            .project_id("proj")
            .cluster_name("db2")
            .source(Arc::new(FakeSource::new("M40", &[0.0, 0.0], &[4000.0, 0.0])))
            .control_plane(Arc::new(FakePlane::default()))
            .sink(sink.clone())
            .build()
            .unwrap();

        control.run_once().await;

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.project_id == "proj" && r.cluster_name == "db2"));
    }

    #[tokio::test]
    async fn test_preflight_marks_ready() {
        let control = build(
            FakeSource::new("M30", &[0.0, 0.0], &[0.0, 0.0]),
            Arc::new(FakePlane::default()),
        );

        assert!(!control.health().readiness().await.ready);
        let state = control.preflight().await.unwrap();
        assert_eq!(state.size_name, "M30");
        assert!(control.health().readiness().await.ready);
    }

    #[tokio::test]
    async fn test_preflight_failure_is_returned() {
        let mut source = FakeSource::new("M30", &[0.0, 0.0], &[0.0, 0.0]);
        source.fail_state = true;
        let control = build(source, Arc::new(FakePlane::default()));

        assert!(control.preflight().await.is_err());
        assert!(!control.health().readiness().await.ready);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let control = ControlLoopBuilder::new()
            .cluster_name("db2")
            .source(Arc::new(FakeSource::new("M40", &[0.0, 0.0], &[4000.0, 0.0])))
            .control_plane(Arc::new(FakePlane::default()))
            .interval(Duration::from_secs(3600))
            .build()
            .unwrap();
        let history = control.history();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(control.run(shutdown_rx));

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop did not stop")
            .unwrap();

        assert_eq!(history.recent().await.len(), 1);
    }

    #[test]
    fn test_builder_requires_collaborators() {
        assert!(ControlLoopBuilder::new().cluster_name("db2").build().is_err());
        assert!(ControlLoopBuilder::new()
            .cluster_name("")
            .source(Arc::new(FakeSource::new("M30", &[], &[])))
            .control_plane(Arc::new(FakePlane::default()))
            .build()
            .is_err());
    }

    #[test]
    fn test_loop_config_default() {
        let config = LoopConfig::default();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.window, MeasurementWindow::LAST_HOUR_BY_MINUTE);
        assert!(!config.dry_run);
    }
}
