//! HTTP API for health checks, Prometheus metrics and recent decisions

use crate::control::{DecisionLog, TickRecord};
use crate::health::{ComponentStatus, HealthRegistry};
use crate::observability::ScalerMetrics;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub cluster_name: String,
    pub dry_run: bool,
    pub health_registry: HealthRegistry,
    pub metrics: ScalerMetrics,
    pub history: DecisionLog,
}

impl AppState {
    pub fn new(
        cluster_name: impl Into<String>,
        health_registry: HealthRegistry,
        metrics: ScalerMetrics,
        history: DecisionLog,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            dry_run: false,
            health_registry,
            metrics,
            history,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Body of `/status`
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub cluster: String,
    pub dry_run: bool,
    pub current_size: Option<String>,
    pub recent: Vec<TickRecord>,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Loop keeps ticking
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once preflight has passed
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Recent tick outcomes, newest last
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let recent = state.history.recent().await;
    let current_size = recent
        .iter()
        .rev()
        .find_map(|record| record.outcome.observed_size().map(str::to_string));

    Json(StatusResponse {
        cluster: state.cluster_name.clone(),
        dry_run: state.dry_run,
        current_size,
        recent,
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
