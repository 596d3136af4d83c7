//! Atlas Autoscaler - vertical autoscaling for a MongoDB Atlas cluster
//!
//! Polls the primary's disk IOPS once per interval and resizes the cluster
//! one tier up or down through the Atlas Admin API.

use anyhow::{Context, Result};
use autoscaler_lib::{
    api,
    atlas::{AtlasClientBuilder, AtlasCredentials},
    catalog::SizeCatalog,
    control::{ControlLoopBuilder, DecisionLog},
    health::HealthRegistry,
    observability::{ScalerMetrics, StructuredLogger},
    sink::JsonLinesSink,
};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const SCALER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

/// Vertical autoscaler for a MongoDB Atlas cluster
#[derive(Parser)]
#[command(name = "atlas-autoscaler")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file, extension optional
    #[arg(long, env = "SCALER_CONFIG", default_value = "settings")]
    config: String,

    /// Decide and log, but never send resize requests
    #[arg(long)]
    dry_run: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "json")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting atlas-autoscaler");

    // Load configuration
    let config = config::ScalerConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config))?;
    info!(
        project_id = %config.target.project_id,
        cluster = %config.target.cluster_name,
        "Autoscaler configured"
    );

    let logger = StructuredLogger::new(&config.target.cluster_name);
    logger.log_startup(SCALER_VERSION, &config.target.project_id, cli.dry_run);

    // Atlas client serves as both metrics source and control plane
    let client = Arc::new(
        AtlasClientBuilder::new(&config.target.project_id, &config.target.cluster_name)
            .base_url(&config.api_access.base_url)
            .credentials(AtlasCredentials {
                public_key: config.api_access.public_key.clone(),
                private_key: config.api_access.private_key.clone(),
            })
            .timeout(config.control.request_timeout())
            .build()
            .context("Failed to build Atlas client")?,
    );

    let health_registry = HealthRegistry::with_default_components().await;
    let metrics = ScalerMetrics::new();
    let history = DecisionLog::new(config.control.history_capacity);

    let mut builder = ControlLoopBuilder::new()
        .project_id(&config.target.project_id)
        .cluster_name(&config.target.cluster_name)
        .source(client.clone())
        .control_plane(client)
        .catalog(Arc::new(SizeCatalog::default()))
        .interval(config.control.poll_interval())
        .dry_run(cli.dry_run)
        .history(history.clone())
        .health(health_registry.clone());

    if let Some(path) = &config.control.measurements_path {
        info!(path = %path.display(), "Recording measurement history");
        builder = builder.sink(Arc::new(JsonLinesSink::new(path)));
    }

    let control_loop = builder.build()?;

    // A cluster we cannot read at startup is a configuration problem
    control_loop
        .preflight()
        .await
        .context("Preflight check against the Atlas API failed")?;

    let app_state = Arc::new(
        api::AppState::new(
            &config.target.cluster_name,
            health_registry,
            metrics,
            history,
        )
        .with_dry_run(cli.dry_run),
    );

    // Start health, metrics and status server
    let api_port = config.api_port;
    let _api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server failed");
        }
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_handle = tokio::spawn(control_loop.run(shutdown_rx));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    // The loop only observes the signal while sleeping
    let _ = shutdown_tx.send(());
    if let Err(e) = loop_handle.await {
        error!(error = %e, "Control loop task failed");
    }

    info!("Shutdown complete");
    Ok(())
}
