//! Measurement history sink
//!
//! Raw member measurements are written out once per tick for audit. The
//! autoscaler never reads them back, and a failing sink never aborts a tick.

use crate::models::{Cluster, MetricSeries, Process};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Measurements of one member captured during one tick
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementRecord {
    pub event_time: DateTime<Utc>,
    pub project_id: String,
    pub cluster_name: String,
    /// `host:port` of the member
    pub process_and_port: String,
    pub state: String,
    #[serde(rename = "diskSizeGB")]
    pub disk_size_gb: Option<f64>,
    pub measurements: BTreeMap<String, MetricSeries>,
}

impl MeasurementRecord {
    pub fn capture(project_id: &str, cluster: &Cluster, process: &Process, at: DateTime<Utc>) -> Self {
        Self {
            event_time: at,
            project_id: project_id.to_string(),
            cluster_name: cluster.name.clone(),
            process_and_port: process.alias.clone(),
            state: cluster.lifecycle_state.to_string(),
            disk_size_gb: cluster.disk_size_gb,
            measurements: process
                .metrics
                .iter()
                .map(|(name, series)| (name.clone(), series.clone()))
                .collect(),
        }
    }
}

/// Destination for measurement history
#[async_trait]
pub trait MeasurementSink: Send + Sync {
    async fn record(&self, records: &[MeasurementRecord]) -> Result<()>;
}

/// Appends one JSON document per line to a file
pub struct JsonLinesSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MeasurementSink for JsonLinesSink {
    async fn record(&self, records: &[MeasurementRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record).context("Failed to serialize measurement record")?;
            buf.push(b'\n');
        }

        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create measurement history directory")?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;

        file.write_all(&buf)
            .await
            .context("Failed to write measurement records")?;
        file.flush().await?;

        debug!(
            path = %self.path.display(),
            records = records.len(),
            "Wrote measurement history"
        );
        Ok(())
    }
}
