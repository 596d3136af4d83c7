//! Core data models for the autoscaler
//!
//! A [`Cluster`] is a snapshot of one control-loop tick. It is built from
//! scratch every iteration and dropped at the end of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Read IOPS on the data partition
pub const DISK_PARTITION_IOPS_READ: &str = "DISK_PARTITION_IOPS_READ";
/// Write IOPS on the data partition
pub const DISK_PARTITION_IOPS_WRITE: &str = "DISK_PARTITION_IOPS_WRITE";
/// Combined IOPS on the data partition
pub const DISK_PARTITION_IOPS_TOTAL: &str = "DISK_PARTITION_IOPS_TOTAL";

/// A single sample of one metric on one process
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub timestamp: Option<DateTime<Utc>>,
    pub value: f64,
}

impl Measurement {
    pub fn new(timestamp: Option<DateTime<Utc>>, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// A sample without a timestamp
    pub fn value(value: f64) -> Self {
        Self {
            timestamp: None,
            value,
        }
    }
}

/// Samples of one metric in the order the source returned them (oldest first)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSeries(Vec<Measurement>);

impl MetricSeries {
    pub fn new(samples: Vec<Measurement>) -> Self {
        Self(samples)
    }

    /// Build a series from bare values, without timestamps
    pub fn from_values(values: &[f64]) -> Self {
        Self(values.iter().copied().map(Measurement::value).collect())
    }

    /// The most recent `n` samples, or fewer if the series is shorter
    pub fn tail(&self, n: usize) -> &[Measurement] {
        let start = self.0.len().saturating_sub(n);
        &self.0[start..]
    }

    pub fn samples(&self) -> &[Measurement] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Measurement> for MetricSeries {
    fn from_iter<I: IntoIterator<Item = Measurement>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Role of a replica-set member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRole {
    Primary,
    Secondary,
    Other,
}

impl ProcessRole {
    /// Map an Atlas process `typeName` to a role
    pub fn from_type_name(type_name: &str) -> Self {
        match type_name {
            "REPLICA_PRIMARY" => ProcessRole::Primary,
            "REPLICA_SECONDARY" => ProcessRole::Secondary,
            _ => ProcessRole::Other,
        }
    }
}

/// A member of the cluster as reported by the metrics source, before its
/// measurements are fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRef {
    pub id: String,
    /// `host:port`
    pub alias: String,
    /// Monitoring endpoint used to query this member's measurements
    pub locator: String,
    pub role: ProcessRole,
}

/// One replica-set member with its measurements for this tick
#[derive(Debug, Clone, PartialEq)]
pub struct Process {
    pub id: String,
    pub alias: String,
    pub locator: String,
    pub role: ProcessRole,
    pub metrics: HashMap<String, MetricSeries>,
}

impl Process {
    pub fn new(member: MemberRef, metrics: HashMap<String, MetricSeries>) -> Self {
        Self {
            id: member.id,
            alias: member.alias,
            locator: member.locator,
            role: member.role,
            metrics,
        }
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSeries> {
        self.metrics.get(name)
    }

    pub fn is_primary(&self) -> bool {
        self.role == ProcessRole::Primary
    }
}

/// Operational state reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Idle,
    Creating,
    Updating,
    Deleting,
    Deleted,
    Repairing,
    #[serde(other)]
    Unknown,
}

impl LifecycleState {
    /// Only a quiescent cluster may receive a new resize request
    pub fn is_quiescent(&self) -> bool {
        matches!(self, LifecycleState::Idle)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "IDLE",
            LifecycleState::Creating => "CREATING",
            LifecycleState::Updating => "UPDATING",
            LifecycleState::Deleting => "DELETING",
            LifecycleState::Deleted => "DELETED",
            LifecycleState::Repairing => "REPAIRING",
            LifecycleState::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cluster-level state returned by the metrics source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    pub size_name: String,
    pub lifecycle_state: LifecycleState,
    pub provider: String,
    pub region: String,
    pub disk_size_gb: Option<f64>,
    pub members: Vec<MemberRef>,
}

/// Snapshot of the target cluster for a single tick
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub name: String,
    pub size_name: String,
    pub lifecycle_state: LifecycleState,
    pub provider: String,
    pub region: String,
    pub disk_size_gb: Option<f64>,
    pub processes: Vec<Process>,
}

impl Cluster {
    /// The first primary in snapshot order. Later primaries are ignored.
    pub fn primary(&self) -> Option<&Process> {
        self.processes.iter().find(|p| p.is_primary())
    }

    /// Build the resize request for moving this cluster to `size_name`
    pub fn resize_to(&self, size_name: &str) -> ResizeRequest {
        ResizeRequest {
            cluster_name: self.name.clone(),
            provider: self.provider.clone(),
            region: self.region.clone(),
            size_name: size_name.to_string(),
        }
    }
}

/// Request to change a cluster's provisioned size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub cluster_name: String,
    pub provider: String,
    pub region: String,
    pub size_name: String,
}
