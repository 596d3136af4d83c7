//! Atlas Admin API collaborators
//!
//! The control loop only sees the [`MetricsSource`] and [`ControlPlane`]
//! traits. [`AtlasClient`] implements both against the Atlas Admin API v1.0.

mod client;
mod digest;
mod wire;

#[cfg(test)]
mod tests;

pub use client::{AtlasClient, AtlasClientBuilder, AtlasCredentials, DEFAULT_BASE_URL};
pub use digest::{DigestChallenge, DigestCredentials};
pub use wire::{parse_replica_set_members, MeasurementsPayload};

use crate::error::Result;
use crate::models::{ClusterState, MemberRef, MetricSeries, ResizeRequest};
use std::collections::HashMap;

pub use async_trait::async_trait;

/// Granularity and lookback of a measurement query (ISO-8601 durations)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementWindow {
    pub granularity: &'static str,
    pub period: &'static str,
}

impl MeasurementWindow {
    /// One-minute samples over the last hour
    pub const LAST_HOUR_BY_MINUTE: MeasurementWindow = MeasurementWindow {
        granularity: "PT1M",
        period: "PT1H",
    };
}

impl Default for MeasurementWindow {
    fn default() -> Self {
        Self::LAST_HOUR_BY_MINUTE
    }
}

/// Source of cluster state and per-member measurements
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Current size, lifecycle state and members of the target cluster
    async fn cluster_state(&self) -> Result<ClusterState>;

    /// Measurement series of one member, keyed by metric name
    async fn member_metrics(
        &self,
        member: &MemberRef,
        window: MeasurementWindow,
    ) -> Result<HashMap<String, MetricSeries>>;
}

/// Control plane accepting resize requests
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn resize(&self, request: &ResizeRequest) -> Result<()>;
}
