//! Per-tick cluster snapshot

use crate::atlas::{MeasurementWindow, MetricsSource};
use crate::error::Result;
use crate::models::{Cluster, Process};

/// Fetch cluster state and every member's measurements into a fresh snapshot.
/// Any failure aborts the whole fetch; a partial snapshot is never returned.
pub async fn fetch_snapshot(
    source: &dyn MetricsSource,
    cluster_name: &str,
    window: MeasurementWindow,
) -> Result<Cluster> {
    let state = source.cluster_state().await?;

    let mut processes = Vec::with_capacity(state.members.len());
    for member in state.members {
        let metrics = source.member_metrics(&member, window).await?;
        processes.push(Process::new(member, metrics));
    }

    Ok(Cluster {
        name: cluster_name.to_string(),
        size_name: state.size_name,
        lifecycle_state: state.lifecycle_state,
        provider: state.provider,
        region: state.region,
        disk_size_gb: state.disk_size_gb,
        processes,
    })
}
