//! Atlas Admin API payloads

use crate::models::{LifecycleState, Measurement, MemberRef, MetricSeries, ProcessRole, ResizeRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClusterPayload {
    pub state_name: LifecycleState,
    pub provider_settings: ProviderSettings,
    #[serde(rename = "diskSizeGB")]
    pub disk_size_gb: Option<f64>,
    #[serde(rename = "mongoURI")]
    pub mongo_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProviderSettings {
    pub provider_name: String,
    pub instance_size_name: String,
    pub region_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProcessList {
    pub results: Vec<ProcessPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProcessPayload {
    pub id: String,
    pub user_alias: String,
    pub port: u16,
    pub type_name: String,
    #[serde(default)]
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Link {
    pub rel: String,
    pub href: String,
}

impl ProcessPayload {
    pub fn alias(&self) -> String {
        format!("{}:{}", self.user_alias, self.port)
    }

    /// The monitoring endpoint of a process is its `self` link
    pub fn self_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == "self")
            .map(|l| l.href.as_str())
    }

    pub fn into_member(self) -> Option<MemberRef> {
        let locator = self.self_link()?.to_string();
        Some(MemberRef {
            alias: self.alias(),
            role: ProcessRole::from_type_name(&self.type_name),
            id: self.id,
            locator,
        })
    }
}

/// Body of a `/measurements` response
#[derive(Debug, Clone, Deserialize)]
pub struct MeasurementsPayload {
    pub measurements: Vec<RawMeasurement>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMeasurement {
    pub name: String,
    #[serde(default)]
    pub data_points: Vec<RawDataPoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDataPoint {
    pub timestamp: Option<DateTime<Utc>>,
    pub value: Option<f64>,
}

impl MeasurementsPayload {
    /// Convert to metric series, dropping data points without a value
    pub fn into_series(self) -> HashMap<String, MetricSeries> {
        self.measurements
            .into_iter()
            .map(|m| {
                let series = m
                    .data_points
                    .into_iter()
                    .filter_map(|p| p.value.map(|v| Measurement::new(p.timestamp, v)))
                    .collect();
                (m.name, series)
            })
            .collect()
    }
}

/// PATCH body for a resize. Atlas does not accept the size name alone.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResizeBody {
    pub provider_settings: ProviderSettings,
}

impl From<&ResizeRequest> for ResizeBody {
    fn from(request: &ResizeRequest) -> Self {
        Self {
            provider_settings: ProviderSettings {
                provider_name: request.provider.clone(),
                instance_size_name: request.size_name.clone(),
                region_name: request.region.clone(),
            },
        }
    }
}

/// Extract the `host:port` of every replica-set member from a connection
/// string such as `mongodb://h0:27017,h1:27017/?ssl=true`
pub fn parse_replica_set_members(uri: &str) -> HashSet<String> {
    let rest = uri
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(uri);
    // Drop credentials, then the database path and options
    let rest = rest.rsplit_once('@').map(|(_, hosts)| hosts).unwrap_or(rest);
    let hosts = rest.split(['/', '?']).next().unwrap_or_default();

    hosts
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}
