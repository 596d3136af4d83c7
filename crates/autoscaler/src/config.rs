//! Autoscaler configuration

use anyhow::{bail, Result};
use autoscaler_lib::atlas::DEFAULT_BASE_URL;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix, e.g. `SCALER__TARGET__CLUSTER_NAME`
const ENV_PREFIX: &str = "SCALER";

/// Autoscaler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScalerConfig {
    /// Cluster being scaled
    pub target: TargetConfig,

    /// Atlas API access
    pub api_access: ApiAccessConfig,

    /// Control loop tuning
    #[serde(default)]
    pub control: ControlConfig,

    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub project_id: String,
    pub cluster_name: String,
}

#[derive(Clone, Deserialize)]
pub struct ApiAccessConfig {
    pub public_key: String,

    /// Without a private key requests are sent unauthenticated
    #[serde(default)]
    pub private_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl std::fmt::Debug for ApiAccessConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiAccessConfig")
            .field("public_key", &self.public_key)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Sleep between iterations in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Tick records kept for `/status`
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// JSON lines file receiving raw member measurements
    #[serde(default)]
    pub measurements_path: Option<PathBuf>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
            history_capacity: default_history_capacity(),
            measurements_path: None,
        }
    }
}

impl ControlConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_api_port() -> u16 {
    8080
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_poll_interval() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

fn default_history_capacity() -> usize {
    autoscaler_lib::control::DEFAULT_HISTORY_CAPACITY
}

impl ScalerConfig {
    /// Load configuration from an optional file, then the environment
    pub fn load(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: ScalerConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target.project_id.trim().is_empty() {
            bail!("target.project_id must not be empty");
        }
        if self.target.cluster_name.trim().is_empty() {
            bail!("target.cluster_name must not be empty");
        }
        if self.api_access.public_key.trim().is_empty() {
            bail!("api_access.public_key must not be empty");
        }
        if self.control.poll_interval_secs == 0 {
            bail!("control.poll_interval_secs must be positive");
        }
        Ok(())
    }
}
