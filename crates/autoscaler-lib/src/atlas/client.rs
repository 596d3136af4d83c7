//! HTTP client for the Atlas Admin API

use super::digest::{DigestChallenge, DigestCredentials};
use super::wire::{
    parse_replica_set_members, ClusterPayload, MeasurementsPayload, ProcessList, ResizeBody,
};
use super::{async_trait, ControlPlane, MeasurementWindow, MetricsSource};
use crate::error::{AtlasError, Result};
use crate::models::{ClusterState, MemberRef, MetricSeries, ResizeRequest};
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Public Atlas Admin API v1.0 endpoint
pub const DEFAULT_BASE_URL: &str = "https://cloud.mongodb.com/api/atlas/v1.0";

/// Partition whose disk measurements carry the IOPS series
const DATA_PARTITION: &str = "data";

/// Programmatic API key
#[derive(Debug, Clone)]
pub struct AtlasCredentials {
    pub public_key: String,
    pub private_key: Option<String>,
}

/// Atlas Admin API client bound to one project and cluster
pub struct AtlasClient {
    client: Client,
    base_url: String,
    project_id: String,
    cluster_name: String,
    credentials: Option<DigestCredentials>,
}

impl AtlasClient {
    fn project_url(&self) -> String {
        format!("{}/groups/{}", self.base_url, self.project_id)
    }

    fn cluster_url(&self) -> Result<Url> {
        Ok(Url::parse(&format!(
            "{}/clusters/{}",
            self.project_url(),
            self.cluster_name
        ))?)
    }

    fn processes_url(&self) -> Result<Url> {
        Ok(Url::parse(&format!("{}/processes", self.project_url()))?)
    }

    /// Measurements endpoint below a process locator
    fn measurements_url(locator: &str, suffix: &str, window: MeasurementWindow) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{}", locator.trim_end_matches('/'), suffix))?;
        url.query_pairs_mut()
            .append_pair("granularity", window.granularity)
            .append_pair("period", window.period);
        Ok(url)
    }

    /// Send a request, answering a digest challenge once if the server asks
    async fn send(&self, method: Method, url: Url, body: Option<&serde_json::Value>) -> Result<Response> {
        let response = self.request(method.clone(), url.clone(), body, None).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response).await;
        }

        let Some(credentials) = &self.credentials else {
            return check_status(response).await;
        };

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AtlasError::Auth("401 without WWW-Authenticate".to_string()))?;
        let challenge = DigestChallenge::parse(challenge)?;

        let uri = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        let authorization = challenge.respond(credentials, method.as_str(), &uri);

        let response = self.request(method, url, body, Some(authorization)).await?;
        check_status(response).await
    }

    async fn request(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
        authorization: Option<String>,
    ) -> Result<Response> {
        let mut builder = self.client.request(method, url);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        if let Some(authorization) = authorization {
            builder = builder.header(AUTHORIZATION, authorization);
        }
        Ok(builder.send().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(url = %url, "GET");
        let response = self.send(Method::GET, url, None).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| AtlasError::Decode(e.to_string()))
    }

    /// Members of the target cluster: project processes filtered by the
    /// hosts listed in the cluster's connection string
    async fn members(&self, mongo_uri: &str) -> Result<Vec<MemberRef>> {
        let hosts = parse_replica_set_members(mongo_uri);
        let processes: ProcessList = self.get_json(self.processes_url()?).await?;

        let mut members = Vec::new();
        for process in processes.results {
            if !hosts.contains(&process.alias()) {
                continue;
            }
            let id = process.id.clone();
            match process.into_member() {
                Some(member) => members.push(member),
                None => warn!(process_id = %id, "Process has no monitoring link, skipping"),
            }
        }

        Ok(members)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(AtlasError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl MetricsSource for AtlasClient {
    async fn cluster_state(&self) -> Result<ClusterState> {
        let cluster: ClusterPayload = self.get_json(self.cluster_url()?).await?;
        let members = self.members(&cluster.mongo_uri).await?;

        Ok(ClusterState {
            size_name: cluster.provider_settings.instance_size_name,
            lifecycle_state: cluster.state_name,
            provider: cluster.provider_settings.provider_name,
            region: cluster.provider_settings.region_name,
            disk_size_gb: cluster.disk_size_gb,
            members,
        })
    }

    async fn member_metrics(
        &self,
        member: &MemberRef,
        window: MeasurementWindow,
    ) -> Result<HashMap<String, MetricSeries>> {
        let process_url = Self::measurements_url(&member.locator, "measurements", window)?;
        let disk_url = Self::measurements_url(
            &member.locator,
            &format!("disks/{DATA_PARTITION}/measurements"),
            window,
        )?;

        let process: MeasurementsPayload = self.get_json(process_url).await?;
        let disk: MeasurementsPayload = self.get_json(disk_url).await?;

        let mut metrics = process.into_series();
        metrics.extend(disk.into_series());
        Ok(metrics)
    }
}

#[async_trait]
impl ControlPlane for AtlasClient {
    async fn resize(&self, request: &ResizeRequest) -> Result<()> {
        let body = serde_json::to_value(ResizeBody::from(request))
            .map_err(|e| AtlasError::Decode(e.to_string()))?;

        self.send(Method::PATCH, self.cluster_url()?, Some(&body)).await?;

        info!(
            cluster = %request.cluster_name,
            size = %request.size_name,
            "Resize request accepted"
        );
        Ok(())
    }
}

/// Builder for [`AtlasClient`]
pub struct AtlasClientBuilder {
    project_id: String,
    cluster_name: String,
    base_url: String,
    credentials: Option<AtlasCredentials>,
    timeout: Duration,
}

impl AtlasClientBuilder {
    pub fn new(project_id: impl Into<String>, cluster_name: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            cluster_name: cluster_name.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            credentials: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Override the API base URL
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn credentials(mut self, credentials: AtlasCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<AtlasClient> {
        // Validate early so a bad base URL is a startup error
        Url::parse(&self.base_url)?;

        let client = Client::builder().timeout(self.timeout).build()?;

        let credentials = self.credentials.and_then(|c| {
            c.private_key.map(|password| DigestCredentials {
                username: c.public_key,
                password,
            })
        });

        Ok(AtlasClient {
            client,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            project_id: self.project_id,
            cluster_name: self.cluster_name,
            credentials,
        })
    }
}
