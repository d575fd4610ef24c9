//! Docker Engine HTTP API client.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::strip_tag;

use super::{
    ContainerEngine, ContainerFilter, ContainerState, ContainerSummary, EngineConnector,
    EngineError, RunSpec, VolumeSpec, VolumeSummary,
};

/// Engine session backed by a Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    client: Client,
    base_url: String,
    ping_timeout: Duration,
}

impl DockerEngine {
    /// Create a client for a daemon address (`tcp://`, `http://` or `https://`).
    ///
    /// `timeout` bounds connecting and the ping only. Pulls and container
    /// operations run as long as the daemon needs.
    pub fn new(daemon_address: &str, timeout: Duration) -> Result<Self, EngineError> {
        let base_url = http_base_url(daemon_address)?;
        let client = Client::builder()
            .timeout(None::<Duration>)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            ping_timeout: timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map non-success responses to [`EngineError`].
    fn check(&self, response: Response) -> Result<Response, EngineError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        let message = serde_json::from_str::<ApiMessage>(&body)
            .map(|m| m.message)
            .unwrap_or(body);

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(EngineError::NotFound(message));
        }

        Err(EngineError::Api {
            status: status.as_u16(),
            message,
        })
    }

    fn start_container(&self, id: &str) -> Result<(), EngineError> {
        let response = self
            .client
            .post(self.url(&format!("/containers/{}/start", id)))
            .send()?;
        self.check(response)?;
        Ok(())
    }
}

/// Rewrite a daemon address into an HTTP base URL.
pub fn http_base_url(daemon_address: &str) -> Result<String, EngineError> {
    let address = daemon_address.trim().trim_end_matches('/');
    if let Some(rest) = address.strip_prefix("tcp://") {
        return Ok(format!("http://{}", rest));
    }
    if address.starts_with("http://") || address.starts_with("https://") {
        return Ok(address.to_string());
    }
    if address.contains("://") || address.is_empty() {
        return Err(EngineError::InvalidAddress(daemon_address.to_string()));
    }
    Ok(format!("http://{}", address))
}

/// Split `repo[:tag]` for the pull endpoint.
fn split_image(image: &str) -> (&str, &str) {
    let base = strip_tag(image);
    match image.get(base.len()..).and_then(|rest| rest.strip_prefix(':')) {
        Some(tag) if !tag.is_empty() => (base, tag),
        _ => (base, "latest"),
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerListEntry {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    image: String,
    #[serde(default)]
    state: String,
}

impl From<ContainerListEntry> for ContainerSummary {
    fn from(entry: ContainerListEntry) -> Self {
        let name = entry
            .names
            .first()
            .map(|name| name.trim_start_matches('/').to_string())
            .unwrap_or_default();
        ContainerSummary {
            id: entry.id,
            name,
            image: entry.image,
            state: ContainerState::parse(&entry.state),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatedContainer {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeEntry {
    name: String,
    #[serde(default)]
    driver: String,
    #[serde(default)]
    options: Option<BTreeMap<String, String>>,
}

impl From<VolumeEntry> for VolumeSummary {
    fn from(entry: VolumeEntry) -> Self {
        VolumeSummary {
            name: entry.name,
            driver: entry.driver,
            options: entry.options.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeList {
    #[serde(default)]
    volumes: Option<Vec<VolumeEntry>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateVolumeBody<'a> {
    name: &'a str,
    driver: &'a str,
    driver_opts: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HostPort {
    host_port: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct HostConfig {
    binds: Vec<String>,
    privileged: bool,
    network_mode: String,
    auto_remove: bool,
    port_bindings: HashMap<String, Vec<HostPort>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateContainerBody {
    image: String,
    env: Vec<String>,
    exposed_ports: HashMap<String, Value>,
    host_config: HostConfig,
}

impl From<&RunSpec> for CreateContainerBody {
    fn from(spec: &RunSpec) -> Self {
        let binds = spec
            .mounts
            .iter()
            .map(|mount| format!("{}:{}:rw", mount.volume, mount.target))
            .collect();

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for binding in &spec.ports {
            let key = format!("{}/tcp", binding.port);
            exposed_ports.insert(key.clone(), json!({}));
            port_bindings.insert(
                key,
                vec![HostPort {
                    host_port: binding.port.to_string(),
                }],
            );
        }

        CreateContainerBody {
            image: spec.image.clone(),
            env: spec.env.clone(),
            exposed_ports,
            host_config: HostConfig {
                binds,
                privileged: spec.privileged,
                network_mode: spec.network_mode.clone(),
                auto_remove: spec.auto_remove,
                port_bindings,
            },
        }
    }
}

/// Docker's `filters` query parameter.
fn filters_param(filter: &ContainerFilter) -> String {
    let mut filters: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    if let Some(name) = &filter.name {
        filters.insert("name", vec![format!("^/{}$", name)]);
    }
    if let Some(ancestor) = &filter.ancestor {
        filters.insert("ancestor", vec![ancestor.clone()]);
    }
    if let Some(state) = filter.state {
        filters.insert("status", vec![state.as_str().to_string()]);
    }
    json!(filters).to_string()
}

// =============================================================================
// ContainerEngine
// =============================================================================

impl ContainerEngine for DockerEngine {
    fn ping(&self) -> Result<(), EngineError> {
        let response = self
            .client
            .get(self.url("/_ping"))
            .timeout(self.ping_timeout)
            .send()?;
        self.check(response)?;
        Ok(())
    }

    fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerSummary>, EngineError> {
        let response = self
            .client
            .get(self.url("/containers/json"))
            .query(&[("all", "true"), ("filters", filters_param(filter).as_str())])
            .send()?;
        let entries: Vec<ContainerListEntry> = self.check(response)?.json()?;

        // The daemon's name filter is a regex; re-check locally.
        Ok(entries
            .into_iter()
            .map(ContainerSummary::from)
            .filter(|container| {
                filter
                    .name
                    .as_ref()
                    .is_none_or(|name| &container.name == name)
            })
            .collect())
    }

    fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        let response = self
            .client
            .delete(self.url(&format!("/containers/{}", id)))
            .query(&[("v", "false"), ("force", "true")])
            .send()?;
        self.check(response)?;
        Ok(())
    }

    fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        let (repo, tag) = split_image(image);
        debug!(image = %image, "Pulling image");

        let response = self
            .client
            .post(self.url("/images/create"))
            .query(&[("fromImage", repo), ("tag", tag)])
            .send()?;
        let body = self.check(response)?.text()?;

        // Progress is streamed as JSON lines; failures arrive in-band.
        for line in body.lines().filter(|line| !line.trim().is_empty()) {
            if let Ok(progress) = serde_json::from_str::<Value>(line) {
                if let Some(error) = progress.get("error").and_then(Value::as_str) {
                    return Err(EngineError::Api {
                        status: 500,
                        message: error.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn run_container(&self, spec: &RunSpec) -> Result<ContainerSummary, EngineError> {
        let body = CreateContainerBody::from(spec);
        let response = self
            .client
            .post(self.url("/containers/create"))
            .query(&[("name", spec.name.as_str())])
            .json(&body)
            .send()?;
        let created: CreatedContainer = self.check(response)?.json()?;

        self.start_container(&created.id)?;

        Ok(ContainerSummary {
            id: created.id,
            name: spec.name.clone(),
            image: spec.image.clone(),
            state: ContainerState::Running,
        })
    }

    fn list_volumes(&self) -> Result<Vec<VolumeSummary>, EngineError> {
        let response = self.client.get(self.url("/volumes")).send()?;
        let list: VolumeList = self.check(response)?.json()?;
        Ok(list
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(VolumeSummary::from)
            .collect())
    }

    fn inspect_volume(&self, name: &str) -> Result<Option<VolumeSummary>, EngineError> {
        let response = self
            .client
            .get(self.url(&format!("/volumes/{}", name)))
            .send()?;
        match self.check(response) {
            Ok(response) => {
                let entry: VolumeEntry = response.json()?;
                Ok(Some(entry.into()))
            }
            Err(EngineError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create_volume(&self, spec: &VolumeSpec) -> Result<VolumeSummary, EngineError> {
        let body = CreateVolumeBody {
            name: &spec.name,
            driver: &spec.driver,
            driver_opts: &spec.options,
        };
        let response = self
            .client
            .post(self.url("/volumes/create"))
            .json(&body)
            .send()?;
        let entry: VolumeEntry = self.check(response)?.json()?;
        Ok(entry.into())
    }

    fn remove_volume(&self, name: &str) -> Result<(), EngineError> {
        let response = self
            .client
            .delete(self.url(&format!("/volumes/{}", name)))
            .query(&[("force", "true")])
            .send()?;
        self.check(response)?;
        Ok(())
    }
}

/// Opens [`DockerEngine`] sessions, pinging the daemon once to confirm it answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerConnector;

impl EngineConnector for DockerConnector {
    fn connect(
        &self,
        daemon_address: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn ContainerEngine>, EngineError> {
        let engine = DockerEngine::new(daemon_address, timeout)?;
        engine.ping().map_err(|e| EngineError::Unreachable {
            address: daemon_address.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Arc::new(engine))
    }
}
