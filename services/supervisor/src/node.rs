//! Node manager.
//!
//! A [`Node`] is the supervisor's handle on one remote host. It tracks
//! reachability, owns the container engine session and drives the device
//! container and its volumes through their lifecycle:
//!
//! ```text
//! connect ──► is_live ──► stop_container ──► create_volume* ──► run_container
//!    │            │
//!    └─ Unreachable / EngineUnreachable (warning, node skipped)
//! ```
//!
//! Engine calls are blocking and always go through the context's worker pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use convoy_protocol::{MessageCode, Reporter};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{qualify_image, strip_tag, FleetConfig, NodeConfig, VolumeConfig};
use crate::context::FleetContext;
use crate::engine::{
    ContainerEngine, ContainerFilter, ContainerState, ContainerSummary, EngineError,
    PortBinding, RunSpec, VolumeMount, VolumeSpec, VolumeSummary,
};

/// Placeholder reported when a value is not available.
const NOT_AVAILABLE: &str = "NA";

// =============================================================================
// Errors
// =============================================================================

/// Errors from node operations. Every variant names the node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node {node} ({address}) is not pinging back")]
    Unreachable { node: String, address: String },

    #[error("container engine on node {node} is not reachable: {source}")]
    EngineUnreachable {
        node: String,
        #[source]
        source: EngineError,
    },

    #[error("node {node} has no container engine session")]
    NoEngine { node: String },

    #[error("node {node} is not live")]
    NotLive { node: String },

    #[error("node {node}: {source}")]
    Engine {
        node: String,
        #[source]
        source: EngineError,
    },

    #[error("node {node}: volume {volume} does not exist")]
    VolumeMissing { node: String, volume: String },

    #[error("node {node}: volume {volume} has no device to mount")]
    NoMountTarget { node: String, volume: String },
}

impl NodeError {
    /// Returns true for host or engine connectivity failures.
    pub fn is_connectivity(&self) -> bool {
        match self {
            NodeError::Unreachable { .. }
            | NodeError::EngineUnreachable { .. }
            | NodeError::NoEngine { .. }
            | NodeError::NotLive { .. } => true,
            NodeError::Engine { source, .. } => source.is_connectivity(),
            _ => false,
        }
    }

    /// The node the error is about.
    pub fn node(&self) -> &str {
        match self {
            NodeError::Unreachable { node, .. }
            | NodeError::EngineUnreachable { node, .. }
            | NodeError::NoEngine { node }
            | NodeError::NotLive { node }
            | NodeError::Engine { node, .. }
            | NodeError::VolumeMissing { node, .. }
            | NodeError::NoMountTarget { node, .. } => node,
        }
    }
}

// =============================================================================
// Types
// =============================================================================

/// Result of the most recent probes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Liveness {
    pub reachable: bool,
    pub engine_live: bool,
    pub checked_at: Option<DateTime<Utc>>,
}

/// Which containers `stop_container` clears before the exact-name removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOptions {
    /// Remove stopped containers with the same name.
    pub remove_exited: bool,
    /// Remove every running container started from the same base image.
    pub evict_image_conflicts: bool,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            remove_exited: true,
            evict_image_conflicts: false,
        }
    }
}

/// What to run on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image without registry.
    pub image: String,
    pub registry: Option<String>,
    /// Named volumes to mount at their device path.
    pub volumes: Vec<String>,
    pub privileged: bool,
    /// `KEY=VALUE` pairs.
    pub env: Vec<String>,
    /// Ports published on the same host port.
    pub ports: Vec<u16>,
}

impl ContainerSpec {
    /// The device container for one node.
    pub fn for_node(config: &FleetConfig, node: &str, port: u16) -> Self {
        let mut env = vec![format!("DEVICE_NAME={}", node)];
        env.extend(config.container_env.iter().cloned());

        Self {
            image: config.image.clone(),
            registry: config.registry.clone(),
            volumes: config.volumes.keys().cloned().collect(),
            privileged: config.privileged,
            env,
            ports: vec![port],
        }
    }

    pub fn qualified_image(&self) -> String {
        qualify_image(&self.image, self.registry.as_deref())
    }
}

/// Outcome of [`Node::report_status`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStatus {
    pub name: String,
    pub address: String,
    pub daemon_address: String,
    pub reachable: bool,
    pub engine_live: bool,
    /// Short id of the single running device container, if exactly one runs.
    pub container: Option<String>,
    /// Presence of each configured volume, when volumes were checked.
    pub volumes: BTreeMap<String, bool>,
}

impl NodeStatus {
    /// The `node` keyword tuple.
    pub fn node_keyword(&self) -> Vec<Value> {
        vec![
            json!(self.name),
            json!(self.address),
            json!(self.daemon_address),
            json!(self.reachable),
            json!(self.engine_live),
        ]
    }
}

// =============================================================================
// Node
// =============================================================================

/// Handle on one remote host.
pub struct Node {
    pub name: String,
    pub address: String,
    pub daemon_address: String,
    pub category: Option<String>,
    /// Port the device process listens on.
    pub device_port: u16,
    /// Login used for remote shell commands; the local user when unset.
    pub user: Option<String>,
    pub enabled: bool,
    liveness: Liveness,
    engine: Option<Arc<dyn ContainerEngine>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("daemon_address", &self.daemon_address)
            .field("category", &self.category)
            .field("enabled", &self.enabled)
            .field("liveness", &self.liveness)
            .field("connected", &self.engine.is_some())
            .finish()
    }
}

impl Node {
    /// Create an enabled node with no engine session.
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        daemon_address: impl Into<String>,
        category: Option<String>,
        device_port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            daemon_address: daemon_address.into(),
            category,
            device_port,
            user: None,
            enabled: true,
            liveness: Liveness::default(),
            engine: None,
        }
    }

    pub fn from_config(name: &str, config: &NodeConfig) -> Self {
        let mut node = Self::new(
            name,
            config.host.clone(),
            config.daemon_address(),
            config.category.clone(),
            config.port,
        );
        node.user = config.user.clone();
        node
    }

    /// `user@address`, or the bare address without a configured user.
    pub fn ssh_target(&self) -> String {
        match self.user.as_deref() {
            Some(user) if !user.is_empty() => format!("{}@{}", user, self.address),
            _ => self.address.clone(),
        }
    }

    /// Drop the engine session.
    pub fn disconnect(&mut self) {
        if self.engine.take().is_some() {
            debug!(node = %self.name, "Dropped container engine session");
        }
        self.liveness.engine_live = false;
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    fn engine(&self) -> Result<Arc<dyn ContainerEngine>, NodeError> {
        self.engine.clone().ok_or_else(|| NodeError::NoEngine {
            node: self.name.clone(),
        })
    }

    /// Run one blocking engine call on the worker pool.
    async fn call<T, F>(&self, ctx: &FleetContext, f: F) -> Result<T, NodeError>
    where
        F: FnOnce(&dyn ContainerEngine) -> Result<T, EngineError> + Send + 'static,
        T: Send + 'static,
    {
        let engine = self.engine()?;
        ctx.pool
            .run(move || f(engine.as_ref()))
            .await
            .map_err(|source| NodeError::Engine {
                node: self.name.clone(),
                source,
            })
    }

    fn touch(&mut self) {
        self.liveness.checked_at = Some(Utc::now());
    }

    /// Probe the host; updates the cached liveness.
    pub async fn ping(&mut self, ctx: &FleetContext) -> bool {
        let reachable = ctx
            .prober
            .ping(&self.address, ctx.config.ping_timeout())
            .await;
        self.liveness.reachable = reachable;
        if !reachable {
            self.liveness.engine_live = false;
        }
        self.touch();
        reachable
    }

    /// Ping the engine session; a timeout counts as not live.
    pub async fn engine_ping(&mut self, ctx: &FleetContext) -> bool {
        let live = match self.engine.clone() {
            Some(engine) => {
                let timeout = ctx.config.engine_ping_timeout();
                let call = ctx.pool.run(move || engine.ping());
                matches!(tokio::time::timeout(timeout, call).await, Ok(Ok(())))
            }
            None => false,
        };
        self.liveness.engine_live = live;
        self.touch();
        live
    }

    /// Probe the host, then open an engine session.
    pub async fn connect(&mut self, ctx: &FleetContext) -> Result<(), NodeError> {
        if !self.ping(ctx).await {
            return Err(NodeError::Unreachable {
                node: self.name.clone(),
                address: self.address.clone(),
            });
        }

        let connector = ctx.engines.clone();
        let daemon = self.daemon_address.clone();
        let timeout = ctx.config.engine_connect_timeout();

        match ctx.pool.run(move || connector.connect(&daemon, timeout)).await {
            Ok(engine) => {
                self.engine = Some(engine);
                self.liveness.engine_live = true;
                info!(node = %self.name, daemon = %self.daemon_address, "Connected to container engine");
                Ok(())
            }
            Err(source) => {
                self.liveness.engine_live = false;
                Err(NodeError::EngineUnreachable {
                    node: self.name.clone(),
                    source,
                })
            }
        }
    }

    /// Enabled, reachable and with a responsive engine session.
    pub async fn is_live(&mut self, ctx: &FleetContext) -> bool {
        if !self.enabled {
            return false;
        }
        self.ping(ctx).await && self.engine_ping(ctx).await
    }

    /// True iff exactly one container called `name` is running.
    pub async fn is_container_running(
        &self,
        ctx: &FleetContext,
        name: &str,
    ) -> Result<bool, NodeError> {
        let filter = ContainerFilter::named(name).with_state(ContainerState::Running);
        let running = self
            .call(ctx, move |engine| engine.list_containers(&filter))
            .await?;
        Ok(running.len() == 1)
    }

    async fn remove(&self, ctx: &FleetContext, container: &ContainerSummary) -> Result<(), NodeError> {
        let id = container.id.clone();
        self.call(ctx, move |engine| engine.remove_container(&id))
            .await?;
        debug!(node = %self.name, container = %container.name, id = %container.short_id(), "Removed container");
        Ok(())
    }

    /// Clear the way for a fresh container called `name`.
    ///
    /// `base_image` is the registry-qualified image without tag.
    pub async fn stop_container(
        &self,
        ctx: &FleetContext,
        name: &str,
        base_image: &str,
        options: StopOptions,
        sink: &dyn Reporter,
    ) -> Result<(), NodeError> {
        if options.remove_exited {
            let filter = ContainerFilter::named(name);
            let containers = self
                .call(ctx, move |engine| engine.list_containers(&filter))
                .await?;
            for container in containers.iter().filter(|c| !c.state.is_running()) {
                self.remove(ctx, container).await?;
            }
        }

        if options.evict_image_conflicts {
            let filter =
                ContainerFilter::ancestor(base_image).with_state(ContainerState::Running);
            let conflicts = self
                .call(ctx, move |engine| engine.list_containers(&filter))
                .await?;
            for container in &conflicts {
                sink.warning(&format!(
                    "{}: removing running container {} ({}) started from {}",
                    self.name,
                    container.name,
                    container.short_id(),
                    base_image
                ));
                self.remove(ctx, container).await?;
            }
        }

        let filter = ContainerFilter::named(name).with_state(ContainerState::Running);
        let running = self
            .call(ctx, move |engine| engine.list_containers(&filter))
            .await?;
        for container in &running {
            sink.warning(&format!(
                "{}: container {} is running; removing it",
                self.name, name
            ));
            self.remove(ctx, container).await?;
        }

        Ok(())
    }

    /// Resolve each named volume to a mount at its device path.
    async fn mounts(
        &self,
        ctx: &FleetContext,
        volumes: &[String],
    ) -> Result<Vec<VolumeMount>, NodeError> {
        let mut mounts = Vec::with_capacity(volumes.len());
        for volume in volumes {
            let lookup = volume.clone();
            let summary = self
                .call(ctx, move |engine| engine.inspect_volume(&lookup))
                .await?
                .ok_or_else(|| NodeError::VolumeMissing {
                    node: self.name.clone(),
                    volume: volume.clone(),
                })?;
            let target = summary.device().ok_or_else(|| NodeError::NoMountTarget {
                node: self.name.clone(),
                volume: volume.clone(),
            })?;
            mounts.push(VolumeMount {
                volume: volume.clone(),
                target: target.to_string(),
            });
        }
        Ok(mounts)
    }

    /// Start the container unless it already runs.
    ///
    /// Returns `Ok(None)` when the container was left alone.
    pub async fn run_container(
        &self,
        ctx: &FleetContext,
        name: &str,
        spec: &ContainerSpec,
        force: bool,
        sink: &dyn Reporter,
    ) -> Result<Option<ContainerSummary>, NodeError> {
        if !force && self.is_container_running(ctx, name).await? {
            sink.debug(&format!(
                "{}: container {} is already running",
                self.name, name
            ));
            return Ok(None);
        }

        let image = spec.qualified_image();
        self.stop_container(ctx, name, strip_tag(&image), StopOptions::default(), sink)
            .await?;

        let mounts = self.mounts(ctx, &spec.volumes).await?;

        sink.debug(&format!("{}: pulling image {}", self.name, image));
        let pull = image.clone();
        self.call(ctx, move |engine| engine.pull_image(&pull))
            .await?;

        let run = RunSpec {
            name: name.to_string(),
            image,
            env: spec.env.clone(),
            mounts,
            ports: spec.ports.iter().map(|&port| PortBinding { port }).collect(),
            privileged: spec.privileged,
            network_mode: "host".to_string(),
            auto_remove: true,
        };

        let container = self.call(ctx, move |engine| engine.run_container(&run)).await?;

        info!(
            node = %self.name,
            container = %container.name,
            id = %container.short_id(),
            "Started container"
        );
        sink.debug(&format!(
            "{}: started container {} ({})",
            self.name,
            container.name,
            container.short_id()
        ));

        Ok(Some(container))
    }

    /// Make sure a volume exists; recreate it when `force` is set.
    pub async fn create_volume(
        &self,
        ctx: &FleetContext,
        name: &str,
        volume: &VolumeConfig,
        force: bool,
        sink: &dyn Reporter,
    ) -> Result<VolumeSummary, NodeError> {
        let lookup = name.to_string();
        let existing = self
            .call(ctx, move |engine| engine.inspect_volume(&lookup))
            .await?;

        if let Some(existing) = existing {
            if !force {
                debug!(node = %self.name, volume = %name, "Volume already exists");
                return Ok(existing);
            }
            let remove = name.to_string();
            self.call(ctx, move |engine| engine.remove_volume(&remove))
                .await?;
            sink.debug(&format!("{}: removed volume {}", self.name, name));
        }

        let spec = VolumeSpec {
            name: name.to_string(),
            driver: volume.driver.clone(),
            options: volume.opts.clone(),
        };
        let created = self
            .call(ctx, move |engine| engine.create_volume(&spec))
            .await?;

        info!(node = %self.name, volume = %name, "Created volume");
        sink.debug(&format!("{}: created volume {}", self.name, name));
        Ok(created)
    }

    /// Staged status check, stopping at the first failing stage.
    ///
    /// Emits `node=[name, address, daemon, reachable, engine_live]`, then
    /// optionally `container=[name, short_id|NA]` and one
    /// `volume=[name, volume, present, device|NA]` per configured volume.
    pub async fn report_status(
        &mut self,
        ctx: &FleetContext,
        sink: &dyn Reporter,
        check_volumes: bool,
        check_containers: bool,
    ) -> NodeStatus {
        let mut status = NodeStatus {
            name: self.name.clone(),
            address: self.address.clone(),
            daemon_address: self.daemon_address.clone(),
            ..NodeStatus::default()
        };

        if !self.ping(ctx).await {
            sink.warning(&format!(
                "{}: node {} is not pinging back",
                self.name, self.address
            ));
            sink.keyword(MessageCode::Info, "node", status.node_keyword());
            return status;
        }
        status.reachable = true;

        if !self.engine_ping(ctx).await {
            sink.warning(&format!(
                "{}: container engine at {} is not responding",
                self.name, self.daemon_address
            ));
            sink.keyword(MessageCode::Info, "node", status.node_keyword());
            return status;
        }
        status.engine_live = true;
        sink.keyword(MessageCode::Info, "node", status.node_keyword());

        if check_containers {
            status.container = self.report_container(ctx, sink).await;
        }

        if check_volumes {
            status.volumes = self.report_volumes(ctx, sink).await;
        }

        status
    }

    async fn report_container(&self, ctx: &FleetContext, sink: &dyn Reporter) -> Option<String> {
        let base_image = ctx.config.base_image();
        let filter = ContainerFilter::ancestor(base_image.clone()).with_state(ContainerState::Running);

        let running = match self
            .call(ctx, move |engine| engine.list_containers(&filter))
            .await
        {
            Ok(running) => running,
            Err(e) => {
                warn!(node = %self.name, error = %e, "Failed to list containers");
                sink.warning(&e.to_string());
                Vec::new()
            }
        };

        let short_id = match running.as_slice() {
            [container] => Some(container.short_id().to_string()),
            [] => {
                sink.warning(&format!("{}: no containers running", self.name));
                None
            }
            _ => {
                sink.warning(&format!(
                    "{}: multiple containers with image {} running",
                    self.name, base_image
                ));
                None
            }
        };

        sink.keyword(
            MessageCode::Debug,
            "container",
            vec![
                json!(self.name),
                json!(short_id.as_deref().unwrap_or(NOT_AVAILABLE)),
            ],
        );
        short_id
    }

    async fn report_volumes(
        &self,
        ctx: &FleetContext,
        sink: &dyn Reporter,
    ) -> BTreeMap<String, bool> {
        let mut present = BTreeMap::new();

        for volume in ctx.config.volumes.keys() {
            let lookup = volume.clone();
            let found = match self
                .call(ctx, move |engine| engine.inspect_volume(&lookup))
                .await
            {
                Ok(found) => found,
                Err(e) => {
                    sink.warning(&e.to_string());
                    None
                }
            };

            match &found {
                Some(summary) => sink.keyword(
                    MessageCode::Debug,
                    "volume",
                    vec![
                        json!(self.name),
                        json!(volume),
                        json!(true),
                        json!(summary.options.get("device").map(String::as_str).unwrap_or(NOT_AVAILABLE)),
                    ],
                ),
                None => {
                    sink.warning(&format!(
                        "{}: volume {} not present",
                        self.name, volume
                    ));
                    sink.keyword(
                        MessageCode::Debug,
                        "volume",
                        vec![json!(self.name), json!(volume), json!(false), json!(NOT_AVAILABLE)],
                    );
                }
            }

            present.insert(volume.clone(), found.is_some());
        }

        present
    }
}
