//! Fleet configuration.
//!
//! Loaded from a YAML file layered with `CONVOY__*` environment variables:
//!
//! ```yaml
//! image: flicamera:latest
//! registry: hub.local:5000
//! container_name: flicamera
//! container_env: ["OBSERVATORY=APO"]
//! nodes:
//!   gfa1: { host: 10.25.1.141, port: 19995, category: gfa }
//!   fvc1: { host: 10.25.1.150, port: 19996, category: fvc, daemon_address: "tcp://10.25.1.150:2376" }
//! enabled_nodes: [gfa1, fvc1]
//! volumes:
//!   data: { driver: local, opts: { type: nfs, o: "nfsvers=4,addr=hub.local,rw", device: ":/data" } }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default TCP port of the container engine daemon on a node.
pub const DEFAULT_DAEMON_PORT: u16 = 2375;

/// Prefix for environment overrides, e.g. `CONVOY__SETTLE_DELAY=1`.
pub const ENV_PREFIX: &str = "CONVOY";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// An enabled node has no entry in the node table.
    #[error("enabled node '{0}' is not defined under 'nodes'")]
    UnknownNode(String),

    /// A value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Per-node settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeConfig {
    /// Network address of the node.
    pub host: String,

    /// Container engine daemon address; defaults to `tcp://{host}:2375`.
    #[serde(default, alias = "docker-client", alias = "daemon-address")]
    pub daemon_address: Option<String>,

    /// TCP port the device process listens on.
    pub port: u16,

    /// Optional category used for selection.
    #[serde(default)]
    pub category: Option<String>,

    /// Login used to reboot the node over SSH.
    #[serde(default)]
    pub user: Option<String>,
}

impl NodeConfig {
    /// The daemon address, falling back to the default port on the host.
    pub fn daemon_address(&self) -> String {
        self.daemon_address
            .clone()
            .unwrap_or_else(|| default_daemon_address(&self.host))
    }
}

/// Volume settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VolumeConfig {
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Driver options, e.g. `type`, `o` and `device` for NFS.
    #[serde(default)]
    pub opts: BTreeMap<String, String>,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            opts: BTreeMap::new(),
        }
    }
}

/// Fleet configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Every node that may be part of the fleet, keyed by name.
    pub nodes: BTreeMap<String, NodeConfig>,

    /// Nodes instantiated at start-up. All configured nodes when omitted.
    #[serde(default)]
    pub enabled_nodes: Option<Vec<String>>,

    /// Volumes created on each node before the container starts.
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeConfig>,

    /// Image the device container runs, with or without tag.
    pub image: String,

    /// Registry the image is pulled from.
    #[serde(default)]
    pub registry: Option<String>,

    /// Container name prefix; the container on node `n` is `{prefix}-{n}`.
    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// Extra `KEY=VALUE` environment for the device container.
    #[serde(default)]
    pub container_env: Vec<String>,

    /// Run the device container privileged.
    #[serde(default = "default_true")]
    pub privileged: bool,

    /// Seconds to wait for a node to answer a ping.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: f64,

    /// Seconds allowed to open a container engine session.
    #[serde(default = "default_engine_connect_timeout")]
    pub engine_connect_timeout: f64,

    /// Seconds allowed for an engine liveness ping.
    #[serde(default = "default_engine_ping_timeout")]
    pub engine_ping_timeout: f64,

    /// Seconds allowed to open a device connection.
    #[serde(default = "default_device_connect_timeout")]
    pub device_connect_timeout: f64,

    /// Seconds to wait after restarting containers before reconnecting devices.
    #[serde(default = "default_settle_delay")]
    pub settle_delay: f64,

    /// Seconds a broadcast command may stay in flight before it is abandoned.
    #[serde(default = "default_command_timeout")]
    pub command_timeout: f64,

    /// Seconds allowed for the remote reboot command.
    #[serde(default = "default_reboot_timeout")]
    pub reboot_timeout: f64,

    /// Maximum number of container engine calls running at once.
    #[serde(default = "default_engine_workers")]
    pub engine_workers: usize,
}

fn default_driver() -> String {
    "local".to_string()
}

fn default_container_name() -> String {
    "device".to_string()
}

fn default_true() -> bool {
    true
}

fn default_ping_timeout() -> f64 {
    0.5
}

fn default_engine_connect_timeout() -> f64 {
    3.0
}

fn default_engine_ping_timeout() -> f64 {
    1.0
}

fn default_device_connect_timeout() -> f64 {
    3.0
}

fn default_settle_delay() -> f64 {
    5.0
}

fn default_command_timeout() -> f64 {
    60.0
}

fn default_reboot_timeout() -> f64 {
    30.0
}

fn default_engine_workers() -> usize {
    8
}

/// `tcp://{host}:2375`.
pub fn default_daemon_address(host: &str) -> String {
    format!("tcp://{}:{}", host, DEFAULT_DAEMON_PORT)
}

impl FleetConfig {
    /// Load configuration from a YAML file plus environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string, without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image.trim().is_empty() {
            return Err(ConfigError::Invalid("image cannot be empty".to_string()));
        }

        if let Some(enabled) = &self.enabled_nodes {
            if let Some(missing) = enabled.iter().find(|name| !self.nodes.contains_key(*name)) {
                return Err(ConfigError::UnknownNode(missing.clone()));
            }
        }

        if let Some(bad) = self.container_env.iter().find(|kv| !kv.contains('=')) {
            return Err(ConfigError::Invalid(format!(
                "container_env entry '{}' is not KEY=VALUE",
                bad
            )));
        }

        let durations = [
            ("ping_timeout", self.ping_timeout),
            ("engine_connect_timeout", self.engine_connect_timeout),
            ("engine_ping_timeout", self.engine_ping_timeout),
            ("device_connect_timeout", self.device_connect_timeout),
            ("settle_delay", self.settle_delay),
            ("command_timeout", self.command_timeout),
            ("reboot_timeout", self.reboot_timeout),
        ];
        if let Some((name, value)) = durations
            .iter()
            .find(|(_, value)| Duration::try_from_secs_f64(*value).is_err())
        {
            return Err(ConfigError::Invalid(format!(
                "{} must be a non-negative, representable number of seconds, got {}",
                name, value
            )));
        }

        if self.engine_workers == 0 {
            return Err(ConfigError::Invalid(
                "engine_workers must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Names of the nodes to instantiate at start-up.
    pub fn enabled_node_names(&self) -> Vec<String> {
        match &self.enabled_nodes {
            Some(names) => names.clone(),
            None => self.nodes.keys().cloned().collect(),
        }
    }

    /// Name of the device container on a node.
    pub fn container_name_for(&self, node: &str) -> String {
        format!("{}-{}", self.container_name, node)
    }

    /// Image reference qualified with the registry, if one is configured.
    pub fn qualified_image(&self) -> String {
        qualify_image(&self.image, self.registry.as_deref())
    }

    /// Registry-qualified image without its tag; used to match ancestors.
    pub fn base_image(&self) -> String {
        strip_tag(&self.qualified_image()).to_string()
    }

    pub fn ping_timeout(&self) -> Duration {
        secs(self.ping_timeout)
    }

    pub fn engine_connect_timeout(&self) -> Duration {
        secs(self.engine_connect_timeout)
    }

    pub fn engine_ping_timeout(&self) -> Duration {
        secs(self.engine_ping_timeout)
    }

    pub fn device_connect_timeout(&self) -> Duration {
        secs(self.device_connect_timeout)
    }

    pub fn settle_delay(&self) -> Duration {
        secs(self.settle_delay)
    }

    pub fn command_timeout(&self) -> Duration {
        secs(self.command_timeout)
    }

    pub fn reboot_timeout(&self) -> Duration {
        secs(self.reboot_timeout)
    }
}

/// Seconds to a duration. Values are checked by [`FleetConfig::validate`].
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

/// Prefix an image with a registry.
pub fn qualify_image(image: &str, registry: Option<&str>) -> String {
    match registry {
        Some(registry) if !registry.is_empty() => {
            format!("{}/{}", registry.trim_end_matches('/'), image)
        }
        _ => image.to_string(),
    }
}

/// Drop the tag (and digest) from an image reference.
///
/// A colon only starts a tag when no `/` follows it, so registry ports
/// survive: `hub:5000/cam:latest` becomes `hub:5000/cam`.
pub fn strip_tag(image: &str) -> &str {
    let image = image.split('@').next().unwrap_or(image);
    match image.rfind(':') {
        Some(pos) if !image[pos..].contains('/') => &image[..pos],
        _ => image,
    }
}
