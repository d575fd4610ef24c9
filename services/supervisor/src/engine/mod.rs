//! Container engine interface.
//!
//! The engine interface abstracts the container and volume operations the
//! supervisor needs on each node:
//! - Listing, running and removing containers
//! - Pulling images
//! - Listing, creating and removing volumes
//!
//! Calls are blocking; callers route them through [`crate::pool::BlockingPool`].
//! [`docker`] talks to a Docker daemon over HTTP, [`mock`] is in-memory.

pub mod docker;
pub mod mock;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use docker::{DockerConnector, DockerEngine};
pub use mock::{MockConnector, MockEngine};

use crate::config::strip_tag;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised by a container engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The daemon address cannot be used.
    #[error("invalid daemon address: {0}")]
    InvalidAddress(String),

    /// The daemon could not be reached.
    #[error("daemon at {address} is unreachable: {reason}")]
    Unreachable { address: String, reason: String },

    /// Transport failure talking to the daemon.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The daemon answered with an error status.
    #[error("engine returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The named object does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The daemon answered with something we could not decode.
    #[error("unexpected engine response: {0}")]
    Decode(String),

    /// The call did not finish in time.
    #[error("engine call timed out after {0:?}")]
    Timeout(Duration),

    /// The worker running the call failed.
    #[error("engine worker failed: {0}")]
    Worker(String),
}

impl EngineError {
    /// Returns true if the error means the daemon could not be talked to.
    pub fn is_connectivity(&self) -> bool {
        match self {
            EngineError::Unreachable { .. } | EngineError::Timeout(_) => true,
            EngineError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

// =============================================================================
// Containers
// =============================================================================

/// Container state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Other,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
            ContainerState::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            _ => ContainerState::Other,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A container as listed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    /// Name without the leading `/`.
    pub name: String,
    pub image: String,
    pub state: ContainerState,
}

impl ContainerSummary {
    /// First 12 characters of the id.
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }
}

/// Filter applied when listing containers.
///
/// Unset fields match everything; set fields must all match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerFilter {
    /// Exact container name.
    pub name: Option<String>,
    /// Image the container was started from, tag optional.
    pub ancestor: Option<String>,
    pub state: Option<ContainerState>,
}

impl ContainerFilter {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn ancestor(image: impl Into<String>) -> Self {
        Self {
            ancestor: Some(image.into()),
            ..Self::default()
        }
    }

    pub fn with_state(mut self, state: ContainerState) -> Self {
        self.state = Some(state);
        self
    }

    /// Evaluates the filter locally.
    pub fn matches(&self, container: &ContainerSummary) -> bool {
        let name_ok = self
            .name
            .as_ref()
            .is_none_or(|name| &container.name == name);
        let state_ok = self.state.is_none_or(|state| container.state == state);
        let ancestor_ok = self.ancestor.as_ref().is_none_or(|ancestor| {
            &container.image == ancestor || strip_tag(&container.image) == ancestor
        });
        name_ok && state_ok && ancestor_ok
    }
}

/// A named volume attached to a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    /// Volume name.
    pub volume: String,
    /// Path inside the container.
    pub target: String,
}

/// Host port published on the same container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub port: u16,
}

/// Everything needed to launch a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub name: String,
    /// Registry-qualified image reference.
    pub image: String,
    /// `KEY=VALUE` pairs.
    pub env: Vec<String>,
    pub mounts: Vec<VolumeMount>,
    pub ports: Vec<PortBinding>,
    pub privileged: bool,
    pub network_mode: String,
    /// Remove the container when it exits.
    pub auto_remove: bool,
}

// =============================================================================
// Volumes
// =============================================================================

/// A volume as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSummary {
    pub name: String,
    pub driver: String,
    pub options: BTreeMap<String, String>,
}

impl VolumeSummary {
    /// The `device` driver option with surrounding `:` removed.
    pub fn device(&self) -> Option<&str> {
        self.options
            .get("device")
            .map(|device| device.trim_matches(':'))
            .filter(|device| !device.is_empty())
    }
}

/// Parameters for creating a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub name: String,
    pub driver: String,
    pub options: BTreeMap<String, String>,
}

// =============================================================================
// Traits
// =============================================================================

/// An open session with one node's container engine.
pub trait ContainerEngine: Send + Sync {
    /// Checks that the daemon answers.
    fn ping(&self) -> Result<(), EngineError>;

    /// Lists containers, including stopped ones.
    fn list_containers(&self, filter: &ContainerFilter)
        -> Result<Vec<ContainerSummary>, EngineError>;

    /// Force-removes a container, keeping its volumes.
    fn remove_container(&self, id: &str) -> Result<(), EngineError>;

    /// Pulls an image reference (`repo[:tag]`).
    fn pull_image(&self, image: &str) -> Result<(), EngineError>;

    /// Creates and starts a container.
    fn run_container(&self, spec: &RunSpec) -> Result<ContainerSummary, EngineError>;

    fn list_volumes(&self) -> Result<Vec<VolumeSummary>, EngineError>;

    /// Looks up one volume; `Ok(None)` if it does not exist.
    fn inspect_volume(&self, name: &str) -> Result<Option<VolumeSummary>, EngineError>;

    fn create_volume(&self, spec: &VolumeSpec) -> Result<VolumeSummary, EngineError>;

    fn remove_volume(&self, name: &str) -> Result<(), EngineError>;
}

/// Opens engine sessions.
pub trait EngineConnector: Send + Sync {
    /// Opens a session against a daemon address, bounded by `timeout`.
    fn connect(
        &self,
        daemon_address: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn ContainerEngine>, EngineError>;
}
