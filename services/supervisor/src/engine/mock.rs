//! In-memory container engine for testing and dry runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::info;

use super::{
    ContainerEngine, ContainerFilter, ContainerState, ContainerSummary, EngineConnector,
    EngineError, RunSpec, VolumeSpec, VolumeSummary,
};

#[derive(Debug, Default)]
struct MockState {
    containers: Vec<ContainerSummary>,
    volumes: BTreeMap<String, VolumeSummary>,
    pulled: Vec<String>,
    runs: Vec<RunSpec>,
    removed_containers: Vec<String>,
    volumes_created: usize,
}

/// Mock engine keeping containers and volumes in memory.
#[derive(Debug, Default)]
pub struct MockEngine {
    state: Mutex<MockState>,

    /// Counter for generating container ids.
    id_counter: AtomicU64,

    /// Whether pings should fail.
    unresponsive: AtomicBool,
}

impl MockEngine {
    /// Create an empty mock engine.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(&self) -> String {
        let counter = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("{:016x}{:048x}", counter + 1, 0)
    }

    /// Add a container as if it had been started outside the supervisor.
    pub fn add_container(&self, name: &str, image: &str, state: ContainerState) -> String {
        let id = self.next_id();
        self.state().containers.push(ContainerSummary {
            id: id.clone(),
            name: name.to_string(),
            image: image.to_string(),
            state,
        });
        id
    }

    /// Add a volume with a `device` option.
    pub fn add_volume(&self, name: &str, device: &str) {
        let mut options = BTreeMap::new();
        options.insert("device".to_string(), device.to_string());
        self.state().volumes.insert(
            name.to_string(),
            VolumeSummary {
                name: name.to_string(),
                driver: "local".to_string(),
                options,
            },
        );
    }

    /// Make pings fail (or succeed again).
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.unresponsive.store(unresponsive, Ordering::SeqCst);
    }

    /// Snapshot of all containers.
    pub fn containers(&self) -> Vec<ContainerSummary> {
        self.state().containers.clone()
    }

    /// Containers currently running.
    pub fn running(&self) -> Vec<ContainerSummary> {
        self.containers()
            .into_iter()
            .filter(|c| c.state.is_running())
            .collect()
    }

    /// Every spec passed to `run_container`, in order.
    pub fn runs(&self) -> Vec<RunSpec> {
        self.state().runs.clone()
    }

    /// Names of removed containers, in order.
    pub fn removed_containers(&self) -> Vec<String> {
        self.state().removed_containers.clone()
    }

    /// Images pulled, in order.
    pub fn pulled_images(&self) -> Vec<String> {
        self.state().pulled.clone()
    }

    /// Number of successful `create_volume` calls.
    pub fn volumes_created(&self) -> usize {
        self.state().volumes_created
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.state().volumes.contains_key(name)
    }

    /// Mark a container as exited, as if its process stopped.
    pub fn exit_container(&self, name: &str) {
        for container in self.state().containers.iter_mut() {
            if container.name == name {
                container.state = ContainerState::Exited;
            }
        }
    }
}

impl ContainerEngine for MockEngine {
    fn ping(&self) -> Result<(), EngineError> {
        if self.unresponsive.load(Ordering::SeqCst) {
            return Err(EngineError::Timeout(Duration::from_secs(1)));
        }
        Ok(())
    }

    fn list_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<ContainerSummary>, EngineError> {
        Ok(self
            .state()
            .containers
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        let position = state
            .containers
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("container {}", id)))?;
        let removed = state.containers.remove(position);
        state.removed_containers.push(removed.name);
        Ok(())
    }

    fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        self.state().pulled.push(image.to_string());
        Ok(())
    }

    fn run_container(&self, spec: &RunSpec) -> Result<ContainerSummary, EngineError> {
        let mut state = self.state();
        if state.containers.iter().any(|c| c.name == spec.name) {
            return Err(EngineError::Api {
                status: 409,
                message: format!("container name {} is already in use", spec.name),
            });
        }

        let container = ContainerSummary {
            id: self.next_id(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            state: ContainerState::Running,
        };

        info!(
            container = %container.name,
            image = %container.image,
            "Mock: starting container"
        );

        state.containers.push(container.clone());
        state.runs.push(spec.clone());
        Ok(container)
    }

    fn list_volumes(&self) -> Result<Vec<VolumeSummary>, EngineError> {
        Ok(self.state().volumes.values().cloned().collect())
    }

    fn inspect_volume(&self, name: &str) -> Result<Option<VolumeSummary>, EngineError> {
        Ok(self.state().volumes.get(name).cloned())
    }

    fn create_volume(&self, spec: &VolumeSpec) -> Result<VolumeSummary, EngineError> {
        let mut state = self.state();
        if state.volumes.contains_key(&spec.name) {
            return Err(EngineError::Api {
                status: 409,
                message: format!("volume {} already exists", spec.name),
            });
        }

        let volume = VolumeSummary {
            name: spec.name.clone(),
            driver: spec.driver.clone(),
            options: spec.options.clone(),
        };
        state.volumes.insert(spec.name.clone(), volume.clone());
        state.volumes_created += 1;
        Ok(volume)
    }

    fn remove_volume(&self, name: &str) -> Result<(), EngineError> {
        self.state()
            .volumes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(format!("volume {}", name)))
    }
}

/// Hands out one [`MockEngine`] per daemon address, created on first use.
#[derive(Debug, Default)]
pub struct MockConnector {
    engines: Mutex<HashMap<String, Arc<MockEngine>>>,
    unreachable: Mutex<HashSet<String>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The engine behind a daemon address, creating it if needed.
    pub fn engine(&self, daemon_address: &str) -> Arc<MockEngine> {
        self.engines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(daemon_address.to_string())
            .or_default()
            .clone()
    }

    /// Make connections to a daemon address fail.
    pub fn set_unreachable(&self, daemon_address: &str, unreachable: bool) {
        let mut set = self
            .unreachable
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if unreachable {
            set.insert(daemon_address.to_string());
        } else {
            set.remove(daemon_address);
        }
    }
}

impl EngineConnector for MockConnector {
    fn connect(
        &self,
        daemon_address: &str,
        _timeout: Duration,
    ) -> Result<Arc<dyn ContainerEngine>, EngineError> {
        let unreachable = self
            .unreachable
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(daemon_address);
        if unreachable {
            return Err(EngineError::Unreachable {
                address: daemon_address.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let engine: Arc<dyn ContainerEngine> = self.engine(daemon_address);
        Ok(engine)
    }
}
