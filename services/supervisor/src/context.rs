//! Shared collaborators passed into every fleet operation.

use std::sync::Arc;

use crate::config::FleetConfig;
use crate::device::{DeviceConnector, ScriptedConnector, TcpConnector};
use crate::engine::{DockerConnector, EngineConnector, MockConnector};
use crate::pool::BlockingPool;
use crate::probe::{IcmpProber, Prober, StaticProber};
use crate::reboot::{Rebooter, ScriptedRebooter, SshRebooter};

/// Configuration plus the I/O seams used by nodes and device sessions.
#[derive(Clone)]
pub struct FleetContext {
    pub config: Arc<FleetConfig>,
    pub prober: Arc<dyn Prober>,
    pub engines: Arc<dyn EngineConnector>,
    pub devices: Arc<dyn DeviceConnector>,
    pub rebooter: Arc<dyn Rebooter>,
    pub pool: BlockingPool,
}

impl FleetContext {
    /// Nodes are rebooted over SSH unless [`with_rebooter`](Self::with_rebooter) says otherwise.
    pub fn new(
        config: FleetConfig,
        prober: Arc<dyn Prober>,
        engines: Arc<dyn EngineConnector>,
        devices: Arc<dyn DeviceConnector>,
    ) -> Self {
        let pool = BlockingPool::new(config.engine_workers);
        Self {
            config: Arc::new(config),
            prober,
            engines,
            devices,
            rebooter: Arc::new(SshRebooter),
            pool,
        }
    }

    pub fn with_rebooter(mut self, rebooter: Arc<dyn Rebooter>) -> Self {
        self.rebooter = rebooter;
        self
    }

    /// ICMP probes, Docker daemons and TCP device connections.
    pub fn production(config: FleetConfig) -> Self {
        Self::new(
            config,
            Arc::new(IcmpProber),
            Arc::new(DockerConnector),
            Arc::new(TcpConnector),
        )
    }

    /// Every host reachable, in-memory engines, and devices that accept any command.
    pub fn dry_run(config: FleetConfig) -> Self {
        Self::new(
            config,
            Arc::new(StaticProber::new()),
            Arc::new(MockConnector::new()),
            Arc::new(ScriptedConnector::new()),
        )
        .with_rebooter(Arc::new(ScriptedRebooter::new()))
    }
}

impl std::fmt::Debug for FleetContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetContext")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
