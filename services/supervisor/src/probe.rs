//! Network reachability probes.

use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Checks whether a host answers on the network.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns true if `address` answered within `timeout`.
    async fn ping(&self, address: &str, timeout: Duration) -> bool;
}

/// Sends one ICMP echo using the system `ping` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct IcmpProber;

#[async_trait]
impl Prober for IcmpProber {
    async fn ping(&self, address: &str, timeout: Duration) -> bool {
        // -w takes whole seconds; the outer timeout enforces the real bound.
        let deadline = timeout.as_secs_f64().ceil().max(1.0) as u64;

        let child = Command::new("ping")
            .args(["-c", "1", "-w", &deadline.to_string(), address])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!(address = %address, error = %e, "Failed to run ping");
                false
            }
            Err(_) => false,
        }
    }
}

/// Prober answering from a fixed set of unreachable hosts.
///
/// Every other host is reachable.
#[derive(Debug, Default)]
pub struct StaticProber {
    unreachable: Mutex<HashSet<String>>,
}

impl StaticProber {
    /// A prober that reaches every host.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, address: &str, reachable: bool) {
        let mut unreachable = self
            .unreachable
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if reachable {
            unreachable.remove(address);
        } else {
            unreachable.insert(address.to_string());
        }
    }
}

#[async_trait]
impl Prober for StaticProber {
    async fn ping(&self, address: &str, _timeout: Duration) -> bool {
        !self
            .unreachable
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(address)
    }
}
