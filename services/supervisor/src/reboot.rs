//! Remote node reboots.
//!
//! A soft reboot runs `sudo reboot` on the node over SSH. The connection
//! usually drops before ssh can report the remote exit status, so exit code
//! 255 counts as success as well as 0.

use std::collections::HashMap;
use std::io;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Exit codes accepted from the remote reboot command.
pub const REBOOT_OK_CODES: [i32; 2] = [0, 255];

/// Returns true if `code` means the node is going down.
pub fn reboot_succeeded(code: Option<i32>) -> bool {
    code.is_some_and(|code| REBOOT_OK_CODES.contains(&code))
}

/// Asks a node to reboot itself.
#[async_trait]
pub trait Rebooter: Send + Sync {
    /// Run the reboot on `target` (`[user@]host`) and return the exit code.
    ///
    /// `None` means the command was killed by a signal.
    async fn reboot(&self, target: &str, timeout: Duration) -> io::Result<Option<i32>>;
}

/// Runs `ssh <target> sudo reboot` with the system `ssh` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshRebooter;

#[async_trait]
impl Rebooter for SshRebooter {
    async fn reboot(&self, target: &str, timeout: Duration) -> io::Result<Option<i32>> {
        let child = Command::new("ssh")
            .args(["-o", "BatchMode=yes", target, "sudo", "reboot"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(timeout, child).await {
            Ok(status) => {
                let code = status?.code();
                debug!(target = %target, code = ?code, "ssh reboot finished");
                Ok(code)
            }
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("reboot of {} timed out after {:?}", target, timeout),
            )),
        }
    }
}

/// Rebooter that records targets and answers with configured exit codes.
///
/// Targets without a configured code exit with 0.
#[derive(Debug, Default)]
pub struct ScriptedRebooter {
    codes: Mutex<HashMap<String, Option<i32>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRebooter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit code returned for `target`; `None` simulates a signal.
    pub fn set_exit_code(&self, target: &str, code: Option<i32>) {
        self.codes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(target.to_string(), code);
    }

    /// Every target rebooted so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Rebooter for ScriptedRebooter {
    async fn reboot(&self, target: &str, _timeout: Duration) -> io::Result<Option<i32>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(target.to_string());

        let code = self
            .codes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(target)
            .copied()
            .unwrap_or(Some(0));
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Some(0), true)]
    #[case(Some(255), true)]
    #[case(Some(1), false)]
    #[case(None, false)]
    fn test_reboot_succeeded(#[case] code: Option<i32>, #[case] expected: bool) {
        assert_eq!(reboot_succeeded(code), expected);
    }

    #[tokio::test]
    async fn test_scripted_rebooter() {
        let rebooter = ScriptedRebooter::new();
        rebooter.set_exit_code("sdss@10.0.0.2", Some(1));

        let timeout = Duration::from_secs(1);
        assert_eq!(rebooter.reboot("10.0.0.1", timeout).await.unwrap(), Some(0));
        assert_eq!(
            rebooter.reboot("sdss@10.0.0.2", timeout).await.unwrap(),
            Some(1)
        );
        assert_eq!(rebooter.calls(), vec!["10.0.0.1", "sdss@10.0.0.2"]);
    }
}
