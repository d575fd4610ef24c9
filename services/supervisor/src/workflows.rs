//! Fleet-wide workflows.
//!
//! Each workflow fans out one future per selected member and joins them all
//! before the next phase. A failing node becomes a warning naming it and is
//! dropped from later phases; the batch always completes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use convoy_protocol::{CommandStatus, MessageCode, Reply, Reporter};
use futures_util::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::context::FleetContext;
use crate::fleet::{Fleet, FleetMember};
use crate::node::{ContainerSpec, NodeError, NodeStatus, StopOptions};
use crate::reboot::reboot_succeeded;
use crate::selector::Selection;

/// Keyword carrying files written by a device.
const FILENAME: &str = "filename";

/// Aggregate keyword listing every reported file.
const FILENAMES: &str = "filenames";

// =============================================================================
// Status
// =============================================================================

/// Report `enabledNodes` then the status of every enabled node.
pub async fn status(fleet: &mut Fleet, ctx: &FleetContext, sink: &dyn Reporter) -> Vec<NodeStatus> {
    let enabled: Vec<Value> = fleet.enabled_names().into_iter().map(|n| json!(n)).collect();
    sink.keyword(MessageCode::Info, "enabledNodes", enabled);

    let selected = fleet.select(&Selection::all());
    let reports = fleet
        .members_mut(&selected)
        .into_iter()
        .map(|member| member.node.report_status(ctx, sink, true, true));

    join_all(reports).await
}

// =============================================================================
// Reconnect
// =============================================================================

/// Options for [`reconnect`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectOptions {
    /// Restart running containers and recreate volumes.
    pub force: bool,
    /// Also remove running containers of the same image under other names.
    pub evict_image_conflicts: bool,
}

/// How reconnecting one node ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Container restarted and device session open.
    Connected,
    /// Connect, liveness or container setup failed.
    Failed(String),
    /// The container was gone after the settle delay.
    ContainerNotRunning,
    /// The device session could not be reopened.
    DeviceUnavailable(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectReport {
    pub outcomes: BTreeMap<String, ReconnectOutcome>,
}

impl ReconnectReport {
    /// Nodes left with a running container and an open device session.
    pub fn connected(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| **outcome == ReconnectOutcome::Connected)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Recreate the device container on the selected nodes and reconnect to it.
pub async fn reconnect(
    fleet: &mut Fleet,
    ctx: &FleetContext,
    sink: &dyn Reporter,
    selection: &Selection,
    options: ReconnectOptions,
) -> ReconnectReport {
    let selected = fleet.select(selection);
    let mut members = fleet.members_mut(&selected);
    let mut report = ReconnectReport::default();

    join_all(members.iter_mut().map(|member| close_device(member, sink))).await;

    let restarts = join_all(
        members
            .iter_mut()
            .map(|member| restart_container(member, ctx, sink, options)),
    )
    .await;

    for (name, result) in restarts {
        if let Err(e) = result {
            warn!(node = %name, error = %e, "Reconnect failed");
            sink.warning(&e.to_string());
            report
                .outcomes
                .insert(name, ReconnectOutcome::Failed(e.to_string()));
        }
    }

    let restarted = members.len() - report.outcomes.len();
    if restarted == 0 {
        return report;
    }

    let settle = ctx.config.settle_delay();
    sink.info(&format!(
        "Waiting {} seconds before reconnecting the devices.",
        settle.as_secs_f64()
    ));
    tokio::time::sleep(settle).await;

    let verified = join_all(
        members
            .iter_mut()
            .filter(|member| !report.outcomes.contains_key(&member.node.name))
            .map(|member| reconnect_device(member, ctx, sink)),
    )
    .await;

    report.outcomes.extend(verified);
    report
}

async fn close_device(member: &mut FleetMember, sink: &dyn Reporter) {
    if !member.device.is_connected() {
        return;
    }
    if let Err(e) = member.device.close().await {
        sink.warning(&e.to_string());
    }
}

async fn restart_container(
    member: &mut FleetMember,
    ctx: &FleetContext,
    sink: &dyn Reporter,
    options: ReconnectOptions,
) -> (String, Result<(), NodeError>) {
    let name = member.node.name.clone();
    let result = async {
        let node = &mut member.node;
        node.connect(ctx).await?;
        if !node.is_live(ctx).await {
            return Err(NodeError::NotLive { node: name.clone() });
        }

        let container = ctx.config.container_name_for(&name);
        let stop = StopOptions {
            remove_exited: true,
            evict_image_conflicts: options.evict_image_conflicts,
        };
        node.stop_container(ctx, &container, &ctx.config.base_image(), stop, sink)
            .await?;

        for (volume, config) in &ctx.config.volumes {
            node.create_volume(ctx, volume, config, options.force, sink)
                .await?;
        }

        let spec = ContainerSpec::for_node(&ctx.config, &name, node.device_port);
        node.run_container(ctx, &container, &spec, options.force, sink)
            .await?;
        Ok::<(), NodeError>(())
    }
    .await;

    (name, result)
}

async fn reconnect_device(
    member: &mut FleetMember,
    ctx: &FleetContext,
    sink: &dyn Reporter,
) -> (String, ReconnectOutcome) {
    let name = member.node.name.clone();
    let container = ctx.config.container_name_for(&name);

    match member.node.is_container_running(ctx, &container).await {
        Ok(true) => {}
        Ok(false) => {
            sink.warning(&format!(
                "{}: container {} is not running after restart",
                name, container
            ));
            return (name, ReconnectOutcome::ContainerNotRunning);
        }
        Err(e) => {
            sink.warning(&e.to_string());
            return (name, ReconnectOutcome::Failed(e.to_string()));
        }
    }

    if let Err(e) = member.device.restart(ctx).await {
        warn!(node = %name, error = %e, "Failed to reopen device session");
        sink.warning(&e.to_string());
        return (name, ReconnectOutcome::DeviceUnavailable(e.to_string()));
    }

    sink.debug(&format!(
        "{}: reconnected to device on port {}",
        name, member.node.device_port
    ));
    member.node.report_status(ctx, sink, false, true).await;
    info!(node = %name, "Node reconnected");

    (name, ReconnectOutcome::Connected)
}

// =============================================================================
// Broadcast
// =============================================================================

/// How one node handled a broadcast command.
#[derive(Debug, Clone, PartialEq)]
pub enum TalkOutcome {
    /// The command could not be sent.
    Unavailable(String),
    /// The command reached a terminal status.
    Finished {
        status: CommandStatus,
        replies: Vec<Reply>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcastReport {
    pub outcomes: BTreeMap<String, TalkOutcome>,
    /// Every `filename` value reported, in node order.
    pub filenames: Vec<Value>,
}

/// Forwards replies while keeping a copy.
struct Collector {
    parent: Arc<dyn Reporter>,
    replies: Mutex<Vec<Reply>>,
}

impl Collector {
    fn new(parent: Arc<dyn Reporter>) -> Self {
        Self {
            parent,
            replies: Mutex::new(Vec::new()),
        }
    }

    fn take(&self) -> Vec<Reply> {
        std::mem::take(
            &mut *self
                .replies
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

impl Reporter for Collector {
    fn report(&self, reply: Reply) {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(reply.clone());
        self.parent.report(reply);
    }
}

/// Send `text` to the device on every selected node and wait for the replies.
pub async fn broadcast(
    fleet: &mut Fleet,
    ctx: &FleetContext,
    sink: Arc<dyn Reporter>,
    selection: &Selection,
    text: &str,
) -> BroadcastReport {
    let selected = fleet.select(selection);
    let members = fleet.members_mut(&selected);

    let outcomes = join_all(
        members
            .into_iter()
            .map(|member| talk(member, ctx, sink.clone(), text)),
    )
    .await;

    let mut report = BroadcastReport {
        outcomes: outcomes.into_iter().collect(),
        filenames: Vec::new(),
    };

    report.filenames = report
        .outcomes
        .values()
        .filter_map(|outcome| match outcome {
            TalkOutcome::Finished { replies, .. } => Some(replies),
            TalkOutcome::Unavailable(_) => None,
        })
        .flatten()
        .filter_map(|reply| reply.get(FILENAME))
        .flat_map(|values| values.iter().skip(1).cloned())
        .collect();

    if !report.filenames.is_empty() {
        sink.keyword(MessageCode::Info, FILENAMES, report.filenames.clone());
    }

    report
}

async fn talk(
    member: &mut FleetMember,
    ctx: &FleetContext,
    sink: Arc<dyn Reporter>,
    text: &str,
) -> (String, TalkOutcome) {
    let name = member.node.name.clone();

    if !member.device.is_connected() {
        debug!(node = %name, "Device session closed; reopening before sending");
        if let Err(e) = member.device.restart(ctx).await {
            sink.warning(&e.to_string());
            return (name, TalkOutcome::Unavailable(e.to_string()));
        }
    }

    let collector = Arc::new(Collector::new(sink.clone()));
    let mut pending = match member.device.send(collector.clone(), text).await {
        Ok(pending) => pending,
        Err(e) => {
            warn!(node = %name, error = %e, "Failed to send device command");
            sink.warning(&e.to_string());
            return (name, TalkOutcome::Unavailable(e.to_string()));
        }
    };

    let timeout = ctx.config.command_timeout();
    let status = match tokio::time::timeout(timeout, pending.wait()).await {
        Ok(status) => status,
        Err(_) => {
            member.device.abandon(pending.id());
            sink.warning(&format!(
                "{}: command {} timed out after {} seconds",
                name,
                pending.id(),
                timeout.as_secs_f64()
            ));
            CommandStatus::Failed
        }
    };

    (
        name,
        TalkOutcome::Finished {
            status,
            replies: collector.take(),
        },
    )
}

// =============================================================================
// Reboot
// =============================================================================

/// How rebooting one node ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebootOutcome {
    /// The node accepted the reboot.
    Restarting,
    /// The reboot command failed or could not run.
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebootReport {
    pub outcomes: BTreeMap<String, RebootOutcome>,
    /// Fleet status taken after the settle delay.
    pub statuses: Vec<NodeStatus>,
}

/// Soft-reboot the selected nodes over SSH, then report fleet status.
///
/// Device and engine sessions to a node are closed before it goes down.
pub async fn reboot(
    fleet: &mut Fleet,
    ctx: &FleetContext,
    sink: &dyn Reporter,
    selection: &Selection,
) -> RebootReport {
    let selected = fleet.select(selection);
    let outcomes = join_all(
        fleet
            .members_mut(&selected)
            .into_iter()
            .map(|member| reboot_node(member, ctx, sink)),
    )
    .await;

    let mut report = RebootReport {
        outcomes: outcomes.into_iter().collect(),
        statuses: Vec::new(),
    };

    if report
        .outcomes
        .values()
        .any(|outcome| *outcome == RebootOutcome::Restarting)
    {
        tokio::time::sleep(ctx.config.settle_delay()).await;
    }

    report.statuses = status(fleet, ctx, sink).await;
    report
}

async fn reboot_node(
    member: &mut FleetMember,
    ctx: &FleetContext,
    sink: &dyn Reporter,
) -> (String, RebootOutcome) {
    let name = member.node.name.clone();
    let address = member.node.address.clone();

    close_device(member, sink).await;
    member.node.disconnect();

    let target = member.node.ssh_target();
    let reason = match ctx.rebooter.reboot(&target, ctx.config.reboot_timeout()).await {
        Ok(code) if reboot_succeeded(code) => {
            info!(node = %name, target = %target, "Rebooting node");
            sink.info(&format!("Restarting {}.", address));
            return (name, RebootOutcome::Restarting);
        }
        Ok(Some(code)) => format!("exit code {}", code),
        Ok(None) => "killed by signal".to_string(),
        Err(e) => e.to_string(),
    };

    warn!(node = %name, target = %target, reason = %reason, "Reboot failed");
    sink.warning(&format!("{}: failed rebooting {} ({})", name, address, reason));
    (name, RebootOutcome::Failed(reason))
}

#[cfg(test)]
mod tests {
    use convoy_protocol::NullReporter;
    use convoy_testing::RecordingReporter;

    use super::*;

    #[test]
    fn test_collector_forwards_and_keeps() {
        let parent = Arc::new(RecordingReporter::new());
        let collector = Collector::new(parent.clone());

        collector.info("hello");
        collector.keyword(MessageCode::Info, FILENAME, vec![json!("gfa1"), json!("a.fits")]);

        assert_eq!(parent.replies().len(), 2);
        let kept = collector.take();
        assert_eq!(kept.len(), 2);
        assert!(collector.take().is_empty());
    }

    #[test]
    fn test_reconnect_report_connected() {
        let mut report = ReconnectReport::default();
        report
            .outcomes
            .insert("gfa1".to_string(), ReconnectOutcome::Connected);
        report
            .outcomes
            .insert("gfa2".to_string(), ReconnectOutcome::Failed("down".to_string()));
        assert_eq!(report.connected(), vec!["gfa1"]);
    }

    #[test]
    fn test_null_parent() {
        let collector = Collector::new(Arc::new(NullReporter));
        collector.warning("x");
        assert_eq!(collector.take().len(), 1);
    }
}
