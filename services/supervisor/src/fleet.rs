//! Fleet registry.
//!
//! The fleet owns every [`Node`] and its [`DeviceSession`]. Workflows borrow
//! members mutably, one future per member, so no two tasks ever touch the
//! same node at once.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use convoy_protocol::{MessageCode, Reporter};
use futures_util::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::FleetConfig;
use crate::context::FleetContext;
use crate::device::DeviceSession;
use crate::node::Node;
use crate::selector::{select_nodes, NameList, Selection};

/// A node and its device session.
#[derive(Debug)]
pub struct FleetMember {
    pub node: Node,
    pub device: DeviceSession,
}

impl FleetMember {
    pub fn new(node: Node, broadcast: Arc<dyn Reporter>) -> Self {
        let device = DeviceSession::new(
            node.name.clone(),
            node.address.clone(),
            node.device_port,
            broadcast,
        );
        Self { node, device }
    }
}

/// Nodes an enable/disable applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTarget {
    All,
    Names(NameList),
}

/// Every node the supervisor knows about.
pub struct Fleet {
    members: BTreeMap<String, FleetMember>,
    broadcast: Arc<dyn Reporter>,
}

impl std::fmt::Debug for Fleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fleet")
            .field("members", &self.members)
            .finish_non_exhaustive()
    }
}

impl Fleet {
    /// An empty fleet; unsolicited device replies go to `broadcast`.
    pub fn new(broadcast: Arc<dyn Reporter>) -> Self {
        Self {
            members: BTreeMap::new(),
            broadcast,
        }
    }

    /// Instantiate the enabled nodes of a configuration.
    pub fn from_config(config: &FleetConfig, broadcast: Arc<dyn Reporter>) -> Self {
        let mut fleet = Self::new(broadcast);
        for name in config.enabled_node_names() {
            if let Some(node) = config.nodes.get(&name) {
                fleet.insert(Node::from_config(&name, node));
            }
        }
        fleet
    }

    /// Add a node, replacing any node with the same name.
    pub fn insert(&mut self, node: Node) {
        let member = FleetMember::new(node, self.broadcast.clone());
        self.members.insert(member.node.name.clone(), member);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FleetMember> {
        self.members.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FleetMember> {
        self.members.get_mut(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.members.values().map(|member| &member.node)
    }

    /// Names of enabled nodes, sorted.
    pub fn enabled_names(&self) -> Vec<String> {
        self.nodes()
            .filter(|node| node.enabled)
            .map(|node| node.name.clone())
            .collect()
    }

    pub fn select(&self, selection: &Selection) -> HashSet<String> {
        select_nodes(self.nodes(), selection)
    }

    /// Mutable access to the named members, in name order.
    pub fn members_mut(&mut self, names: &HashSet<String>) -> Vec<&mut FleetMember> {
        self.members
            .values_mut()
            .filter(|member| names.contains(&member.node.name))
            .collect()
    }

    /// Connect every enabled node and open device sessions for running containers.
    pub async fn start(&mut self, ctx: &FleetContext, sink: &dyn Reporter) {
        let members = self
            .members
            .values_mut()
            .filter(|member| member.node.enabled)
            .map(|member| async move {
                if let Err(e) = member.node.connect(ctx).await {
                    warn!(node = %member.node.name, error = %e, "Failed to connect node");
                    sink.warning(&e.to_string());
                    return;
                }

                let container = ctx.config.container_name_for(&member.node.name);
                match member.node.is_container_running(ctx, &container).await {
                    Ok(true) => {
                        if let Err(e) = member.device.start(ctx).await {
                            warn!(node = %member.node.name, error = %e, "Failed to open device session");
                            sink.warning(&e.to_string());
                        }
                    }
                    Ok(false) => {
                        debug!(node = %member.node.name, container = %container, "Container not running; device session left closed");
                    }
                    Err(e) => sink.warning(&e.to_string()),
                }
            });

        join_all(members).await;
        info!(nodes = self.len(), "Fleet started");
    }

    /// Enable nodes, instantiating configured nodes not yet in the fleet.
    pub fn enable(&mut self, config: &FleetConfig, target: &NodeTarget, sink: &dyn Reporter) -> Vec<String> {
        self.set_enabled(config, target, true, sink)
    }

    pub fn disable(&mut self, config: &FleetConfig, target: &NodeTarget, sink: &dyn Reporter) -> Vec<String> {
        self.set_enabled(config, target, false, sink)
    }

    fn set_enabled(
        &mut self,
        config: &FleetConfig,
        target: &NodeTarget,
        enabled: bool,
        sink: &dyn Reporter,
    ) -> Vec<String> {
        let mut changed = Vec::new();

        match target {
            NodeTarget::All => {
                for member in self.members.values_mut() {
                    member.node.enabled = enabled;
                    changed.push(member.node.name.clone());
                }
            }
            NodeTarget::Names(names) => {
                for name in names.as_slice() {
                    if let Some(member) = self.members.get_mut(name) {
                        member.node.enabled = enabled;
                        changed.push(name.clone());
                    } else if let (true, Some(node)) = (enabled, config.nodes.get(name)) {
                        info!(node = %name, "Adding configured node to the fleet");
                        self.insert(Node::from_config(name, node));
                        changed.push(name.clone());
                    } else {
                        sink.warning(&format!("Cannot find node {}.", name));
                    }
                }
            }
        }

        let enabled_nodes: Vec<Value> = self.enabled_names().into_iter().map(|n| json!(n)).collect();
        sink.keyword(MessageCode::Info, "enabledNodes", enabled_nodes);
        changed
    }
}
