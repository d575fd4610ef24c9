//! Command-line interface.
//!
//! The same subcommands are accepted on the command line (one shot) and as
//! lines on stdin in serve mode.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use convoy_protocol::{Keywords, MessageCode, Reply, Reporter};
use tracing::info;

use crate::context::FleetContext;
use crate::fleet::{Fleet, NodeTarget};
use crate::selector::{NameList, Selection};
use crate::workflows::{self, ReconnectOptions};

/// convoy - supervise device containers across a fleet of hosts.
#[derive(Debug, Parser)]
#[command(name = "convoy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file.
    #[arg(long, env = "CONVOY_CONFIG", default_value = "etc/convoy.yaml")]
    pub config: PathBuf,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Use in-memory engines and devices instead of the real fleet.
    #[arg(long)]
    pub dry_run: bool,

    /// Run one command and exit. Without a command, read commands from stdin.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// One command read from stdin in serve mode.
#[derive(Debug, Parser)]
#[command(name = "convoy", no_binary_name = true)]
pub struct ServeLine {
    #[command(subcommand)]
    pub command: Command,
}

impl ServeLine {
    pub fn parse_line(line: &str) -> Result<Command, clap::Error> {
        Self::try_parse_from(line.split_whitespace()).map(|parsed| parsed.command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Report enabled nodes and the status of each one.
    Status,

    /// Recreate device containers and reconnect to the devices.
    Reconnect(ReconnectArgs),

    /// Send a command to the devices.
    Talk(TalkArgs),

    /// Reboot nodes over SSH, then report status.
    Reboot(SelectionArgs),

    /// Enable nodes.
    Enable(TargetArgs),

    /// Disable nodes.
    Disable(TargetArgs),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Args)]
pub struct SelectionArgs {
    /// Comma-separated node names.
    #[arg(short, long)]
    pub names: Option<String>,

    /// Node category.
    #[arg(short, long)]
    pub category: Option<String>,
}

impl SelectionArgs {
    pub fn selection(&self) -> Selection {
        Selection::names(self.names.as_deref().unwrap_or_default())
            .with_category(self.category.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ReconnectArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Restart running containers and recreate volumes.
    #[arg(short, long)]
    pub force: bool,

    /// Also remove running containers of the same image under other names.
    #[arg(long)]
    pub evict_conflicts: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct TalkArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Command text passed to the devices.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub text: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct TargetArgs {
    /// Node names, separated by spaces or commas.
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub names: Vec<String>,

    /// Apply to every node.
    #[arg(long)]
    pub all: bool,
}

impl TargetArgs {
    pub fn target(&self) -> NodeTarget {
        if self.all {
            NodeTarget::All
        } else {
            NodeTarget::Names(NameList::from(self.names.clone()))
        }
    }
}

/// Run one command against the fleet, then emit a `:` reply.
pub async fn execute(
    command: Command,
    fleet: &mut Fleet,
    ctx: &FleetContext,
    sink: Arc<dyn Reporter>,
) {
    info!(command = ?command, "Executing command");

    match command {
        Command::Status => {
            workflows::status(fleet, ctx, sink.as_ref()).await;
        }
        Command::Reconnect(args) => {
            let options = ReconnectOptions {
                force: args.force,
                evict_image_conflicts: args.evict_conflicts,
            };
            workflows::reconnect(fleet, ctx, sink.as_ref(), &args.selection.selection(), options)
                .await;
        }
        Command::Talk(args) => {
            let text = args.text.join(" ");
            workflows::broadcast(fleet, ctx, sink.clone(), &args.selection.selection(), &text)
                .await;
        }
        Command::Reboot(args) => {
            workflows::reboot(fleet, ctx, sink.as_ref(), &args.selection()).await;
        }
        Command::Enable(args) => {
            fleet.enable(&ctx.config, &args.target(), sink.as_ref());
        }
        Command::Disable(args) => {
            fleet.disable(&ctx.config, &args.target(), sink.as_ref());
        }
    }

    sink.report(Reply::new(MessageCode::Done, Keywords::new()));
}
