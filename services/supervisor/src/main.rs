//! convoy supervisor binary
//!
//! Loads the fleet configuration, connects every enabled node and then either
//! runs one command or serves commands read line by line from stdin. Replies
//! go to stdout as JSON lines; logs go to stderr.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use convoy_protocol::{MessageCode, Reply, Reporter};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use convoy_supervisor::cli::{self, Cli, ServeLine};
use convoy_supervisor::output::JsonLinesReporter;
use convoy_supervisor::{Fleet, FleetConfig, FleetContext};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| cli.log_level.clone().into()))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    info!("Starting convoy supervisor");

    let config = FleetConfig::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    info!(
        nodes = config.nodes.len(),
        image = %config.qualified_image(),
        dry_run = cli.dry_run,
        "Configuration loaded"
    );

    let ctx = if cli.dry_run {
        FleetContext::dry_run(config)
    } else {
        FleetContext::production(config)
    };

    let sink: Arc<dyn Reporter> = Arc::new(JsonLinesReporter::stdout());
    let mut fleet = Fleet::from_config(&ctx.config, sink.clone());
    fleet.start(&ctx, sink.as_ref()).await;

    match cli.command {
        Some(command) => cli::execute(command, &mut fleet, &ctx, sink).await,
        None => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                }
                result = serve(&mut fleet, &ctx, sink) => {
                    result.context("failed to read commands from stdin")?;
                }
            }
        }
    }

    info!("Supervisor shutdown complete");
    Ok(())
}

/// Execute commands read from stdin until EOF.
async fn serve(fleet: &mut Fleet, ctx: &FleetContext, sink: Arc<dyn Reporter>) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match ServeLine::parse_line(&line) {
            Ok(command) => cli::execute(command, fleet, ctx, sink.clone()).await,
            Err(e) => {
                warn!(line = %line, "Rejected command");
                sink.report(Reply::text(MessageCode::Failed, e.to_string().trim()));
            }
        }
    }

    info!("Command stream closed");
    Ok(())
}
