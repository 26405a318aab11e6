//! autofailover agent
//!
//! Runs next to one database. Registers it with the monitor, reports its
//! state on every poll and carries out the goal states the monitor assigns.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use autofailover::agent::{HttpMonitorClient, Keeper};
use autofailover::config::{load_agent_config, AgentConfig};
use autofailover::driver::{self, NodeAddress};
use autofailover::lifecycle::{signals, Shutdown};
use autofailover::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "autofailover-agent")]
#[command(about = "Per-node agent of the autofailover monitor", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the monitor URL from the config file.
    #[arg(long)]
    monitor: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_agent_config(path)?,
        None => AgentConfig::default(),
    };
    if let Some(url) = cli.monitor {
        config.monitor.url = url;
    }

    logging::init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        monitor = %config.monitor.url,
        node = %format!("{}:{}", config.node.host, config.node.port),
        "autofailover agent starting"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let address = NodeAddress::new(config.node.host.clone(), config.node.port);
    let database = driver::from_config(&config.driver, address);
    let client = HttpMonitorClient::new(config.monitor.url.clone(), config.monitor.request_timeout())?;
    let keeper = Keeper::new(&config, database, Arc::new(client))?;

    let shutdown = Shutdown::new();
    tokio::spawn(signals::listen(shutdown.clone(), None));

    keeper.run(shutdown.subscribe()).await?;

    tracing::info!("Agent stopped");
    Ok(())
}
