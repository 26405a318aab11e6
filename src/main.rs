//! autofailover monitor
//!
//! Keeps the authoritative node table of every replication group and
//! decides, from agent reports and its own probes, which node holds write
//! authority.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────┐
//!                     │                     MONITOR                      │
//!                     │                                                  │
//!   agent reports     │  ┌─────────┐    ┌──────────┐    ┌────────────┐   │
//!   ──────────────────┼─▶│  http   │───▶│ monitor  │───▶│   store    │   │
//!   goal + peers      │  │ server  │    │  engine  │    │ file / mem │   │
//!   ◀─────────────────┼──│         │◀───│  (fsm)   │    └────────────┘   │
//!                     │  └─────────┘    └────▲─────┘                     │
//!   operator commands │       │              │                           │
//!   ──────────────────┼─▶ admin routes       │ sweep                     │
//!                     │                 ┌────┴─────┐                     │
//!                     │                 │  health  │──── TCP probes ─────┼──▶ nodes
//!                     │                 └──────────┘                     │
//!                     │                                                  │
//!                     │  config + hot reload · logging · metrics ·       │
//!                     │  signals / graceful shutdown                     │
//!                     └──────────────────────────────────────────────────┘
//! ```

use arc_swap::ArcSwap;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use autofailover::config::watcher::ConfigWatcher;
use autofailover::config::{load_monitor_config, MonitorConfig};
use autofailover::health::{HealthMonitor, TcpProbe};
use autofailover::lifecycle::{signals, startup, Shutdown};
use autofailover::observability::{logging, metrics};
use autofailover::MonitorServer;

#[derive(Parser)]
#[command(name = "autofailover-monitor")]
#[command(about = "Failover monitor for primary/standby database groups", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_monitor_config(path)?,
        None => MonitorConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "autofailover monitor starting");
    if cli.config.is_none() {
        tracing::warn!("No config file given, running with defaults");
    }

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

    let monitor = startup::build_monitor(&config)?;
    let shutdown = Shutdown::new();

    // Health sweep
    let health_config = Arc::new(ArcSwap::from_pointee(config.health_check.clone()));
    let health = HealthMonitor::new(monitor.clone(), health_config.clone(), Arc::new(TcpProbe));
    tokio::spawn(health.run(shutdown.subscribe()));

    // Hot reload: file watcher and SIGHUP
    let (hangup_tx, hangup_rx) = mpsc::unbounded_channel();
    let (updates, _watcher) = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            let handle = match watcher.run() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::error!(error = %e, "Config watcher failed to start, hot reload disabled");
                    None
                }
            };
            (updates, handle)
        }
        None => (mpsc::unbounded_channel().1, None),
    };
    let reloader = startup::Reloader {
        monitor: monitor.clone(),
        health_check: health_config,
        current: config.clone(),
        path: cli.config.clone(),
    };
    tokio::spawn(reloader.run(updates, hangup_rx, shutdown.subscribe()));
    tokio::spawn(signals::listen(shutdown.clone(), Some(hangup_tx)));

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for agents and operators");

    let server = MonitorServer::new(monitor, &config);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
