//! Startup orchestration for the monitor.
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - An empty `storage.state_dir` keeps state in memory only

use arc_swap::ArcSwap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::config::{load_monitor_config, HealthCheckConfig, MonitorConfig};
use crate::monitor::{FileStore, MemoryStore, Monitor, MonitorResult, StateStore, SystemClock};

/// Open the configured state store and restore the monitor from it.
pub fn build_monitor(config: &MonitorConfig) -> MonitorResult<Arc<Monitor>> {
    let store: Arc<dyn StateStore> = if config.storage.state_dir.is_empty() {
        tracing::warn!("No storage.state_dir configured, monitor state is kept in memory only");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(FileStore::open(&config.storage.state_dir)?)
    };
    let monitor = Monitor::open(store, Arc::new(SystemClock), config.failover.clone())?;
    Ok(Arc::new(monitor))
}

/// Applies reloaded configuration to the running monitor.
pub struct Reloader {
    pub monitor: Arc<Monitor>,
    pub health_check: Arc<ArcSwap<HealthCheckConfig>>,
    pub current: MonitorConfig,
    pub path: Option<PathBuf>,
}

impl Reloader {
    pub fn apply(&mut self, next: MonitorConfig) {
        if next.listener.bind_address != self.current.listener.bind_address {
            tracing::warn!("listener.bind_address changed, restart the monitor to apply it");
        }
        if next.storage.state_dir != self.current.storage.state_dir {
            tracing::warn!("storage.state_dir changed, restart the monitor to apply it");
        }
        self.monitor.reload_settings(next.failover.clone());
        self.health_check.store(Arc::new(next.health_check.clone()));
        self.current = next;
    }

    /// Apply configs from the file watcher, and re-read the file on SIGHUP.
    pub async fn run(
        mut self,
        mut updates: mpsc::UnboundedReceiver<MonitorConfig>,
        mut hangups: mpsc::UnboundedReceiver<()>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                Some(next) = updates.recv() => self.apply(next),
                Some(()) = hangups.recv() => {
                    let Some(path) = self.path.clone() else {
                        tracing::info!("Started without a config file, nothing to reload");
                        continue;
                    };
                    match load_monitor_config(&path) {
                        Ok(next) => self.apply(next),
                        Err(e) => tracing::error!("Failed to reload config: {}. Keeping current configuration.", e),
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}
