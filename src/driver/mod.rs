//! Database drivers: the agent's only way to touch the local database.
//!
//! # Data Flow
//! ```text
//! agent/keeper.rs (facts for the report)
//! agent/transitions.rs (procedures)
//!     → DatabaseDriver
//!         → simulated.rs (in-memory database, shared replication network)
//!         → command.rs (one shell command per capability, under a timeout)
//! ```
//!
//! # Design Decisions
//! - Every capability is idempotent so a transition can be retried after
//!   a crash
//! - Drivers never decide anything: they execute what the procedure asks

pub mod command;
pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{DriverConfig, DriverKind};
use crate::resilience::timeouts::TimeoutError;
use crate::state::Lsn;

pub use command::CommandDriver;
pub use simulated::{SimulatedDatabase, SimulatedNetwork};

/// Where a database can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("database is not running")]
    NotRunning,

    /// The database refused the operation (e.g. a write on a standby).
    #[error("rejected by the database: {0}")]
    Rejected(String),

    #[error("command `{command}` failed with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("unexpected output from `{command}`: {output}")]
    Parse { command: String, output: String },

    #[error("no command configured for {0}")]
    NotConfigured(&'static str),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Capabilities the agent needs from its database.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    async fn is_running(&self) -> DriverResult<bool>;

    /// Start the database when it is not running.
    async fn ensure_running(&self) -> DriverResult<()>;

    async fn current_lsn(&self) -> DriverResult<Lsn>;

    async fn timeline(&self) -> DriverResult<u32>;

    async fn is_in_recovery(&self) -> DriverResult<bool>;

    /// The upstream the WAL receiver streams from, if any.
    async fn replication_source(&self) -> DriverResult<Option<NodeAddress>>;

    /// Follow `primary`, rewinding or re-cloning as needed.
    async fn start_replication_from(&self, primary: &NodeAddress) -> DriverResult<()>;

    /// Stop the WAL receiver, keeping the database in recovery.
    async fn stop_replication(&self) -> DriverResult<()>;

    /// Leave recovery and accept writes.
    async fn promote(&self) -> DriverResult<()>;

    /// Stop accepting writes.
    async fn demote(&self) -> DriverResult<()>;

    /// Apply `synchronous_standby_names` and reload.
    async fn apply_settings(&self, synchronous_standby_names: &str) -> DriverResult<()>;
}

/// Build the driver selected by configuration.
pub fn from_config(config: &DriverConfig, address: NodeAddress) -> Arc<dyn DatabaseDriver> {
    match config.kind {
        DriverKind::Simulated => {
            tracing::warn!(%address, "Using the simulated database driver");
            SimulatedNetwork::new().spawn(address)
        }
        DriverKind::Command => Arc::new(CommandDriver::new(config.commands.clone(), config.command_timeout())),
    }
}
