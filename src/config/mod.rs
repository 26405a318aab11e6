//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → MonitorConfig / AgentConfig (validated)
//!
//! On reload (file change or SIGHUP, monitor only):
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → failover + health_check sections swapped atomically
//!     → next group evaluation observes them
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Listener and storage changes need a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_agent_config, load_monitor_config, ConfigError};
pub use schema::{
    AdminConfig, AgentConfig, DriverCommands, DriverConfig, DriverKind, FailoverConfig, HealthCheckConfig,
    KeeperConfig, ListenerConfig, LogFormat, MonitorConfig, MonitorEndpointConfig, NodeConfig,
    ObservabilityConfig, StorageConfig, TimeoutConfig,
};
