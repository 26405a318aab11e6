//! Automated failover for primary/standby database groups.

pub mod admin;
pub mod agent;
pub mod config;
pub mod driver;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod monitor;
pub mod observability;
pub mod resilience;
pub mod state;

pub use agent::Keeper;
pub use config::{AgentConfig, MonitorConfig};
pub use http::server::MonitorServer;
pub use lifecycle::Shutdown;
pub use monitor::Monitor;
