//! Configuration schema definitions.
//!
//! This module defines the configuration of both binaries: the monitor
//! ([`MonitorConfig`]) and the per-node agent ([`AgentConfig`]).
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the monitor.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct MonitorConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Where the node table and event log live.
    pub storage: StorageConfig,

    /// Active liveness probing and evaluation cadence.
    pub health_check: HealthCheckConfig,

    /// Failure detection and promotion tunables.
    pub failover: FailoverConfig,

    /// Request timeouts for the HTTP API.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Operator API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:6000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:6000".to_string(),
        }
    }
}

/// Durable state location.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for group snapshots and event logs.
    /// Empty keeps everything in memory (state is lost on restart).
    pub state_dir: String,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active probing of node addresses.
    pub enabled: bool,

    /// Interval between sweeps in milliseconds. Each sweep also
    /// re-evaluates every group so timeouts fire without agent traffic.
    pub interval_ms: u64,

    /// Connect timeout for a single probe in milliseconds.
    pub timeout_ms: u64,
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5_000,
            timeout_ms: 2_000,
        }
    }
}

/// Failover tunables.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// A node with no contact for longer than this is unreachable.
    pub unhealthy_timeout_ms: u64,

    /// After monitor start, nodes are treated as reachable for this long.
    pub startup_grace_period_ms: u64,

    /// Upper bound on waiting for an old primary to demote.
    pub drain_timeout_ms: u64,

    /// Maximum lag, in bytes, for a standby to count as caught up.
    pub catchup_lsn_threshold: u64,

    /// Failure reports for the same goal that block a node from promotion.
    pub promotion_failure_limit: u32,

    /// Window over which failure reports are counted, and block duration.
    pub promotion_failure_window_ms: u64,
}

impl FailoverConfig {
    pub fn unhealthy_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.unhealthy_timeout_ms as i64)
    }

    pub fn startup_grace_period(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.startup_grace_period_ms as i64)
    }

    pub fn drain_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.drain_timeout_ms as i64)
    }

    pub fn promotion_failure_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.promotion_failure_window_ms as i64)
    }
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            unhealthy_timeout_ms: 20_000,
            startup_grace_period_ms: 10_000,
            drain_timeout_ms: 30_000,
            catchup_lsn_threshold: 16 * 1024 * 1024,
            promotion_failure_limit: 3,
            promotion_failure_window_ms: 300_000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total request timeout in milliseconds.
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_ms: 10_000 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Operator API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the `/admin` routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// Root configuration for the per-node agent.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AgentConfig {
    pub monitor: MonitorEndpointConfig,
    pub node: NodeConfig,
    pub agent: KeeperConfig,
    pub driver: DriverConfig,
    pub observability: ObservabilityConfig,
}

/// How the agent reaches the monitor.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorEndpointConfig {
    /// Base URL of the monitor (e.g., "http://monitor:6000").
    pub url: String,

    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl MonitorEndpointConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for MonitorEndpointConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:6000".to_string(),
            request_timeout_ms: 5_000,
        }
    }
}

/// Registration details of the local database node.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    pub formation: String,
    /// Group to join; the monitor picks group 0 when unset.
    pub group: Option<u32>,
    pub name: String,
    /// Address other nodes and the monitor use to reach this database.
    pub host: String,
    pub port: u16,
    /// 0..=100, 0 means never promote this node.
    pub candidate_priority: u8,
    pub replication_quorum: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            formation: "default".to_string(),
            group: None,
            name: String::new(),
            host: "127.0.0.1".to_string(),
            port: 5432,
            candidate_priority: 100,
            replication_quorum: true,
        }
    }
}

/// Poll loop tunables.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KeeperConfig {
    /// Normal delay between two polls.
    pub poll_interval_ms: u64,

    /// Delay after a successful transition, to report it promptly.
    pub fast_poll_interval_ms: u64,

    /// Local state file (node id, current state).
    pub state_file: String,

    /// Backoff base for registration and monitor errors.
    pub retry_base_ms: u64,

    /// Backoff ceiling.
    pub retry_max_ms: u64,
}

impl KeeperConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fast_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fast_poll_interval_ms)
    }
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            fast_poll_interval_ms: 100,
            state_file: "autofailover-agent.state.json".to_string(),
            retry_base_ms: 200,
            retry_max_ms: 10_000,
        }
    }
}

/// Which database driver the agent uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// In-memory database, for demos and tests.
    #[default]
    Simulated,
    /// Shell commands, one per capability.
    Command,
}

/// Database driver configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DriverConfig {
    pub kind: DriverKind,

    /// Upper bound for a single driver call in milliseconds.
    pub command_timeout_ms: u64,

    /// Commands used by the `command` driver.
    pub commands: DriverCommands,
}

impl DriverConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            kind: DriverKind::Simulated,
            command_timeout_ms: 30_000,
            commands: DriverCommands::default(),
        }
    }
}

/// Shell commands for the `command` driver. Run through `sh -c`.
///
/// `start_replication` sees the upstream in `AUTOFAILOVER_PRIMARY_HOST` and
/// `AUTOFAILOVER_PRIMARY_PORT`; `apply_settings` sees
/// `AUTOFAILOVER_SYNC_STANDBY_NAMES`. Query commands print their answer on
/// stdout: `is_running` and `is_in_recovery` print `t`/`f`, `current_lsn`
/// prints `X/X`, `timeline` prints an integer, `replication_source` prints
/// `host:port` or nothing.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DriverCommands {
    pub is_running: String,
    pub start: String,
    pub current_lsn: String,
    pub timeline: String,
    pub is_in_recovery: String,
    pub replication_source: String,
    pub start_replication: String,
    pub stop_replication: String,
    pub promote: String,
    pub demote: String,
    pub apply_settings: String,
}
