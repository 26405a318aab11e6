//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function of the parsed config
//! - Runs before a config is accepted, including on reload

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{AgentConfig, DriverKind, FailoverConfig, HealthCheckConfig, MonitorConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("'{}' is not a socket address", value)));
    }
}

fn check_failover(errors: &mut Vec<ValidationError>, failover: &FailoverConfig) {
    if failover.unhealthy_timeout_ms == 0 {
        errors.push(ValidationError::new("failover.unhealthy_timeout_ms", "must be > 0"));
    }
    if failover.drain_timeout_ms == 0 {
        errors.push(ValidationError::new("failover.drain_timeout_ms", "must be > 0"));
    }
    if failover.promotion_failure_limit == 0 {
        errors.push(ValidationError::new("failover.promotion_failure_limit", "must be > 0"));
    }
}

fn check_health(errors: &mut Vec<ValidationError>, health: &HealthCheckConfig, failover: &FailoverConfig) {
    if health.interval_ms == 0 {
        errors.push(ValidationError::new("health_check.interval_ms", "must be > 0"));
    }
    if health.timeout_ms == 0 {
        errors.push(ValidationError::new("health_check.timeout_ms", "must be > 0"));
    }
    if health.interval_ms >= failover.unhealthy_timeout_ms {
        errors.push(ValidationError::new(
            "health_check.interval_ms",
            "must be shorter than failover.unhealthy_timeout_ms",
        ));
    }
}

pub fn validate_monitor_config(config: &MonitorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_socket_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_failover(&mut errors, &config.failover);
    check_health(&mut errors, &config.health_check, &config.failover);
    if config.timeouts.request_ms == 0 {
        errors.push(ValidationError::new("timeouts.request_ms", "must be > 0"));
    }
    if config.observability.metrics_enabled {
        check_socket_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }
    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn validate_agent_config(config: &AgentConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !(config.monitor.url.starts_with("http://") || config.monitor.url.starts_with("https://")) {
        errors.push(ValidationError::new("monitor.url", "must be an http(s) URL"));
    }
    if config.node.formation.is_empty() {
        errors.push(ValidationError::new("node.formation", "must not be empty"));
    }
    if config.node.host.is_empty() {
        errors.push(ValidationError::new("node.host", "must not be empty"));
    }
    if config.node.port == 0 {
        errors.push(ValidationError::new("node.port", "must not be 0"));
    }
    if config.node.candidate_priority > 100 {
        errors.push(ValidationError::new("node.candidate_priority", "must be within 0..=100"));
    }
    if config.agent.poll_interval_ms == 0 {
        errors.push(ValidationError::new("agent.poll_interval_ms", "must be > 0"));
    }
    if config.agent.state_file.is_empty() {
        errors.push(ValidationError::new("agent.state_file", "must not be empty"));
    }
    if config.agent.retry_base_ms > config.agent.retry_max_ms {
        errors.push(ValidationError::new("agent.retry_base_ms", "must not exceed agent.retry_max_ms"));
    }
    if config.driver.kind == DriverKind::Command {
        let commands = &config.driver.commands;
        let required = [
            ("driver.commands.is_running", &commands.is_running),
            ("driver.commands.current_lsn", &commands.current_lsn),
            ("driver.commands.is_in_recovery", &commands.is_in_recovery),
            ("driver.commands.promote", &commands.promote),
            ("driver.commands.demote", &commands.demote),
            ("driver.commands.start_replication", &commands.start_replication),
        ];
        for (field, command) in required {
            if command.is_empty() {
                errors.push(ValidationError::new(field, "required by the command driver"));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
