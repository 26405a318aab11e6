//! Configuration loading from disk.

use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

use crate::config::schema::{AgentConfig, MonitorConfig};
use crate::config::validation::{validate_agent_config, validate_monitor_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

fn load<T: DeserializeOwned>(
    path: &Path,
    validate: fn(&T) -> Result<(), Vec<ValidationError>>,
) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: T = toml::from_str(&content).map_err(ConfigError::Parse)?;

    validate(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load and validate the monitor configuration from a TOML file.
pub fn load_monitor_config(path: &Path) -> Result<MonitorConfig, ConfigError> {
    load(path, validate_monitor_config)
}

/// Load and validate the agent configuration from a TOML file.
pub fn load_agent_config(path: &Path) -> Result<AgentConfig, ConfigError> {
    load(path, validate_agent_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_monitor_config_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[failover]\nunhealthy_timeout_ms = 5000").unwrap();

        let config = load_monitor_config(file.path()).unwrap();
        assert_eq!(config.failover.unhealthy_timeout_ms, 5000);
        assert_eq!(config.failover.drain_timeout_ms, 30_000);
        assert_eq!(config.listener.bind_address, "0.0.0.0:6000");
    }

    #[test]
    fn invalid_agent_config_reports_every_problem() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[node]\nport = 0\ncandidate_priority = 120").unwrap();

        match load_agent_config(file.path()) {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation errors, got {:?}", other.map(|_| ())),
        }
    }
}
