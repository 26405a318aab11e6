//! Driver that shells out, one configured command per capability.

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

use crate::config::DriverCommands;
use crate::driver::{DatabaseDriver, DriverError, DriverResult, NodeAddress};
use crate::resilience::timeouts::with_timeout;
use crate::state::Lsn;

pub struct CommandDriver {
    commands: DriverCommands,
    timeout: Duration,
}

impl CommandDriver {
    pub fn new(commands: DriverCommands, timeout: Duration) -> Self {
        Self { commands, timeout }
    }

    /// Run `script` through `sh -c` and return its trimmed stdout.
    async fn run(
        &self,
        name: &'static str,
        script: &str,
        env: &[(&str, String)],
    ) -> DriverResult<String> {
        if script.trim().is_empty() {
            return Err(DriverError::NotConfigured(name));
        }

        let mut command = Command::new("sh");
        command.arg("-c").arg(script).kill_on_drop(true);
        for (key, value) in env {
            command.env(key, value);
        }

        tracing::debug!(operation = name, script, "Running driver command");
        let output = with_timeout(name, self.timeout, command.output()).await??;

        if !output.status.success() {
            return Err(DriverError::Command {
                command: name.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn query_bool(&self, name: &'static str, script: &str) -> DriverResult<bool> {
        let output = self.run(name, script, &[]).await?;
        parse_bool(&output).ok_or(DriverError::Parse {
            command: name.to_string(),
            output,
        })
    }
}

fn parse_bool(output: &str) -> Option<bool> {
    match output.to_ascii_lowercase().as_str() {
        "t" | "true" | "on" | "yes" | "1" => Some(true),
        "f" | "false" | "off" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn parse_address(output: &str) -> Option<NodeAddress> {
    let (host, port) = output.rsplit_once(':')?;
    let port = port.parse().ok()?;
    Some(NodeAddress::new(host, port))
}

#[async_trait]
impl DatabaseDriver for CommandDriver {
    async fn is_running(&self) -> DriverResult<bool> {
        self.query_bool("is_running", &self.commands.is_running).await
    }

    async fn ensure_running(&self) -> DriverResult<()> {
        if self.is_running().await? {
            return Ok(());
        }
        self.run("start", &self.commands.start, &[]).await.map(drop)
    }

    async fn current_lsn(&self) -> DriverResult<Lsn> {
        let output = self.run("current_lsn", &self.commands.current_lsn, &[]).await?;
        output.parse().map_err(|_| DriverError::Parse {
            command: "current_lsn".to_string(),
            output,
        })
    }

    async fn timeline(&self) -> DriverResult<u32> {
        let output = self.run("timeline", &self.commands.timeline, &[]).await?;
        output.parse().map_err(|_| DriverError::Parse {
            command: "timeline".to_string(),
            output,
        })
    }

    async fn is_in_recovery(&self) -> DriverResult<bool> {
        self.query_bool("is_in_recovery", &self.commands.is_in_recovery).await
    }

    async fn replication_source(&self) -> DriverResult<Option<NodeAddress>> {
        let output = self
            .run("replication_source", &self.commands.replication_source, &[])
            .await?;
        if output.is_empty() {
            return Ok(None);
        }
        parse_address(&output).map(Some).ok_or(DriverError::Parse {
            command: "replication_source".to_string(),
            output,
        })
    }

    async fn start_replication_from(&self, primary: &NodeAddress) -> DriverResult<()> {
        let env = [
            ("AUTOFAILOVER_PRIMARY_HOST", primary.host.clone()),
            ("AUTOFAILOVER_PRIMARY_PORT", primary.port.to_string()),
        ];
        self.run("start_replication", &self.commands.start_replication, &env)
            .await
            .map(drop)
    }

    async fn stop_replication(&self) -> DriverResult<()> {
        self.run("stop_replication", &self.commands.stop_replication, &[])
            .await
            .map(drop)
    }

    async fn promote(&self) -> DriverResult<()> {
        self.run("promote", &self.commands.promote, &[]).await.map(drop)
    }

    async fn demote(&self) -> DriverResult<()> {
        self.run("demote", &self.commands.demote, &[]).await.map(drop)
    }

    async fn apply_settings(&self, synchronous_standby_names: &str) -> DriverResult<()> {
        let env = [(
            "AUTOFAILOVER_SYNC_STANDBY_NAMES",
            synchronous_standby_names.to_string(),
        )];
        self.run("apply_settings", &self.commands.apply_settings, &env)
            .await
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(commands: DriverCommands) -> CommandDriver {
        CommandDriver::new(commands, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn parses_query_output() {
        let driver = driver(DriverCommands {
            is_running: "echo t".to_string(),
            current_lsn: "echo 0/3000060".to_string(),
            timeline: "echo 3".to_string(),
            replication_source: "echo db1:5432".to_string(),
            ..Default::default()
        });

        assert!(driver.is_running().await.unwrap());
        assert_eq!(driver.current_lsn().await.unwrap(), Lsn(0x300_0060));
        assert_eq!(driver.timeline().await.unwrap(), 3);
        assert_eq!(
            driver.replication_source().await.unwrap(),
            Some(NodeAddress::new("db1", 5432))
        );
    }

    #[tokio::test]
    async fn passes_primary_through_environment() {
        let driver = driver(DriverCommands {
            start_replication: r#"test "$AUTOFAILOVER_PRIMARY_HOST:$AUTOFAILOVER_PRIMARY_PORT" = "db9:6543""#
                .to_string(),
            ..Default::default()
        });
        driver
            .start_replication_from(&NodeAddress::new("db9", 6543))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failing_command_reports_stderr() {
        let driver = driver(DriverCommands {
            promote: "echo boom >&2; exit 3".to_string(),
            ..Default::default()
        });
        match driver.promote().await {
            Err(DriverError::Command { command, stderr, .. }) => {
                assert_eq!(command, "promote");
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected a command failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_command_is_not_configured() {
        let driver = driver(DriverCommands::default());
        assert!(matches!(driver.demote().await, Err(DriverError::NotConfigured("demote"))));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let driver = CommandDriver::new(
            DriverCommands {
                stop_replication: "sleep 5".to_string(),
                ..Default::default()
            },
            Duration::from_millis(50),
        );
        assert!(matches!(driver.stop_replication().await, Err(DriverError::Timeout(_))));
    }

    #[test]
    fn parses_booleans_leniently() {
        assert_eq!(parse_bool("t"), Some(true));
        assert_eq!(parse_bool("OFF"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
