//! Liveness probes issued by the monitor.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::resilience::timeouts::with_timeout;

#[async_trait]
pub trait Probe: Send + Sync {
    /// Whether the database at `host:port` answers within `timeout`.
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

/// Opens a TCP connection to the database port and closes it again.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> bool {
        match with_timeout("probe", timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(host, port, error = %e, "Probe failed: connection error");
                false
            }
            Err(e) => {
                tracing::debug!(host, port, error = %e, "Probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn open_port_answers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(TcpProbe.probe("127.0.0.1", port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn closed_port_does_not() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!TcpProbe.probe("127.0.0.1", port, Duration::from_millis(500)).await);
    }
}
