//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every registered node
//! - Re-evaluate every group on each tick

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::health::probe::Probe;
use crate::monitor::{Monitor, NodeId};

pub struct HealthMonitor {
    monitor: Arc<Monitor>,
    config: Arc<ArcSwap<HealthCheckConfig>>,
    probe: Arc<dyn Probe>,
}

impl HealthMonitor {
    pub fn new(monitor: Arc<Monitor>, config: Arc<ArcSwap<HealthCheckConfig>>, probe: Arc<dyn Probe>) -> Self {
        Self { monitor, config, probe }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let initial = self.config.load_full();
        tracing::info!(
            interval_ms = initial.interval_ms,
            probing = initial.enabled,
            "Health monitor starting"
        );

        let mut period = initial.interval();
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;

                    let current = self.config.load().interval();
                    if current != period {
                        tracing::info!(interval_ms = current.as_millis() as u64, "Health check interval changed");
                        period = current;
                        ticker = time::interval_at(time::Instant::now() + period, period);
                        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// One tick: probe, then evaluate every group.
    pub async fn sweep(&self) {
        let config = self.config.load_full();
        let reachable = if config.enabled {
            self.probe_all(&config).await
        } else {
            HashSet::new()
        };
        self.monitor.evaluate_all(&reachable).await;
    }

    async fn probe_all(&self, config: &HealthCheckConfig) -> HashSet<NodeId> {
        let targets = self.monitor.probe_targets().await;
        let timeout = config.timeout();

        let checks = targets.iter().map(|target| {
            let probe = self.probe.clone();
            async move {
                let ok = probe.probe(&target.host, target.port, timeout).await;
                if !ok {
                    tracing::debug!(node_id = %target.node_id, host = %target.host, port = target.port, "Node did not answer probe");
                }
                (target.node_id, ok)
            }
        });

        join_all(checks)
            .await
            .into_iter()
            .filter_map(|(id, ok)| ok.then_some(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailoverConfig;
    use crate::monitor::{ManualClock, MemoryStore, NodeHealth, RegisterRequest};
    use crate::state::NodeState;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedAnswer(bool);

    #[async_trait]
    impl Probe for FixedAnswer {
        async fn probe(&self, _host: &str, _port: u16, _timeout: Duration) -> bool {
            self.0
        }
    }

    /// Health of a node that stopped reporting 30s ago, after one sweep.
    async fn silent_node_health(answers: bool) -> NodeHealth {
        let clock = Arc::new(ManualClock::default());
        let settings = FailoverConfig {
            startup_grace_period_ms: 0,
            ..Default::default()
        };
        let monitor = Arc::new(Monitor::open(Arc::new(MemoryStore::new()), clock.clone(), settings).unwrap());
        let reply = monitor
            .register_node(RegisterRequest {
                formation: "default".into(),
                group: None,
                name: "db1".into(),
                host: "db1".into(),
                port: 5432,
                candidate_priority: 100,
                replication_quorum: true,
                current_state: NodeState::Init,
            })
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(30));
        let health = HealthMonitor::new(
            monitor.clone(),
            Arc::new(ArcSwap::from_pointee(HealthCheckConfig::default())),
            Arc::new(FixedAnswer(answers)),
        );
        health.sweep().await;
        monitor.node(reply.node_id).await.unwrap().summary.health
    }

    #[tokio::test]
    async fn node_answering_the_sweep_stays_reachable() {
        assert_eq!(silent_node_health(true).await, NodeHealth::Reachable);
    }

    #[tokio::test]
    async fn node_silent_to_the_sweep_becomes_unreachable() {
        assert_eq!(silent_node_health(false).await, NodeHealth::Unreachable);
    }
}
