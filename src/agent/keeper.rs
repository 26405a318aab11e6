//! The agent poll loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::agent::client::{ClientError, MonitorClient};
use crate::agent::state_file::KeeperState;
use crate::agent::transitions::{realign, run_transition, TransitionContext};
use crate::config::{AgentConfig, KeeperConfig, NodeConfig};
use crate::driver::{DatabaseDriver, NodeAddress};
use crate::monitor::{NodeActiveReply, NodeId, NodeReport, RegisterRequest};
use crate::observability::metrics;
use crate::resilience::backoff::Backoff;
use crate::state::{is_legal_transition, Lsn, NodeState};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("node is not registered with the monitor")]
    NotRegistered,

    /// The monitor dropped this node; the agent has nothing left to do.
    #[error("node {0} was removed from the monitor")]
    Removed(NodeId),

    #[error(transparent)]
    Monitor(#[from] ClientError),

    #[error("state file: {0}")]
    StateFile(#[from] std::io::Error),
}

impl AgentError {
    fn is_transient(&self) -> bool {
        matches!(self, AgentError::Monitor(e) if e.is_transient())
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Current state already matches the goal.
    Idle,
    Transitioned { from: NodeState, to: NodeState },
    /// The procedure failed; the error goes out with the next report.
    Failed { goal: NodeState, error: String },
}

pub struct Keeper {
    node: NodeConfig,
    settings: KeeperConfig,
    driver: Arc<dyn DatabaseDriver>,
    client: Arc<dyn MonitorClient>,
    state_path: Option<PathBuf>,
    state: Option<KeeperState>,
    last_error: Option<String>,
    last_lsn: Lsn,
    last_tli: u32,
}

impl Keeper {
    /// Build a keeper, resuming from the state file when there is one.
    /// An empty `state_file` setting keeps the state in memory only.
    pub fn new(
        config: &AgentConfig,
        driver: Arc<dyn DatabaseDriver>,
        client: Arc<dyn MonitorClient>,
    ) -> Result<Self, AgentError> {
        let state_path = (!config.agent.state_file.is_empty()).then(|| PathBuf::from(&config.agent.state_file));
        let state = match &state_path {
            Some(path) => KeeperState::load(path)?,
            None => None,
        };
        if let Some(state) = &state {
            tracing::info!(
                node = %state.node_id,
                current = %state.current_state,
                goal = %state.goal_state,
                "Resuming from state file"
            );
        }

        Ok(Self {
            node: config.node.clone(),
            settings: config.agent.clone(),
            driver,
            client,
            state_path,
            state,
            last_error: None,
            last_lsn: Lsn::ZERO,
            last_tli: 0,
        })
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.state.as_ref().map(|s| s.node_id)
    }

    pub fn current_state(&self) -> NodeState {
        self.state.as_ref().map(|s| s.current_state).unwrap_or_default()
    }

    pub fn goal_state(&self) -> NodeState {
        self.state.as_ref().map(|s| s.goal_state).unwrap_or_default()
    }

    /// Register with the monitor unless already registered. One attempt.
    pub async fn register(&mut self) -> Result<NodeId, AgentError> {
        if let Some(id) = self.node_id() {
            return Ok(id);
        }

        let request = RegisterRequest {
            formation: self.node.formation.clone(),
            group: self.node.group,
            name: self.node.name.clone(),
            host: self.node.host.clone(),
            port: self.node.port,
            candidate_priority: self.node.candidate_priority,
            replication_quorum: self.node.replication_quorum,
            current_state: NodeState::Init,
        };
        let reply = self.client.register(&request).await?;
        tracing::info!(
            node = %reply.node_id,
            formation = %reply.formation,
            group = reply.group,
            goal = %reply.goal_state,
            "Registered with the monitor"
        );

        let state = KeeperState {
            node_id: reply.node_id,
            formation: reply.formation,
            group: reply.group,
            current_state: NodeState::Init,
            goal_state: reply.goal_state,
        };
        self.persist(&state)?;
        self.state = Some(state);
        Ok(reply.node_id)
    }

    /// One poll cycle: report, then work towards the goal.
    pub async fn step(&mut self) -> Result<StepOutcome, AgentError> {
        let (node_id, current) = match &self.state {
            Some(state) => (state.node_id, state.current_state),
            None => return Err(AgentError::NotRegistered),
        };

        let report = self.collect_report(current).await;
        if let Some(state) = &self.state {
            self.persist(state)?;
        }

        let reply = match self.client.node_active(node_id, &report).await {
            Ok(reply) => reply,
            Err(e) if e.is_not_found() => return Err(AgentError::Removed(node_id)),
            Err(e) => match e.assignment().cloned() {
                Some(assignment) => return self.realign_with(node_id, current, assignment, &e).await,
                None => return Err(e.into()),
            },
        };
        self.last_error = None;

        let goal = reply.goal_state;
        let context = transition_context(&reply);
        if let Some(state) = self.state.as_mut() {
            state.goal_state = goal;
        }
        if goal == current {
            return Ok(StepOutcome::Idle);
        }

        match run_transition(self.driver.as_ref(), current, goal, &context).await {
            Ok(()) => {
                if let Some(state) = self.state.as_mut() {
                    state.current_state = goal;
                }
                if let Some(state) = &self.state {
                    self.persist(state)?;
                }
                tracing::info!(node = %node_id, from = %current, to = %goal, "Transition complete");
                Ok(StepOutcome::Transitioned { from: current, to: goal })
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(node = %node_id, from = %current, to = %goal, error = %error, "Transition failed");
                metrics::record_transition_failure(goal);
                self.last_error = Some(error.clone());
                Ok(StepOutcome::Failed { goal, error })
            }
        }
    }

    /// The monitor refused our report. Bring the database in line with the
    /// assignment that came back, then take on a state the monitor accepts.
    async fn realign_with(
        &mut self,
        node_id: NodeId,
        current: NodeState,
        assignment: NodeActiveReply,
        refusal: &ClientError,
    ) -> Result<StepOutcome, AgentError> {
        let goal = assignment.goal_state;
        let recorded = assignment.reported_state;
        tracing::warn!(
            node = %node_id,
            current = %current,
            recorded = %recorded,
            goal = %goal,
            error = %refusal,
            "Monitor refused the report, realigning with the assigned goal"
        );
        if let Some(state) = self.state.as_mut() {
            state.goal_state = goal;
        }

        let context = transition_context(&assignment);
        if let Err(e) = realign(self.driver.as_ref(), goal, &context).await {
            let error = e.to_string();
            tracing::warn!(node = %node_id, goal = %goal, error = %error, "Realignment failed");
            metrics::record_transition_failure(goal);
            self.last_error = Some(error.clone());
            return Ok(StepOutcome::Failed { goal, error });
        }

        let adopted = if is_legal_transition(recorded, goal) { goal } else { recorded };
        if let Some(state) = self.state.as_mut() {
            state.current_state = adopted;
        }
        if let Some(state) = &self.state {
            self.persist(state)?;
        }
        self.last_error = None;
        Ok(StepOutcome::Transitioned { from: current, to: adopted })
    }

    /// Poll until shutdown or removal.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), AgentError> {
        let mut retry = Backoff::new(self.settings.retry_base_ms, self.settings.retry_max_ms);

        loop {
            let delay = if self.state.is_none() {
                match self.register().await {
                    Ok(_) => {
                        retry.reset();
                        Duration::ZERO
                    }
                    Err(e) if e.is_transient() => {
                        let delay = retry.next_delay();
                        tracing::warn!(error = %e, attempt = retry.attempts(), ?delay, "Registration deferred");
                        delay
                    }
                    Err(e) => return Err(e),
                }
            } else {
                let started = Instant::now();
                let outcome = self.step().await;
                metrics::record_poll(started.elapsed());

                match outcome {
                    Ok(StepOutcome::Transitioned { .. }) => {
                        retry.reset();
                        self.settings.fast_poll_interval()
                    }
                    Ok(_) => {
                        retry.reset();
                        self.settings.poll_interval()
                    }
                    Err(AgentError::Removed(id)) => {
                        tracing::warn!(node = %id, "Node removed from the monitor, stopping");
                        self.forget()?;
                        return Ok(());
                    }
                    // Local state stays as it is while the monitor is out of reach.
                    Err(e) => {
                        let delay = retry.next_delay().max(self.settings.poll_interval());
                        tracing::warn!(error = %e, attempt = retry.attempts(), ?delay, "Monitor contact failed");
                        delay
                    }
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => {
                    tracing::info!("Agent stopping");
                    return Ok(());
                }
            }
        }
    }

    async fn collect_report(&mut self, current: NodeState) -> NodeReport {
        if let Err(e) = self.driver.ensure_running().await {
            tracing::warn!(error = %e, "Database is not running and could not be started");
        }
        let pg_is_running = self.driver.is_running().await.unwrap_or(false);
        if pg_is_running {
            if let Ok(lsn) = self.driver.current_lsn().await {
                self.last_lsn = lsn;
            }
            if let Ok(tli) = self.driver.timeline().await {
                self.last_tli = tli;
            }
        }

        NodeReport {
            current_state: current,
            pg_is_running,
            reported_lsn: self.last_lsn,
            reported_tli: self.last_tli,
            error: self.last_error.clone(),
        }
    }

    fn persist(&self, state: &KeeperState) -> Result<(), AgentError> {
        if let Some(path) = &self.state_path {
            state.save(path)?;
        }
        Ok(())
    }

    fn forget(&mut self) -> Result<(), AgentError> {
        self.state = None;
        if let Some(path) = &self.state_path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn transition_context(reply: &NodeActiveReply) -> TransitionContext {
    TransitionContext {
        primary: reply
            .primary
            .as_ref()
            .map(|p| NodeAddress::new(p.host.clone(), p.port)),
        synchronous_standby_names: reply.synchronous_standby_names.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::client::LocalMonitorClient;
    use crate::config::FailoverConfig;
    use crate::driver::SimulatedNetwork;
    use crate::monitor::{EventFilter, EventKind, ManualClock, MemoryStore, Monitor};

    fn monitor() -> Arc<Monitor> {
        let settings = FailoverConfig {
            startup_grace_period_ms: 0,
            ..Default::default()
        };
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        Arc::new(Monitor::open(Arc::new(MemoryStore::new()), clock, settings).unwrap())
    }

    fn keeper(monitor: &Arc<Monitor>, network: &SimulatedNetwork, host: &str) -> Keeper {
        let mut config = AgentConfig::default();
        config.node.host = host.to_string();
        config.node.name = host.to_string();
        config.agent.state_file = String::new();
        let driver = network.spawn(NodeAddress::new(host, config.node.port));
        Keeper::new(&config, driver, Arc::new(LocalMonitorClient::new(monitor.clone()))).unwrap()
    }

    #[tokio::test]
    async fn first_node_becomes_single() {
        let monitor = monitor();
        let network = SimulatedNetwork::new();
        let mut agent = keeper(&monitor, &network, "db1");

        agent.register().await.unwrap();
        assert_eq!(agent.goal_state(), NodeState::Single);

        let outcome = agent.step().await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Transitioned {
                from: NodeState::Init,
                to: NodeState::Single
            }
        );
        assert_eq!(agent.step().await.unwrap(), StepOutcome::Idle);
    }

    #[tokio::test]
    async fn step_before_registration_fails() {
        let monitor = monitor();
        let network = SimulatedNetwork::new();
        let mut agent = keeper(&monitor, &network, "db1");
        assert!(matches!(agent.step().await, Err(AgentError::NotRegistered)));
    }

    #[tokio::test]
    async fn failed_procedure_keeps_current_state() {
        let monitor = monitor();
        let network = SimulatedNetwork::new();
        let mut primary = keeper(&monitor, &network, "db1");
        primary.register().await.unwrap();
        primary.step().await.unwrap();

        let mut standby = keeper(&monitor, &network, "db2");
        standby.register().await.unwrap();
        network
            .get(&NodeAddress::new("db2", 5432))
            .unwrap()
            .set_failing("start_replication", true);

        // wait_standby needs no work, catching up does.
        standby.step().await.unwrap();
        primary.step().await.unwrap();
        primary.step().await.unwrap();
        assert_eq!(primary.current_state(), NodeState::WaitPrimary);
        let outcome = standby.step().await.unwrap();
        assert!(matches!(outcome, StepOutcome::Failed { goal: NodeState::CatchingUp, .. }));
        assert_eq!(standby.current_state(), NodeState::WaitStandby);
    }

    #[tokio::test]
    async fn transition_replayed_after_a_crash_is_reported_once() {
        let monitor = monitor();
        let network = SimulatedNetwork::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db1.state.json");

        let mut config = AgentConfig::default();
        config.node.host = "db1".to_string();
        config.node.name = "db1".to_string();
        config.agent.state_file = path.to_string_lossy().into_owned();
        let db = network.spawn(NodeAddress::new("db1", config.node.port));
        let client: Arc<dyn MonitorClient> = Arc::new(LocalMonitorClient::new(monitor.clone()));

        let mut primary = Keeper::new(&config, db.clone(), client.clone()).unwrap();
        primary.register().await.unwrap();
        primary.step().await.unwrap();
        primary.step().await.unwrap();

        let mut standby = keeper(&monitor, &network, "db2");
        standby.register().await.unwrap();

        // The procedure runs, then the agent dies before its new state is on disk.
        let saved = std::fs::read(&path).unwrap();
        assert_eq!(
            primary.step().await.unwrap(),
            StepOutcome::Transitioned {
                from: NodeState::Single,
                to: NodeState::WaitPrimary
            }
        );
        drop(primary);
        std::fs::write(&path, saved).unwrap();

        let mut restarted = Keeper::new(&config, db.clone(), client).unwrap();
        assert_eq!(restarted.current_state(), NodeState::Single);
        assert_eq!(
            restarted.step().await.unwrap(),
            StepOutcome::Transitioned {
                from: NodeState::Single,
                to: NodeState::WaitPrimary
            }
        );
        assert_eq!(restarted.step().await.unwrap(), StepOutcome::Idle);
        assert_eq!(restarted.current_state(), NodeState::WaitPrimary);
        assert!(db.accepts_writes());
        assert_eq!(db.timeline().await.unwrap(), 1);

        let node = restarted.node_id().unwrap();
        let reported = monitor
            .events(&EventFilter {
                node: Some(node),
                ..Default::default()
            })
            .into_iter()
            .filter(|e| e.kind == EventKind::StateReported && e.new_state == NodeState::WaitPrimary)
            .count();
        assert_eq!(reported, 1);
    }
}
