//! Shared harness: an in-process monitor with simulated agents.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Duration;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use autofailover::agent::{ClientError, Keeper, LocalMonitorClient, MonitorClient, StepOutcome};
use autofailover::config::{AgentConfig, FailoverConfig};
use autofailover::driver::{NodeAddress, SimulatedDatabase, SimulatedNetwork};
use autofailover::monitor::{
    GroupKey, GroupStatus, ManualClock, MemoryStore, Monitor, NodeActiveReply, NodeId, NodeReport, NodeStatus,
    RegisterReply, RegisterRequest, StateStore,
};
use autofailover::state::NodeState;

/// Failover settings with short, test-friendly timeouts and no grace period.
pub fn test_settings() -> FailoverConfig {
    FailoverConfig {
        unhealthy_timeout_ms: 20_000,
        startup_grace_period_ms: 0,
        drain_timeout_ms: 30_000,
        ..Default::default()
    }
}

/// Monitor client that can be cut off to simulate a network partition.
pub struct PartitionableClient {
    inner: Arc<dyn MonitorClient>,
    cut: AtomicBool,
}

impl PartitionableClient {
    pub fn new(inner: Arc<dyn MonitorClient>) -> Self {
        Self {
            inner,
            cut: AtomicBool::new(false),
        }
    }

    pub fn set_cut(&self, cut: bool) {
        self.cut.store(cut, Ordering::SeqCst);
    }
}

#[async_trait]
impl MonitorClient for PartitionableClient {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterReply, ClientError> {
        if self.cut.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("partitioned".into()));
        }
        self.inner.register(request).await
    }

    async fn node_active(&self, node: NodeId, report: &NodeReport) -> Result<NodeActiveReply, ClientError> {
        if self.cut.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("partitioned".into()));
        }
        self.inner.node_active(node, report).await
    }
}

pub struct TestNode {
    pub name: String,
    pub keeper: Keeper,
    pub db: Arc<SimulatedDatabase>,
    pub link: Arc<PartitionableClient>,
    /// A stopped node's agent does not run.
    pub agent_running: bool,
}

pub struct Cluster {
    pub monitor: Arc<Monitor>,
    pub clock: Arc<ManualClock>,
    pub network: SimulatedNetwork,
    pub nodes: Vec<TestNode>,
}

impl Cluster {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), test_settings())
    }

    pub fn with_store(store: Arc<dyn StateStore>, settings: FailoverConfig) -> Self {
        let clock = Arc::new(ManualClock::default());
        let monitor = Arc::new(Monitor::open(store, clock.clone(), settings).expect("monitor opens"));
        Self {
            monitor,
            clock,
            network: SimulatedNetwork::new(),
            nodes: Vec::new(),
        }
    }

    pub fn key() -> GroupKey {
        GroupKey::new("default", 0)
    }

    /// Start an agent for a new node and register it. Returns its index.
    pub async fn add_node(&mut self, name: &str, candidate_priority: u8, replication_quorum: bool) -> usize {
        let client: Arc<dyn MonitorClient> = Arc::new(LocalMonitorClient::new(self.monitor.clone()));
        self.add_node_with_client(name, candidate_priority, replication_quorum, client)
            .await
    }

    pub async fn add_node_with_client(
        &mut self,
        name: &str,
        candidate_priority: u8,
        replication_quorum: bool,
        client: Arc<dyn MonitorClient>,
    ) -> usize {
        let mut config = AgentConfig::default();
        config.node.name = name.to_string();
        config.node.host = name.to_string();
        config.node.candidate_priority = candidate_priority;
        config.node.replication_quorum = replication_quorum;
        config.agent.state_file = String::new();

        let db = self.network.spawn(NodeAddress::new(name, config.node.port));
        let link = Arc::new(PartitionableClient::new(client));
        let mut keeper = Keeper::new(&config, db.clone(), link.clone()).expect("keeper builds");
        keeper.register().await.expect("registration succeeds");

        self.nodes.push(TestNode {
            name: name.to_string(),
            keeper,
            db,
            link,
            agent_running: true,
        });
        self.nodes.len() - 1
    }

    pub async fn step(&mut self, index: usize) -> StepOutcome {
        self.nodes[index].keeper.step().await.expect("step succeeds")
    }

    /// Poll every running agent a number of times, without moving the clock.
    pub async fn settle(&mut self) {
        for _ in 0..16 {
            for node in self.nodes.iter_mut().filter(|n| n.agent_running) {
                let _ = node.keeper.step().await;
            }
        }
    }

    /// Run the monitor's periodic evaluation with no node answering the sweep.
    pub async fn sweep(&self) {
        self.monitor.evaluate_all(&HashSet::new()).await;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(Duration::seconds(secs));
    }

    /// Lose the whole machine: database and agent.
    pub fn kill(&mut self, index: usize) {
        let node = &mut self.nodes[index];
        node.db.crash();
        node.db.set_start_fails(true);
        node.agent_running = false;
    }

    /// Bring a killed machine back.
    pub fn revive(&mut self, index: usize) {
        let node = &mut self.nodes[index];
        node.db.set_start_fails(false);
        node.agent_running = true;
    }

    pub fn partition(&self, index: usize, cut: bool) {
        self.nodes[index].link.set_cut(cut);
    }

    pub fn id(&self, index: usize) -> NodeId {
        self.nodes[index].keeper.node_id().expect("registered")
    }

    pub async fn status(&self) -> GroupStatus {
        self.monitor.group_state(&Self::key()).await.expect("group exists")
    }

    pub async fn node(&self, index: usize) -> NodeStatus {
        self.monitor.node(self.id(index)).await.expect("node exists")
    }

    pub async fn goal(&self, index: usize) -> NodeState {
        self.node(index).await.summary.goal_state
    }

    /// Indices of nodes whose goal authorises writes.
    pub async fn writable(&self) -> Vec<usize> {
        let status = self.status().await;
        (0..self.nodes.len())
            .filter(|&i| {
                status
                    .nodes
                    .iter()
                    .any(|n| n.summary.node_id == self.id(i) && n.summary.goal_state.is_writable())
            })
            .collect()
    }

    /// Indices of databases that currently accept writes.
    pub fn accepting_writes(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| self.nodes[i].db.accepts_writes())
            .collect()
    }

    /// Register one node per priority, letting each join converge.
    pub async fn with_nodes(priorities: &[u8]) -> Self {
        let mut cluster = Self::new();
        for (i, priority) in priorities.iter().enumerate() {
            cluster.add_node(&format!("db{}", i + 1), *priority, true).await;
            cluster.settle().await;
        }
        cluster
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

pub const API_KEY: &str = "test-admin-key";

/// Serve `monitor` on an ephemeral 127.0.0.1 port. Returns the base URL and
/// the shutdown handle that stops the server.
pub async fn spawn_server(monitor: Arc<Monitor>) -> (String, autofailover::Shutdown) {
    let mut config = autofailover::MonitorConfig::default();
    config.admin.api_key = API_KEY.to_string();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let shutdown = autofailover::Shutdown::new();
    let server = autofailover::MonitorServer::new(monitor, &config);
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });
    (url, shutdown)
}
