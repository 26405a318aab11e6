//! Wire types of the agent RPC and the query API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitor::model::{Group, Node, NodeHealth, NodeId, PendingCommand};
use crate::state::{Lsn, NodeState};

fn default_formation() -> String {
    "default".to_string()
}

fn default_priority() -> u8 {
    100
}

fn default_true() -> bool {
    true
}

/// Registration of a new node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default = "default_formation")]
    pub formation: String,
    #[serde(default)]
    pub group: Option<u32>,
    #[serde(default)]
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_priority")]
    pub candidate_priority: u8,
    #[serde(default = "default_true")]
    pub replication_quorum: bool,
    /// State the agent believes its database is in. Only `init` is accepted
    /// for a node joining an existing group.
    #[serde(default)]
    pub current_state: NodeState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterReply {
    pub node_id: NodeId,
    pub formation: String,
    pub group: u32,
    pub goal_state: NodeState,
    pub candidate_priority: u8,
    pub replication_quorum: bool,
}

/// Periodic report sent by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub current_state: NodeState,
    pub pg_is_running: bool,
    #[serde(default)]
    pub reported_lsn: Lsn,
    #[serde(default)]
    pub reported_tli: u32,
    /// Last transition procedure failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What an agent needs to know about its peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub node_id: NodeId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub reported_state: NodeState,
    pub goal_state: NodeState,
    pub reported_lsn: Lsn,
    pub candidate_priority: u8,
    pub replication_quorum: bool,
    pub health: NodeHealth,
}

impl From<&Node> for NodeSummary {
    fn from(node: &Node) -> Self {
        Self {
            node_id: node.id,
            name: node.name.clone(),
            host: node.host.clone(),
            port: node.port,
            reported_state: node.reported_state,
            goal_state: node.goal_state,
            reported_lsn: node.reported_lsn,
            candidate_priority: node.candidate_priority,
            replication_quorum: node.replication_quorum,
            health: node.health,
        }
    }
}

/// Monitor answer to a report: the goal plus peer information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeActiveReply {
    pub node_id: NodeId,
    pub formation: String,
    pub group: u32,
    pub goal_state: NodeState,
    /// State the monitor last accepted from the caller.
    #[serde(default)]
    pub reported_state: NodeState,
    pub candidate_priority: u8,
    pub replication_quorum: bool,
    /// Other nodes of the group.
    pub nodes: Vec<NodeSummary>,
    /// The write-authorised node, when there is one and it is not the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<NodeSummary>,
    pub synchronous_standby_names: String,
}

/// Full view of one node, including failure bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(flatten)]
    pub summary: NodeSummary,
    pub reported_tli: u32,
    pub pg_is_running: bool,
    pub last_contact: Option<DateTime<Utc>>,
    pub goal_changed_at: DateTime<Utc>,
    pub reported_changed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub promotion_blocked_until: Option<DateTime<Utc>>,
}

impl From<&Node> for NodeStatus {
    fn from(node: &Node) -> Self {
        Self {
            summary: NodeSummary::from(node),
            reported_tli: node.reported_tli,
            pg_is_running: node.pg_is_running,
            last_contact: node.last_contact(),
            goal_changed_at: node.goal_changed_at,
            reported_changed_at: node.reported_changed_at,
            last_error: node.last_error.clone(),
            promotion_blocked_until: node.failures.as_ref().and_then(|f| f.blocked_until),
        }
    }
}

/// State of a whole group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStatus {
    pub formation: String,
    pub group: u32,
    pub number_sync_standbys: u32,
    pub synchronous_standby_names: String,
    pub failover_in_progress: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingCommand>,
    pub nodes: Vec<NodeStatus>,
}

impl GroupStatus {
    pub fn new(group: &Group, synchronous_standby_names: String) -> Self {
        Self {
            formation: group.key.formation.clone(),
            group: group.key.group,
            number_sync_standbys: group.number_sync_standbys,
            synchronous_standby_names,
            failover_in_progress: group.failover_in_progress(),
            pending: group.pending.clone(),
            nodes: group.nodes.values().map(NodeStatus::from).collect(),
        }
    }
}

/// Body of the `PUT` operator routes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SettingValue<T> {
    pub value: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStandbyNames {
    pub formation: String,
    pub group: u32,
    pub synchronous_standby_names: String,
}
