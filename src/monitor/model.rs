//! Node and group records owned by the monitor.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::state::{is_legal_transition, Lsn, NodeState};

/// Monitor-assigned node identifier. Lower ids win candidate ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Identifies one replication group inside a formation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub formation: String,
    pub group: u32,
}

impl GroupKey {
    pub fn new(formation: impl Into<String>, group: u32) -> Self {
        Self {
            formation: formation.into(),
            group,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.formation, self.group)
    }
}

/// Reachability as last computed by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeHealth {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

/// Repeated failures reported by an agent for the same goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionFailures {
    pub goal: NodeState,
    pub count: u32,
    pub first_failed_at: DateTime<Utc>,
    /// Set once the failure limit is reached; the node is not picked as a
    /// promotion candidate before this instant.
    pub blocked_until: Option<DateTime<Utc>>,
}

/// One database node as tracked by the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub formation: String,
    pub group: u32,
    pub host: String,
    pub port: u16,

    pub reported_state: NodeState,
    pub goal_state: NodeState,
    pub reported_lsn: Lsn,
    pub reported_tli: u32,
    pub pg_is_running: bool,

    pub candidate_priority: u8,
    pub replication_quorum: bool,

    pub health: NodeHealth,
    pub last_report_at: Option<DateTime<Utc>>,
    pub last_probe_ok_at: Option<DateTime<Utc>>,
    pub goal_changed_at: DateTime<Utc>,
    pub reported_changed_at: DateTime<Utc>,

    pub last_error: Option<String>,
    pub failures: Option<TransitionFailures>,
}

impl Node {
    pub fn key(&self) -> GroupKey {
        GroupKey::new(self.formation.clone(), self.group)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reported state has caught up with the goal.
    pub fn has_converged(&self) -> bool {
        self.reported_state == self.goal_state
    }

    /// Both goal and reported state equal `state`.
    pub fn is_current(&self, state: NodeState) -> bool {
        self.reported_state == state && self.goal_state == state
    }

    /// The agent can move from its reported state straight to `goal`.
    pub fn can_reach(&self, goal: NodeState) -> bool {
        self.reported_state == goal || is_legal_transition(self.reported_state, goal)
    }

    /// Most recent successful contact, from either an agent report or a probe.
    pub fn last_contact(&self) -> Option<DateTime<Utc>> {
        match (self.last_report_at, self.last_probe_ok_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_reachable_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.last_contact()
            .map(|contact| now - contact <= timeout)
            .unwrap_or(false)
    }

    pub fn is_promotion_blocked(&self, now: DateTime<Utc>) -> bool {
        self.failures
            .as_ref()
            .and_then(|f| f.blocked_until)
            .map(|until| now < until)
            .unwrap_or(false)
    }

    /// Name used for this node in `synchronous_standby_names`.
    pub fn standby_name(&self) -> String {
        format!("pgautofailover_standby_{}", self.id)
    }
}

/// Operator request waiting for the next evaluation of its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Failover,
    Switchover,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Failover => f.write_str("failover"),
            CommandKind::Switchover => f.write_str("switchover"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub kind: CommandKind,
    pub requested_at: DateTime<Utc>,
}

/// A replication group: the unit of mutual exclusion on the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub key: GroupKey,
    pub number_sync_standbys: u32,
    pub nodes: BTreeMap<NodeId, Node>,
    pub pending: Option<PendingCommand>,
}

impl Group {
    pub fn new(key: GroupKey) -> Self {
        Self {
            key,
            number_sync_standbys: 0,
            nodes: BTreeMap::new(),
            pending: None,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// The node holding write authority according to its goal state.
    pub fn writable_node(&self) -> Option<&Node> {
        self.nodes.values().find(|n| n.goal_state.is_writable())
    }

    /// An old primary on its way out (draining, demote_timeout, prepare_maintenance).
    pub fn demoting_node(&self) -> Option<&Node> {
        self.nodes.values().find(|n| n.goal_state.is_demoting())
    }

    /// Node currently being promoted, if any.
    pub fn promoting_node(&self) -> Option<&Node> {
        self.nodes.values().find(|n| n.goal_state.is_promoting())
    }

    /// Every node except `id`.
    pub fn others(&self, id: NodeId) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(move |n| n.id != id)
    }

    /// A failover is under way: an old primary is being demoted, a
    /// candidate is being promoted, or standbys are reporting positions.
    pub fn failover_in_progress(&self) -> bool {
        self.nodes.values().any(|n| {
            n.goal_state.is_demoting()
                || n.goal_state.is_promoting()
                || n.goal_state == NodeState::ReportLsn
        })
    }

    /// Number of nodes whose goal state authorises writes.
    pub fn writable_goal_count(&self) -> usize {
        self.nodes.values().filter(|n| n.goal_state.is_writable()).count()
    }
}
