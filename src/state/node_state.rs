//! The node state enumeration shared by monitor and agent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// State of a node. Used both for what an agent reports (current state)
/// and for what the monitor assigns (goal state).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Init,
    Single,
    WaitPrimary,
    Primary,
    JoinPrimary,
    ApplySettings,
    Draining,
    DemoteTimeout,
    Demoted,
    WaitStandby,
    #[serde(rename = "catchingup")]
    CatchingUp,
    Secondary,
    ReportLsn,
    PreparePromotion,
    StopReplication,
    JoinSecondary,
    PrepareMaintenance,
    WaitMaintenance,
    Maintenance,
    Dropped,
}

impl NodeState {
    pub const ALL: [NodeState; 20] = [
        NodeState::Init,
        NodeState::Single,
        NodeState::WaitPrimary,
        NodeState::Primary,
        NodeState::JoinPrimary,
        NodeState::ApplySettings,
        NodeState::Draining,
        NodeState::DemoteTimeout,
        NodeState::Demoted,
        NodeState::WaitStandby,
        NodeState::CatchingUp,
        NodeState::Secondary,
        NodeState::ReportLsn,
        NodeState::PreparePromotion,
        NodeState::StopReplication,
        NodeState::JoinSecondary,
        NodeState::PrepareMaintenance,
        NodeState::WaitMaintenance,
        NodeState::Maintenance,
        NodeState::Dropped,
    ];

    /// Wire name of the state.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Init => "init",
            NodeState::Single => "single",
            NodeState::WaitPrimary => "wait_primary",
            NodeState::Primary => "primary",
            NodeState::JoinPrimary => "join_primary",
            NodeState::ApplySettings => "apply_settings",
            NodeState::Draining => "draining",
            NodeState::DemoteTimeout => "demote_timeout",
            NodeState::Demoted => "demoted",
            NodeState::WaitStandby => "wait_standby",
            NodeState::CatchingUp => "catchingup",
            NodeState::Secondary => "secondary",
            NodeState::ReportLsn => "report_lsn",
            NodeState::PreparePromotion => "prepare_promotion",
            NodeState::StopReplication => "stop_replication",
            NodeState::JoinSecondary => "join_secondary",
            NodeState::PrepareMaintenance => "prepare_maintenance",
            NodeState::WaitMaintenance => "wait_maintenance",
            NodeState::Maintenance => "maintenance",
            NodeState::Dropped => "dropped",
        }
    }

    /// States in which the node is authorised to accept writes.
    ///
    /// `join_primary` and `apply_settings` are primary variants used while
    /// the primary reconfigures replication; they still hold write authority.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            NodeState::Single
                | NodeState::WaitPrimary
                | NodeState::Primary
                | NodeState::JoinPrimary
                | NodeState::ApplySettings
        )
    }

    /// States an old primary passes through while giving up write authority.
    pub fn is_demoting(self) -> bool {
        matches!(
            self,
            NodeState::Draining | NodeState::DemoteTimeout | NodeState::PrepareMaintenance
        )
    }

    /// States that belong to an in-flight promotion of a standby.
    pub fn is_promoting(self) -> bool {
        matches!(self, NodeState::PreparePromotion | NodeState::StopReplication)
    }

    /// States of a node that is out of the replication topology on purpose.
    pub fn is_maintenance(self) -> bool {
        matches!(
            self,
            NodeState::PrepareMaintenance | NodeState::WaitMaintenance | NodeState::Maintenance
        )
    }

    /// States a group settles into when nothing is happening.
    pub fn is_stable(self) -> bool {
        matches!(
            self,
            NodeState::Single | NodeState::Primary | NodeState::Secondary | NodeState::Maintenance
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown node state {:?}", s))
    }
}
