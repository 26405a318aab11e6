//! Monitor error taxonomy.

use thiserror::Error;

use crate::monitor::model::{GroupKey, NodeId};
use crate::monitor::protocol::NodeActiveReply;
use crate::monitor::store::StoreError;
use crate::state::NodeState;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// No node with this id is registered.
    #[error("node {0} is not registered")]
    NodeNotFound(NodeId),

    /// No group with this key exists.
    #[error("group {0} does not exist")]
    GroupNotFound(GroupKey),

    /// Reported jump is not an edge of the transition table.
    #[error("node {node} can not report {to} after {from}: not a legal transition")]
    IllegalTransition {
        node: NodeId,
        from: NodeState,
        to: NodeState,
    },

    /// Agent reported a write-enabling state the monitor never assigned.
    #[error("node {node} reported {reported} but its goal state is {goal}")]
    UnauthorizedState {
        node: NodeId,
        reported: NodeState,
        goal: NodeState,
    },

    /// A refused report. The node's unchanged assignment travels with the
    /// refusal so that the agent can realign with it.
    #[error("{reason}")]
    ReportRejected {
        reason: Box<MonitorError>,
        reply: Box<NodeActiveReply>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transient refusal; the caller should retry later.
    #[error("busy: {0}")]
    Busy(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The group is not in a state where the command applies.
    #[error("group not stable: {0}")]
    NotStable(String),

    #[error("no eligible promotion candidate: {0}")]
    NoCandidate(String),

    /// A commit would have produced two write-authorised nodes.
    #[error("refusing to commit: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MonitorError {
    /// Short machine-readable tag used on the wire and in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorError::NodeNotFound(_) => "node_not_found",
            MonitorError::GroupNotFound(_) => "group_not_found",
            MonitorError::IllegalTransition { .. } => "illegal_transition",
            MonitorError::UnauthorizedState { .. } => "unauthorized_state",
            MonitorError::ReportRejected { reason, .. } => reason.kind(),
            MonitorError::InvalidArgument(_) => "invalid_argument",
            MonitorError::Busy(_) => "busy",
            MonitorError::Conflict(_) => "conflict",
            MonitorError::NotStable(_) => "not_stable",
            MonitorError::NoCandidate(_) => "no_candidate",
            MonitorError::InvariantViolation(_) => "invariant_violation",
            MonitorError::Store(_) => "storage",
        }
    }

    /// Whether an agent should simply try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MonitorError::Busy(_) | MonitorError::Store(_))
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transition_message_names_both_states() {
        let err = MonitorError::IllegalTransition {
            node: NodeId(3),
            from: NodeState::Secondary,
            to: NodeState::Primary,
        };
        assert_eq!(
            err.to_string(),
            "node 3 can not report primary after secondary: not a legal transition"
        );
        assert_eq!(err.kind(), "illegal_transition");
        assert!(!err.is_retryable());
    }

    #[test]
    fn busy_is_retryable() {
        assert!(MonitorError::Busy("standby joining".into()).is_retryable());
    }
}
