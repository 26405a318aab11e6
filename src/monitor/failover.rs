//! Failover coordinator.
//!
//! Layered on top of the per-node states, a group moves through:
//!
//! ```text
//! Stable ──(primary unhealthy | operator request)──▶ Failure detected
//!     old primary → draining (or prepare_maintenance)
//!     one standby     → prepare_promotion
//!     several standbys → report_lsn ──▶ Candidate selection
//!                                          best standby → prepare_promotion
//! Promoting
//!     candidate: prepare_promotion → stop_replication
//!     old primary: draining → demote_timeout
//!     candidate: stop_replication → wait_primary   (old primary demoted,
//!                old primary: → demoted             unreachable, or drain
//!                others: report_lsn → join_secondary timeout elapsed)
//! Re-joining
//!     demoted → catchingup → secondary, wait_primary → primary (quorum)
//! ```
//!
//! The candidate is demoted first in the same commit that makes it
//! writable, so at most one goal state ever authorises writes.

use std::cmp::Reverse;

use crate::monitor::fsm::Evaluation;
use crate::monitor::model::{CommandKind, Node, NodeId};
use crate::monitor::quorum;
use crate::observability::metrics;
use crate::state::{Lsn, NodeState};

/// What started a failover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Automatic,
    Failover,
    Switchover,
    Maintenance,
    Removal,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Automatic => "automatic",
            Trigger::Failover => "failover",
            Trigger::Switchover => "switchover",
            Trigger::Maintenance => "maintenance",
            Trigger::Removal => "removal",
        }
    }
}

impl From<CommandKind> for Trigger {
    fn from(kind: CommandKind) -> Self {
        match kind {
            CommandKind::Failover => Trigger::Failover,
            CommandKind::Switchover => Trigger::Switchover,
        }
    }
}

/// The facts candidate ordering looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateFacts {
    pub id: NodeId,
    pub priority: u8,
    pub lsn: Lsn,
}

impl From<&Node> for CandidateFacts {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id,
            priority: node.candidate_priority,
            lsn: node.reported_lsn,
        }
    }
}

/// Highest priority, then most advanced LSN, then lowest id.
/// Priority zero is never chosen.
pub fn pick_candidate(candidates: &[CandidateFacts]) -> Option<NodeId> {
    candidates
        .iter()
        .filter(|c| c.priority > 0)
        .min_by_key(|c| (Reverse(c.priority), Reverse(c.lsn), c.id))
        .map(|c| c.id)
}

/// A standby that could take over right now.
pub fn is_eligible_standby(eval: &Evaluation<'_>, node: &Node) -> bool {
    node.is_current(NodeState::Secondary)
        && node.candidate_priority > 0
        && eval.is_healthy(node)
        && !node.is_promotion_blocked(eval.now)
}

/// Standbys that follow the failover: everything except maintenance nodes
/// and nodes still waiting to join.
fn followers(eval: &Evaluation<'_>, old_primary: NodeId) -> Vec<NodeId> {
    eval.group
        .others(old_primary)
        .filter(|n| {
            matches!(
                n.goal_state,
                NodeState::Secondary
                    | NodeState::CatchingUp
                    | NodeState::JoinSecondary
                    | NodeState::ReportLsn
            )
        })
        .map(|n| n.id)
        .collect()
}

/// Begin a failover away from `old_primary`.
///
/// `old_goal` is `draining` for failover and switchover, and
/// `prepare_maintenance` when the primary is put into maintenance.
pub fn start_failover(
    eval: &mut Evaluation<'_>,
    old_primary: NodeId,
    old_goal: NodeState,
    trigger: Trigger,
) -> Result<(), String> {
    let eligible: Vec<NodeId> = eval
        .group
        .others(old_primary)
        .filter(|n| is_eligible_standby(eval, n))
        .map(|n| n.id)
        .collect();
    if eligible.is_empty() {
        return Err(format!(
            "group {} has no healthy secondary with a nonzero candidate priority",
            eval.group.key
        ));
    }

    let standbys = followers(eval, old_primary);
    let reason = match trigger {
        Trigger::Automatic => "primary is unhealthy, starting failover",
        Trigger::Failover => "operator requested a failover",
        Trigger::Switchover => "operator requested a switchover",
        Trigger::Maintenance => "operator put the primary into maintenance",
        Trigger::Removal => "primary was removed",
    };

    tracing::warn!(
        group = %eval.group.key,
        old_primary = %old_primary,
        trigger = trigger.as_str(),
        standbys = standbys.len(),
        "Starting failover"
    );
    metrics::record_failover(trigger.as_str());

    eval.assign(old_primary, old_goal, reason);

    if standbys.len() == 1 && eligible.contains(&standbys[0]) {
        eval.assign(standbys[0], NodeState::PreparePromotion, reason);
    } else {
        for id in standbys {
            eval.assign(id, NodeState::ReportLsn, reason);
        }
    }
    Ok(())
}

/// Remaining standbys elect a new primary after the old one is gone for good.
pub fn start_orphan_election(eval: &mut Evaluation<'_>, removed: NodeId) {
    let standbys = followers(eval, removed);
    if standbys.is_empty() {
        return;
    }
    metrics::record_failover(Trigger::Removal.as_str());
    for id in standbys {
        eval.assign(id, NodeState::ReportLsn, "primary was removed");
    }
}

/// Act on an operator failover/switchover recorded by an earlier command.
pub fn consume_pending_command(eval: &mut Evaluation<'_>) {
    let Some(pending) = eval.group.pending.take() else {
        return;
    };
    eval.mark_dirty();

    let primary = eval
        .group
        .writable_node()
        .filter(|p| p.goal_state != NodeState::Single)
        .map(|p| p.id);
    let outcome = match primary {
        Some(id) if !eval.group.failover_in_progress() => {
            start_failover(eval, id, NodeState::Draining, pending.kind.into())
        }
        Some(_) => Err("a failover is already in progress".to_string()),
        None => Err("the group has no primary to fail over from".to_string()),
    };

    if let Err(reason) = outcome {
        tracing::warn!(
            group = %eval.group.key,
            command = %pending.kind,
            reason = %reason,
            "Dropping operator request"
        );
    }
}

/// Rule: a write-authorised node that is unhealthy gets replaced.
pub fn detect_primary_failure(eval: &mut Evaluation<'_>) {
    if eval.in_grace {
        return;
    }
    let Some(primary) = eval.group.writable_node() else {
        return;
    };
    if primary.goal_state == NodeState::Single
        || !primary.reported_state.is_writable()
        || eval.is_healthy(primary)
    {
        return;
    }
    let id = primary.id;
    if let Err(reason) = start_failover(eval, id, NodeState::Draining, Trigger::Automatic) {
        tracing::debug!(group = %eval.group.key, reason = %reason, "Primary is unhealthy but cannot fail over");
    }
}

/// Rule: a candidate that dies or keeps failing is sent back to report_lsn.
pub fn abandon_failed_candidate(eval: &mut Evaluation<'_>) {
    let failed: Vec<NodeId> = eval
        .group
        .nodes
        .values()
        .filter(|n| {
            n.goal_state.is_promoting()
                || (n.goal_state == NodeState::WaitPrimary && n.reported_state == NodeState::StopReplication)
        })
        .filter(|n| !eval.is_healthy(n) || n.is_promotion_blocked(eval.now))
        .map(|n| n.id)
        .collect();

    if failed.is_empty() {
        return;
    }
    for id in failed {
        eval.assign(
            id,
            NodeState::ReportLsn,
            "promotion candidate is unhealthy or failing, selecting another candidate",
        );
    }
    // Standbys that already started following the failed candidate join the election again.
    if eval.group.writable_node().is_none() {
        for id in followers(eval, NodeId(0)) {
            eval.assign(id, NodeState::ReportLsn, "promotion candidate failed, reporting LSN");
        }
    }
}

/// Rule: once every healthy standby reported its LSN, pick the candidate.
pub fn select_candidate(eval: &mut Evaluation<'_>) {
    if eval.group.writable_node().is_some() || eval.group.promoting_node().is_some() {
        return;
    }

    let reporting: Vec<&Node> = eval
        .group
        .nodes
        .values()
        .filter(|n| n.goal_state == NodeState::ReportLsn)
        .collect();
    if reporting.is_empty() {
        return;
    }

    let waited_long_enough = reporting
        .iter()
        .map(|n| n.goal_changed_at)
        .max()
        .map(|since| eval.now - since >= eval.settings.drain_timeout())
        .unwrap_or(false);
    let still_reporting = reporting
        .iter()
        .any(|n| eval.is_healthy(n) && n.reported_state != NodeState::ReportLsn);
    if still_reporting && !waited_long_enough {
        return;
    }

    // The old primary, when still known, is excluded from required-quorum accounting.
    let old_primary = eval.group.demoting_node().map(|n| n.id).unwrap_or(NodeId(0));
    let restrict_to_quorum = quorum::required(&eval.group, old_primary) > 0;

    let facts: Vec<CandidateFacts> = reporting
        .iter()
        .filter(|n| n.reported_state == NodeState::ReportLsn)
        .filter(|n| eval.is_healthy(n) && !n.is_promotion_blocked(eval.now))
        .filter(|n| !restrict_to_quorum || n.replication_quorum)
        .map(|n| CandidateFacts::from(*n))
        .collect();

    match pick_candidate(&facts) {
        Some(id) => {
            let chosen = facts.iter().find(|c| c.id == id).copied();
            let reason = chosen
                .map(|c| format!("selected for promotion with priority {} at LSN {}", c.priority, c.lsn))
                .unwrap_or_default();
            eval.assign(id, NodeState::PreparePromotion, &reason);
        }
        None => {
            tracing::debug!(group = %eval.group.key, "No promotion candidate among reporting standbys");
        }
    }
}

/// Rule: walk the candidate through stop_replication to wait_primary.
pub fn advance_promotion(eval: &mut Evaluation<'_>) {
    let preparing = eval
        .group
        .nodes
        .values()
        .find(|n| n.is_current(NodeState::PreparePromotion))
        .map(|n| n.id);
    if let Some(candidate) = preparing {
        eval.assign(candidate, NodeState::StopReplication, "candidate is ready to stop replication");
        let draining = eval
            .group
            .demoting_node()
            .filter(|d| d.goal_state == NodeState::Draining)
            .map(|d| d.id);
        if let Some(old) = draining {
            eval.assign(old, NodeState::DemoteTimeout, "waiting for the old primary to demote");
        }
    }

    let stopped = eval
        .group
        .nodes
        .values()
        .find(|n| n.is_current(NodeState::StopReplication))
        .map(|n| n.id);
    let Some(candidate) = stopped else {
        return;
    };

    let old = eval
        .group
        .demoting_node()
        .map(|d| (d.id, d.goal_state, d.reported_state, d.goal_changed_at, eval.is_healthy(d)));
    let proceed = match old {
        None => true,
        Some((_, _, reported, since, healthy)) => {
            matches!(
                reported,
                NodeState::Draining
                    | NodeState::DemoteTimeout
                    | NodeState::Demoted
                    | NodeState::PrepareMaintenance
                    | NodeState::Maintenance
            ) || !healthy
                || eval.now - since >= eval.settings.drain_timeout()
        }
    };
    if !proceed {
        return;
    }

    if let Some((old_id, old_goal, reported, since, healthy)) = old {
        if !healthy || reported.is_writable() {
            tracing::warn!(
                old_primary = %old_id,
                reachable = healthy,
                waited_ms = (eval.now - since).num_milliseconds(),
                "Promoting without confirmed demotion of the old primary"
            );
        }
        if old_goal != NodeState::PrepareMaintenance {
            eval.assign(old_id, NodeState::Demoted, "a standby is being promoted");
        }
    }
    eval.assign(candidate, NodeState::WaitPrimary, "promoted to primary");

    let reporters: Vec<NodeId> = eval
        .group
        .nodes
        .values()
        .filter(|n| n.goal_state == NodeState::ReportLsn)
        // An abandoned candidate reports report_lsn first and joins later.
        .filter(|n| n.can_reach(NodeState::JoinSecondary))
        .map(|n| n.id)
        .collect();
    for id in reporters {
        eval.assign(id, NodeState::JoinSecondary, "a new primary was promoted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(id: u32, priority: u8, lsn: u64) -> CandidateFacts {
        CandidateFacts {
            id: NodeId(id),
            priority,
            lsn: Lsn(lsn),
        }
    }

    #[test]
    fn priority_then_lsn_then_lowest_id() {
        let candidates = [facts(1, 5, 100), facts(2, 5, 90), facts(3, 3, 100)];
        for _ in 0..10 {
            assert_eq!(pick_candidate(&candidates), Some(NodeId(1)));
        }
    }

    #[test]
    fn ties_go_to_the_lowest_id() {
        let candidates = [facts(7, 50, 100), facts(4, 50, 100), facts(9, 50, 100)];
        assert_eq!(pick_candidate(&candidates), Some(NodeId(4)));
    }

    #[test]
    fn lsn_breaks_priority_ties() {
        let candidates = [facts(1, 50, 90), facts(2, 50, 120)];
        assert_eq!(pick_candidate(&candidates), Some(NodeId(2)));
    }

    #[test]
    fn zero_priority_is_never_picked() {
        let candidates = [facts(1, 0, 500), facts(2, 0, 100)];
        assert_eq!(pick_candidate(&candidates), None);
        let candidates = [facts(1, 0, 500), facts(2, 1, 100)];
        assert_eq!(pick_candidate(&candidates), Some(NodeId(2)));
    }
}
