//! Synchronous replication quorum accounting.

use crate::monitor::fsm::Evaluation;
use crate::monitor::model::{Group, Node, NodeId};
use crate::state::NodeState;

/// Standbys that take part in the topology: not dropped, not in maintenance.
fn participating(group: &Group, primary: NodeId) -> impl Iterator<Item = &Node> {
    group
        .others(primary)
        .filter(|n| n.goal_state != NodeState::Dropped && !n.goal_state.is_maintenance())
}

/// Acknowledging standbys the primary needs before it may leave wait_primary.
///
/// `number_sync_standbys` when set; otherwise one as soon as any standby
/// participates in the quorum, and zero for a fully asynchronous group.
pub fn required(group: &Group, primary: NodeId) -> u32 {
    if group.number_sync_standbys > 0 {
        return group.number_sync_standbys;
    }
    let any_quorum = group
        .others(primary)
        .any(|n| n.replication_quorum && n.goal_state != NodeState::Dropped);
    u32::from(any_quorum)
}

/// Healthy, caught-up secondaries that count toward the quorum.
pub fn in_sync_count(eval: &Evaluation<'_>, primary: NodeId) -> u32 {
    let Some(primary_node) = eval.group.node(primary) else {
        return 0;
    };
    let primary_lsn = primary_node.reported_lsn;
    let threshold = eval.settings.catchup_lsn_threshold;

    participating(&eval.group, primary)
        .filter(|n| n.replication_quorum && n.is_current(NodeState::Secondary))
        .filter(|n| eval.is_healthy(n) && n.reported_lsn.lag_behind(primary_lsn) <= threshold)
        .count() as u32
}

/// Whether the primary can hold `primary` rather than `wait_primary`.
pub fn is_satisfied(eval: &Evaluation<'_>, primary: NodeId) -> bool {
    let required = required(&eval.group, primary);
    if required > 0 {
        return in_sync_count(eval, primary) >= required;
    }
    // Asynchronous group: one healthy secondary is enough.
    participating(&eval.group, primary).any(|n| n.is_current(NodeState::Secondary) && eval.is_healthy(n))
}

/// Value for the primary's `synchronous_standby_names` setting.
pub fn synchronous_standby_names(group: &Group) -> String {
    let Some(primary) = group.writable_node() else {
        return String::new();
    };

    let mut standbys: Vec<&Node> = participating(group, primary.id)
        .filter(|n| n.replication_quorum)
        .collect();
    if standbys.is_empty() {
        return String::new();
    }
    if group.number_sync_standbys == 0 && primary.goal_state == NodeState::WaitPrimary {
        return String::new();
    }

    standbys.sort_by(|a, b| {
        b.candidate_priority
            .cmp(&a.candidate_priority)
            .then(a.id.cmp(&b.id))
    });
    let same_priority = standbys
        .windows(2)
        .all(|pair| pair[0].candidate_priority == pair[1].candidate_priority);
    let method = if same_priority { "ANY" } else { "FIRST" };
    let names: Vec<String> = standbys.iter().map(|n| n.standby_name()).collect();

    format!(
        "{} {} ({})",
        method,
        group.number_sync_standbys.max(1),
        names.join(", ")
    )
}
