//! Operator commands and node admission.
//!
//! Every function here runs inside a group transaction: it validates
//! against the working copy of the group and either changes it or returns
//! a descriptive refusal. Nothing is committed on refusal.

use crate::monitor::error::{MonitorError, MonitorResult};
use crate::monitor::events::{EventDraft, EventKind};
use crate::monitor::failover::{self, Trigger};
use crate::monitor::fsm::Evaluation;
use crate::monitor::model::{CommandKind, Node, NodeHealth, NodeId, PendingCommand};
use crate::monitor::protocol::RegisterRequest;
use crate::monitor::quorum;
use crate::state::{Lsn, NodeState};

pub const MAX_CANDIDATE_PRIORITY: u8 = 100;

fn node_of<'g>(eval: &'g Evaluation<'_>, id: NodeId) -> MonitorResult<&'g Node> {
    eval.group.node(id).ok_or(MonitorError::NodeNotFound(id))
}

fn settings_changed(eval: &mut Evaluation<'_>, id: NodeId, description: String) {
    let Some(node) = eval.group.node(id) else {
        return;
    };
    let draft = EventDraft {
        node_id: id,
        kind: EventKind::SettingsChanged,
        old_state: node.reported_state,
        new_state: node.goal_state,
        reported_lsn: node.reported_lsn,
        description,
    };
    eval.record(draft);
}

/// The primary, which must be a current `primary` for settings changes in
/// a multi-node group.
fn stable_primary(eval: &Evaluation<'_>) -> MonitorResult<Option<NodeId>> {
    if eval.group.nodes.len() < 2 {
        return Ok(None);
    }
    match eval.group.writable_node() {
        Some(p) if p.is_current(NodeState::Primary) => Ok(Some(p.id)),
        Some(p) => Err(MonitorError::NotStable(format!(
            "primary node {} is {} with goal {}, wait until it is primary",
            p.id, p.reported_state, p.goal_state
        ))),
        None => Err(MonitorError::NotStable(format!(
            "group {} has no primary",
            eval.group.key
        ))),
    }
}

fn validate_registration(req: &RegisterRequest) -> MonitorResult<()> {
    if req.formation.is_empty() {
        return Err(MonitorError::InvalidArgument("formation must not be empty".into()));
    }
    if req.host.is_empty() {
        return Err(MonitorError::InvalidArgument("host must not be empty".into()));
    }
    if req.port == 0 {
        return Err(MonitorError::InvalidArgument("port must not be 0".into()));
    }
    if req.candidate_priority > MAX_CANDIDATE_PRIORITY {
        return Err(MonitorError::InvalidArgument(format!(
            "candidate priority {} is out of range 0..={}",
            req.candidate_priority, MAX_CANDIDATE_PRIORITY
        )));
    }
    Ok(())
}

/// Add a node to the group with its initial goal state.
pub fn admit_node(eval: &mut Evaluation<'_>, id: NodeId, req: &RegisterRequest) -> MonitorResult<()> {
    validate_registration(req)?;

    let goal = if eval.group.nodes.is_empty() {
        if !matches!(req.current_state, NodeState::Init | NodeState::Single) {
            return Err(MonitorError::Conflict(format!(
                "first node of group {} must start as init or single, not {}",
                eval.group.key, req.current_state
            )));
        }
        NodeState::Single
    } else {
        if req.current_state != NodeState::Init {
            return Err(MonitorError::Conflict(format!(
                "group {} already has nodes, a new node must register in init state, not {}",
                eval.group.key, req.current_state
            )));
        }
        if eval.group.writable_node().is_none() {
            return Err(MonitorError::Busy(format!(
                "group {} has no primary at the moment",
                eval.group.key
            )));
        }
        if let Some(joining) = eval.group.nodes.values().find(|n| n.goal_state == NodeState::WaitStandby) {
            return Err(MonitorError::Busy(format!(
                "node {} is already joining group {}",
                joining.id, eval.group.key
            )));
        }
        if eval.group.failover_in_progress() {
            return Err(MonitorError::Busy(format!(
                "a failover is in progress in group {}",
                eval.group.key
            )));
        }
        NodeState::WaitStandby
    };

    let now = eval.now;
    let name = if req.name.is_empty() {
        format!("node_{}", id)
    } else {
        req.name.clone()
    };
    let node = Node {
        id,
        name,
        formation: eval.group.key.formation.clone(),
        group: eval.group.key.group,
        host: req.host.clone(),
        port: req.port,
        reported_state: req.current_state,
        goal_state: goal,
        reported_lsn: Lsn::ZERO,
        reported_tli: 0,
        pg_is_running: false,
        candidate_priority: req.candidate_priority,
        replication_quorum: req.replication_quorum,
        health: NodeHealth::Unknown,
        last_report_at: Some(now),
        last_probe_ok_at: None,
        goal_changed_at: now,
        reported_changed_at: now,
        last_error: None,
        failures: None,
    };

    let description = format!(
        "Registering node {} \"{}\" ({}) to formation \"{}\" group {} with goal state {}",
        id,
        node.name,
        node.address(),
        node.formation,
        node.group,
        goal
    );
    tracing::info!(
        node_id = %id,
        formation = %node.formation,
        group = node.group,
        goal = %goal,
        "Registered node"
    );
    eval.group.nodes.insert(id, node);
    eval.record(EventDraft {
        node_id: id,
        kind: EventKind::Registered,
        old_state: req.current_state,
        new_state: goal,
        reported_lsn: Lsn::ZERO,
        description,
    });

    if eval.group.nodes.len() == 3 && eval.group.number_sync_standbys == 0 {
        eval.group.number_sync_standbys = 1;
        settings_changed(
            eval,
            id,
            format!(
                "Setting number_sync_standbys of group {} to 1 now that it has three nodes",
                eval.group.key
            ),
        );
    }
    Ok(())
}

/// Validate an operator failover or switchover and leave it pending.
pub fn request_failover(eval: &mut Evaluation<'_>, kind: CommandKind) -> MonitorResult<()> {
    let key = &eval.group.key;
    if eval.group.nodes.len() < 2 {
        return Err(MonitorError::NotStable(format!(
            "group {} has fewer than two nodes",
            key
        )));
    }
    let primary = eval
        .group
        .writable_node()
        .ok_or_else(|| MonitorError::NotStable(format!("group {} has no primary", key)))?;
    if eval.group.failover_in_progress() {
        return Err(MonitorError::NotStable(format!(
            "a failover is already in progress in group {}",
            key
        )));
    }
    if let Some(pending) = &eval.group.pending {
        return Err(MonitorError::Conflict(format!(
            "a {} is already pending in group {}",
            pending.kind, key
        )));
    }
    if kind == CommandKind::Switchover && !(primary.is_current(NodeState::Primary) && eval.is_healthy(primary)) {
        return Err(MonitorError::NotStable(format!(
            "switchover needs a healthy primary, node {} is {} with goal {}",
            primary.id, primary.reported_state, primary.goal_state
        )));
    }
    let has_candidate = eval
        .group
        .others(primary.id)
        .any(|n| failover::is_eligible_standby(eval, n));
    if !has_candidate {
        return Err(MonitorError::NoCandidate(format!(
            "group {} has no healthy secondary with a nonzero candidate priority",
            key
        )));
    }

    tracing::info!(group = %key, command = %kind, "Operator command accepted");
    eval.group.pending = Some(PendingCommand {
        kind,
        requested_at: eval.now,
    });
    eval.mark_dirty();
    Ok(())
}

/// Drop a pending failover or switchover before it starts.
pub fn cancel_pending(eval: &mut Evaluation<'_>) -> MonitorResult<CommandKind> {
    match eval.group.pending.take() {
        Some(pending) => {
            tracing::info!(group = %eval.group.key, command = %pending.kind, "Operator command cancelled");
            eval.mark_dirty();
            Ok(pending.kind)
        }
        None if eval.group.failover_in_progress() => Err(MonitorError::NotStable(format!(
            "failover in group {} has already started and must run to completion",
            eval.group.key
        ))),
        None => Err(MonitorError::Conflict(format!(
            "no pending command in group {}",
            eval.group.key
        ))),
    }
}

pub fn enable_maintenance(eval: &mut Evaluation<'_>, id: NodeId) -> MonitorResult<()> {
    let node = node_of(eval, id)?;
    if node.goal_state.is_maintenance() {
        return Ok(());
    }

    if node.goal_state.is_writable() {
        if !node.is_current(NodeState::Primary) {
            return Err(MonitorError::NotStable(format!(
                "node {} is {} with goal {}, maintenance needs a stable primary",
                id, node.reported_state, node.goal_state
            )));
        }
        if eval.group.failover_in_progress() || eval.group.pending.is_some() {
            return Err(MonitorError::NotStable(format!(
                "a failover is already under way in group {}",
                eval.group.key
            )));
        }
        return failover::start_failover(eval, id, NodeState::PrepareMaintenance, Trigger::Maintenance)
            .map_err(MonitorError::NoCandidate);
    }

    if !(node.is_current(NodeState::Secondary) || node.is_current(NodeState::CatchingUp)) {
        return Err(MonitorError::NotStable(format!(
            "node {} is {} with goal {}, maintenance needs secondary or catchingup",
            id, node.reported_state, node.goal_state
        )));
    }
    let quorum_member = node.replication_quorum;
    let primary = eval
        .group
        .writable_node()
        .map(|p| (p.id, p.is_current(NodeState::Primary)))
        .ok_or_else(|| MonitorError::NotStable(format!("group {} has no primary", eval.group.key)))?;

    eval.assign(id, NodeState::WaitMaintenance, "operator enabled maintenance");

    let (primary, primary_stable) = primary;
    if primary_stable {
        if !quorum::is_satisfied(eval, primary) {
            eval.assign(
                primary,
                NodeState::WaitPrimary,
                "a standby enters maintenance, not enough synchronous standbys remain",
            );
        } else if quorum_member {
            eval.assign(
                primary,
                NodeState::ApplySettings,
                "a standby enters maintenance, updating synchronous_standby_names",
            );
        }
    }
    Ok(())
}

pub fn disable_maintenance(eval: &mut Evaluation<'_>, id: NodeId) -> MonitorResult<()> {
    let node = node_of(eval, id)?;
    if !node.is_current(NodeState::Maintenance) {
        return Err(MonitorError::NotStable(format!(
            "node {} is {} with goal {}, not in maintenance",
            id, node.reported_state, node.goal_state
        )));
    }
    let has_primary = eval.group.writable_node().is_some() || eval.group.demoting_node().is_some();
    if !has_primary {
        return Err(MonitorError::NotStable(format!(
            "group {} has no primary to replicate from",
            eval.group.key
        )));
    }
    eval.assign(id, NodeState::CatchingUp, "operator disabled maintenance");
    Ok(())
}

pub fn set_candidate_priority(eval: &mut Evaluation<'_>, id: NodeId, value: u8) -> MonitorResult<()> {
    if value > MAX_CANDIDATE_PRIORITY {
        return Err(MonitorError::InvalidArgument(format!(
            "candidate priority {} is out of range 0..={}",
            value, MAX_CANDIDATE_PRIORITY
        )));
    }
    let node = node_of(eval, id)?;
    let old = node.candidate_priority;
    if old == value {
        return Ok(());
    }
    if value == 0 {
        let others = eval.group.others(id).filter(|n| n.candidate_priority > 0).count();
        if others < 2 {
            return Err(MonitorError::Conflict(format!(
                "group {} needs at least two other nodes with a nonzero candidate priority",
                eval.group.key
            )));
        }
    }
    let primary = stable_primary(eval)?;

    if let Some(node) = eval.group.nodes.get_mut(&id) {
        node.candidate_priority = value;
    }
    settings_changed(
        eval,
        id,
        format!("Updating candidate priority of node {} from {} to {}", id, old, value),
    );
    if let Some(primary) = primary {
        eval.assign(primary, NodeState::ApplySettings, "candidate priority changed");
    }
    Ok(())
}

pub fn set_replication_quorum(eval: &mut Evaluation<'_>, id: NodeId, value: bool) -> MonitorResult<()> {
    let node = node_of(eval, id)?;
    if node.replication_quorum == value {
        return Ok(());
    }
    if !value && !node.goal_state.is_writable() {
        let remaining = eval
            .group
            .nodes
            .values()
            .filter(|n| n.id != id && !n.goal_state.is_writable())
            .filter(|n| n.replication_quorum && !n.goal_state.is_maintenance())
            .count() as u32;
        if remaining < eval.group.number_sync_standbys {
            return Err(MonitorError::Conflict(format!(
                "number_sync_standbys is {} and only {} quorum standbys would remain",
                eval.group.number_sync_standbys, remaining
            )));
        }
    }
    let primary = stable_primary(eval)?;

    if let Some(node) = eval.group.nodes.get_mut(&id) {
        node.replication_quorum = value;
    }
    settings_changed(
        eval,
        id,
        format!("Updating replication quorum of node {} to {}", id, value),
    );
    if let Some(primary) = primary {
        eval.assign(primary, NodeState::ApplySettings, "replication quorum changed");
    }
    Ok(())
}

pub fn set_number_sync_standbys(eval: &mut Evaluation<'_>, value: u32) -> MonitorResult<()> {
    let old = eval.group.number_sync_standbys;
    if old == value {
        return Ok(());
    }
    let quorum_standbys = eval
        .group
        .nodes
        .values()
        .filter(|n| !n.goal_state.is_writable() && n.replication_quorum)
        .filter(|n| !n.goal_state.is_maintenance() && n.goal_state != NodeState::Dropped)
        .count() as u32;
    if value > quorum_standbys {
        return Err(MonitorError::InvalidArgument(format!(
            "number_sync_standbys {} exceeds the {} quorum standbys of group {}",
            value, quorum_standbys, eval.group.key
        )));
    }
    let primary = stable_primary(eval)?;
    let Some(anchor) = primary.or_else(|| eval.group.nodes.keys().next().copied()) else {
        return Err(MonitorError::GroupNotFound(eval.group.key.clone()));
    };

    eval.group.number_sync_standbys = value;
    settings_changed(
        eval,
        anchor,
        format!(
            "Updating number_sync_standbys of group {} from {} to {}",
            eval.group.key, old, value
        ),
    );
    if let Some(primary) = primary {
        eval.assign(primary, NodeState::ApplySettings, "number_sync_standbys changed");
    }
    Ok(())
}

/// Delete a node. A removed primary makes the remaining standbys elect a
/// new one.
pub fn remove_node(eval: &mut Evaluation<'_>, id: NodeId) -> MonitorResult<Node> {
    let node = eval
        .group
        .nodes
        .remove(&id)
        .ok_or(MonitorError::NodeNotFound(id))?;

    tracing::info!(node_id = %id, group = %eval.group.key, "Removing node");
    eval.record(EventDraft {
        node_id: id,
        kind: EventKind::Removed,
        old_state: node.reported_state,
        new_state: NodeState::Dropped,
        reported_lsn: node.reported_lsn,
        description: format!("Removing node {} \"{}\" ({})", id, node.name, node.address()),
    });

    if eval.group.pending.is_some() && eval.group.nodes.len() < 2 {
        eval.group.pending = None;
    }
    if node.goal_state.is_writable() || node.goal_state.is_demoting() {
        failover::start_orphan_election(eval, id);
    }
    Ok(node)
}
