//! Group state machine: computes goal states from group facts.
//!
//! An [`Evaluation`] works on a private copy of one group while the group
//! lock is held. Rules only look at reported states, goal states, health
//! and settings, so evaluating the same facts twice yields the same goals.
//!
//! # Rule order (one pass)
//! ```text
//! join standbys → alone → catch-up → secondary loss → primary gating
//!     → failure detection → abandon failed candidate → candidate selection
//!     → promotion progress → re-join → maintenance
//! ```
//! Passes repeat until nothing changes, bounded by `MAX_PASSES`.

use chrono::{DateTime, Utc};

use crate::config::FailoverConfig;
use crate::monitor::events::{EventDraft, EventKind};
use crate::monitor::failover;
use crate::monitor::model::{Group, Node, NodeHealth, NodeId, TransitionFailures};
use crate::monitor::protocol::NodeReport;
use crate::monitor::quorum;
use crate::observability::metrics;
use crate::state::NodeState;

const MAX_PASSES: usize = 6;

/// One read-compute-write cycle over a group.
pub struct Evaluation<'a> {
    pub group: &'a mut Group,
    pub settings: &'a FailoverConfig,
    pub now: DateTime<Utc>,
    /// Monitor is still inside its startup grace period.
    pub in_grace: bool,
    drafts: Vec<EventDraft>,
    dirty: bool,
    assignments: usize,
}

impl<'a> Evaluation<'a> {
    pub fn new(
        group: &'a mut Group,
        settings: &'a FailoverConfig,
        now: DateTime<Utc>,
        in_grace: bool,
    ) -> Self {
        Self {
            group,
            settings,
            now,
            in_grace,
            drafts: Vec::new(),
            dirty: false,
            assignments: 0,
        }
    }

    pub fn is_reachable(&self, node: &Node) -> bool {
        self.in_grace || node.is_reachable_at(self.now, self.settings.unhealthy_timeout())
    }

    /// Reachable and running its database.
    pub fn is_healthy(&self, node: &Node) -> bool {
        self.is_reachable(node) && node.pg_is_running
    }

    /// Assign a new goal state. Returns false when the goal was already set.
    pub fn assign(&mut self, id: NodeId, goal: NodeState, reason: &str) -> bool {
        let now = self.now;
        let Some(node) = self.group.nodes.get_mut(&id) else {
            return false;
        };
        if node.goal_state == goal {
            return false;
        }

        let old = node.goal_state;
        node.goal_state = goal;
        node.goal_changed_at = now;

        tracing::info!(
            formation = %node.formation,
            group = node.group,
            node_id = %id,
            from = %old,
            to = %goal,
            reason,
            "Assigned goal state"
        );
        metrics::record_goal_assignment(old, goal);

        self.drafts.push(EventDraft {
            node_id: id,
            kind: EventKind::GoalAssigned,
            old_state: old,
            new_state: goal,
            reported_lsn: node.reported_lsn,
            description: format!(
                "Setting goal state of node {} \"{}\" ({}) to {}: {}",
                id,
                node.name,
                node.address(),
                goal,
                reason
            ),
        });
        self.dirty = true;
        self.assignments += 1;
        true
    }

    /// Record an event that is not a goal assignment.
    pub fn record(&mut self, draft: EventDraft) {
        self.drafts.push(draft);
        self.dirty = true;
    }

    /// Something persisted changed without producing an event.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn finish(self) -> (Vec<EventDraft>, bool) {
        (self.drafts, self.dirty)
    }

    /// Apply an agent report to the node record. Legality is checked by the caller.
    pub fn record_report(&mut self, id: NodeId, report: &NodeReport) {
        let now = self.now;
        let limit = self.settings.promotion_failure_limit;
        let window = self.settings.promotion_failure_window();
        let Some(node) = self.group.nodes.get_mut(&id) else {
            return;
        };

        node.last_report_at = Some(now);
        node.pg_is_running = report.pg_is_running;
        node.reported_lsn = report.reported_lsn;
        node.reported_tli = report.reported_tli;

        if report.current_state != node.reported_state {
            let old = node.reported_state;
            node.reported_state = report.current_state;
            node.reported_changed_at = now;

            tracing::info!(
                node_id = %id,
                from = %old,
                to = %report.current_state,
                lsn = %report.reported_lsn,
                "Node reported new state"
            );
            metrics::record_reported_transition(old, report.current_state);

            self.drafts.push(EventDraft {
                node_id: id,
                kind: EventKind::StateReported,
                old_state: old,
                new_state: report.current_state,
                reported_lsn: report.reported_lsn,
                description: format!(
                    "Node {} \"{}\" ({}) reported new state {}",
                    id,
                    node.name,
                    node.address(),
                    report.current_state
                ),
            });
            self.dirty = true;
        }

        match &report.error {
            Some(message) => {
                let goal = node.goal_state;
                let mut failures = match node.failures.take() {
                    Some(f) if f.goal == goal && now - f.first_failed_at <= window => TransitionFailures {
                        count: f.count + 1,
                        ..f
                    },
                    _ => TransitionFailures {
                        goal,
                        count: 1,
                        first_failed_at: now,
                        blocked_until: None,
                    },
                };
                if failures.count >= limit && failures.blocked_until.is_none() {
                    failures.blocked_until = Some(now + window);
                    tracing::warn!(
                        node_id = %id,
                        goal = %goal,
                        failures = failures.count,
                        "Node keeps failing the same transition, excluding it from promotion"
                    );
                } else {
                    tracing::warn!(node_id = %id, goal = %goal, error = %message, "Node failed to reach its goal state");
                }
                node.failures = Some(failures);
                node.last_error = Some(message.clone());
                self.dirty = true;
            }
            None => {
                if node.has_converged() && node.last_error.is_some() {
                    node.last_error = None;
                    self.dirty = true;
                }
                if node.has_converged() && node.failures.is_some() && !node.is_promotion_blocked(now) {
                    node.failures = None;
                    self.dirty = true;
                }
            }
        }
    }

    /// Recompute reachability; crossings of the threshold become events.
    fn refresh_health(&mut self) {
        let now = self.now;
        let timeout = self.settings.unhealthy_timeout();
        let in_grace = self.in_grace;

        for node in self.group.nodes.values_mut() {
            let reachable = in_grace || node.is_reachable_at(now, timeout);
            let health = if reachable {
                NodeHealth::Reachable
            } else {
                NodeHealth::Unreachable
            };
            if node.health == health {
                continue;
            }

            let old = node.health;
            node.health = health;
            self.dirty = true;
            metrics::record_node_reachable(node.id, reachable);

            if health == NodeHealth::Unreachable || old == NodeHealth::Unreachable {
                let description = if reachable {
                    format!("Node {} \"{}\" ({}) is reachable again", node.id, node.name, node.address())
                } else {
                    format!(
                        "Node {} \"{}\" ({}) is unreachable: no contact for more than {} ms",
                        node.id,
                        node.name,
                        node.address(),
                        self.settings.unhealthy_timeout_ms
                    )
                };
                tracing::warn!(node_id = %node.id, reachable, "Node reachability changed");
                self.drafts.push(EventDraft {
                    node_id: node.id,
                    kind: EventKind::HealthChanged,
                    old_state: node.reported_state,
                    new_state: node.reported_state,
                    reported_lsn: node.reported_lsn,
                    description,
                });
            }
        }
    }
}

/// Run every rule until the group stops changing.
pub fn proceed_group_state(eval: &mut Evaluation<'_>) {
    eval.refresh_health();
    failover::consume_pending_command(eval);

    for _ in 0..MAX_PASSES {
        let before = eval.assignments;
        apply_rules(eval);
        if eval.assignments == before {
            return;
        }
    }
    tracing::debug!(group = %eval.group.key, "Group evaluation hit the pass limit");
}

fn apply_rules(eval: &mut Evaluation<'_>) {
    join_standbys(eval);
    return_to_single(eval);
    catch_up(eval);
    handle_secondary_loss(eval);
    gate_primary(eval);
    failover::detect_primary_failure(eval);
    failover::abandon_failed_candidate(eval);
    failover::select_candidate(eval);
    failover::advance_promotion(eval);
    rejoin(eval);
    maintenance(eval);
}

/// A registering standby needs the primary to make room for it first.
fn join_standbys(eval: &mut Evaluation<'_>) {
    let joining: Vec<(NodeId, NodeState)> = eval
        .group
        .nodes
        .values()
        .filter(|n| n.goal_state == NodeState::WaitStandby)
        .map(|n| (n.id, n.reported_state))
        .collect();
    if joining.is_empty() {
        return;
    }
    let Some((primary, goal, converged)) = eval
        .group
        .writable_node()
        .map(|p| (p.id, p.goal_state, p.has_converged()))
    else {
        return;
    };

    match goal {
        NodeState::Single => {
            eval.assign(primary, NodeState::WaitPrimary, "a standby is joining the group");
        }
        NodeState::Primary => {
            eval.assign(primary, NodeState::JoinPrimary, "a standby is joining the group");
        }
        NodeState::WaitPrimary | NodeState::JoinPrimary if converged => {
            for (id, reported) in joining {
                if matches!(reported, NodeState::Init | NodeState::WaitStandby) {
                    eval.assign(id, NodeState::CatchingUp, "primary is ready for a new standby");
                }
            }
        }
        _ => {}
    }
}

/// A primary left without standbys goes back to single.
fn return_to_single(eval: &mut Evaluation<'_>) {
    let Some(primary) = eval.group.writable_node() else {
        return;
    };
    if primary.goal_state == NodeState::Single || !primary.has_converged() {
        return;
    }
    let id = primary.id;
    if eval.group.others(id).next().is_none() {
        eval.assign(id, NodeState::Single, "no other node left in the group");
    }
}

/// Standbys close enough to the primary become secondaries.
fn catch_up(eval: &mut Evaluation<'_>) {
    let Some((primary, primary_lsn)) = eval
        .group
        .writable_node()
        .filter(|p| p.reported_state.is_writable())
        .map(|p| (p.id, p.reported_lsn))
    else {
        return;
    };
    let threshold = eval.settings.catchup_lsn_threshold;

    let ready: Vec<NodeId> = eval
        .group
        .others(primary)
        .filter(|n| n.is_current(NodeState::CatchingUp) || n.is_current(NodeState::JoinSecondary))
        .filter(|n| eval.is_healthy(n) && n.reported_lsn.lag_behind(primary_lsn) <= threshold)
        .map(|n| n.id)
        .collect();

    for id in ready {
        eval.assign(id, NodeState::Secondary, "caught up with the primary");
    }
}

/// Unhealthy secondaries fall back to catchingup; the primary waits when
/// the synchronous quorum is no longer met.
fn handle_secondary_loss(eval: &mut Evaluation<'_>) {
    let Some(primary) = eval.group.writable_node().map(|p| p.id) else {
        return;
    };

    let lost: Vec<NodeId> = eval
        .group
        .others(primary)
        .filter(|n| n.is_current(NodeState::Secondary) && !eval.is_healthy(n))
        .map(|n| n.id)
        .collect();
    for id in lost {
        eval.assign(id, NodeState::CatchingUp, "secondary is unhealthy");
    }

    let is_primary = eval
        .group
        .node(primary)
        .map(|p| p.is_current(NodeState::Primary))
        .unwrap_or(false);
    if is_primary && !quorum::is_satisfied(eval, primary) {
        eval.assign(
            primary,
            NodeState::WaitPrimary,
            "not enough synchronous standbys are available",
        );
    }
}

/// wait_primary / join_primary / apply_settings settle back to primary.
fn gate_primary(eval: &mut Evaluation<'_>) {
    let Some(primary) = eval.group.writable_node() else {
        return;
    };
    if !primary.has_converged() {
        return;
    }
    let (id, goal) = (primary.id, primary.goal_state);
    let standby_joining = eval
        .group
        .nodes
        .values()
        .any(|n| n.goal_state == NodeState::WaitStandby);
    let has_standby = eval.group.others(id).next().is_some();

    match goal {
        NodeState::WaitPrimary => {
            if has_standby && quorum::is_satisfied(eval, id) {
                eval.assign(id, NodeState::Primary, "synchronous standbys are caught up");
            }
        }
        NodeState::JoinPrimary | NodeState::ApplySettings => {
            if standby_joining {
                return;
            }
            if quorum::is_satisfied(eval, id) {
                eval.assign(id, NodeState::Primary, "replication settings applied");
            } else {
                eval.assign(
                    id,
                    NodeState::WaitPrimary,
                    "replication settings applied, waiting for synchronous standbys",
                );
            }
        }
        _ => {}
    }
}

/// Demoted old primaries and leftover reporters follow the new primary.
fn rejoin(eval: &mut Evaluation<'_>) {
    let Some(primary) = eval
        .group
        .writable_node()
        .filter(|p| p.reported_state.is_writable())
        .map(|p| p.id)
    else {
        return;
    };

    let followers: Vec<(NodeId, NodeState)> = eval
        .group
        .others(primary)
        .filter_map(|n| {
            if n.is_current(NodeState::Demoted) {
                Some((n.id, NodeState::CatchingUp))
            } else if n.goal_state == NodeState::ReportLsn && n.can_reach(NodeState::JoinSecondary) {
                Some((n.id, NodeState::JoinSecondary))
            } else {
                None
            }
        })
        .collect();

    for (id, goal) in followers {
        let reason = if goal == NodeState::CatchingUp {
            "old primary rejoins as a standby of the new primary"
        } else {
            "a new primary is available"
        };
        eval.assign(id, goal, reason);
    }
}

fn maintenance(eval: &mut Evaluation<'_>) {
    let primary = eval.group.writable_node().map(|p| (p.id, p.has_converged()));

    let ready: Vec<NodeId> = eval
        .group
        .nodes
        .values()
        .filter(|n| match n.goal_state {
            NodeState::WaitMaintenance => primary.map_or(true, |(_, converged)| converged),
            NodeState::PrepareMaintenance => {
                n.has_converged() && primary.map_or(false, |(id, _)| id != n.id)
            }
            _ => false,
        })
        .map(|n| n.id)
        .collect();

    for id in ready {
        eval.assign(id, NodeState::Maintenance, "node is out of the replication topology");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::model::GroupKey;
    use crate::state::Lsn;
    use chrono::Duration;

    fn node(id: u32, reported: NodeState, goal: NodeState, now: DateTime<Utc>) -> Node {
        Node {
            id: NodeId(id),
            name: format!("node_{id}"),
            formation: "default".into(),
            group: 0,
            host: "127.0.0.1".into(),
            port: 5400 + id as u16,
            reported_state: reported,
            goal_state: goal,
            reported_lsn: Lsn(1000),
            reported_tli: 1,
            pg_is_running: true,
            candidate_priority: 100,
            replication_quorum: true,
            health: NodeHealth::Reachable,
            last_report_at: Some(now),
            last_probe_ok_at: None,
            goal_changed_at: now,
            reported_changed_at: now,
            last_error: None,
            failures: None,
        }
    }

    fn group(nodes: Vec<Node>) -> Group {
        let mut group = Group::new(GroupKey::new("default", 0));
        for n in nodes {
            group.nodes.insert(n.id, n);
        }
        group
    }

    fn run(group: &mut Group, now: DateTime<Utc>) -> Vec<EventDraft> {
        let settings = FailoverConfig::default();
        let mut eval = Evaluation::new(group, &settings, now, false);
        proceed_group_state(&mut eval);
        eval.finish().0
    }

    fn goal(group: &Group, id: u32) -> NodeState {
        group.nodes[&NodeId(id)].goal_state
    }

    #[test]
    fn stable_group_does_not_change() {
        let now = Utc::now();
        let mut g = group(vec![
            node(1, NodeState::Primary, NodeState::Primary, now),
            node(2, NodeState::Secondary, NodeState::Secondary, now),
        ]);
        let drafts = run(&mut g, now);
        assert!(drafts.iter().all(|d| d.kind != EventKind::GoalAssigned));
        assert_eq!(goal(&g, 1), NodeState::Primary);
        assert_eq!(goal(&g, 2), NodeState::Secondary);
    }

    #[test]
    fn joining_standby_moves_single_to_wait_primary() {
        let now = Utc::now();
        let mut g = group(vec![
            node(1, NodeState::Single, NodeState::Single, now),
            node(2, NodeState::Init, NodeState::WaitStandby, now),
        ]);
        run(&mut g, now);
        assert_eq!(goal(&g, 1), NodeState::WaitPrimary);
        // standby waits until the primary has actually reached wait_primary
        assert_eq!(goal(&g, 2), NodeState::WaitStandby);

        g.nodes.get_mut(&NodeId(1)).unwrap().reported_state = NodeState::WaitPrimary;
        run(&mut g, now);
        assert_eq!(goal(&g, 2), NodeState::CatchingUp);
    }

    #[test]
    fn caught_up_standby_promotes_primary_out_of_wait() {
        let now = Utc::now();
        let mut g = group(vec![
            node(1, NodeState::WaitPrimary, NodeState::WaitPrimary, now),
            node(2, NodeState::CatchingUp, NodeState::CatchingUp, now),
        ]);
        run(&mut g, now);
        assert_eq!(goal(&g, 2), NodeState::Secondary);
        assert_eq!(goal(&g, 1), NodeState::WaitPrimary);

        g.nodes.get_mut(&NodeId(2)).unwrap().reported_state = NodeState::Secondary;
        run(&mut g, now);
        assert_eq!(goal(&g, 1), NodeState::Primary);
    }

    #[test]
    fn lagging_standby_stays_catching_up() {
        let now = Utc::now();
        let mut primary = node(1, NodeState::WaitPrimary, NodeState::WaitPrimary, now);
        primary.reported_lsn = Lsn(64 * 1024 * 1024);
        let mut g = group(vec![primary, node(2, NodeState::CatchingUp, NodeState::CatchingUp, now)]);
        run(&mut g, now);
        assert_eq!(goal(&g, 2), NodeState::CatchingUp);
    }

    #[test]
    fn unhealthy_secondary_drops_primary_to_wait_primary() {
        let now = Utc::now();
        let mut secondary = node(2, NodeState::Secondary, NodeState::Secondary, now);
        secondary.last_report_at = Some(now - Duration::seconds(60));
        let mut g = group(vec![node(1, NodeState::Primary, NodeState::Primary, now), secondary]);
        run(&mut g, now);
        assert_eq!(goal(&g, 1), NodeState::WaitPrimary);
        assert_eq!(goal(&g, 2), NodeState::CatchingUp);
        assert_eq!(g.nodes[&NodeId(2)].health, NodeHealth::Unreachable);
    }

    #[test]
    fn lone_primary_returns_to_single() {
        let now = Utc::now();
        let mut g = group(vec![node(1, NodeState::Primary, NodeState::Primary, now)]);
        run(&mut g, now);
        assert_eq!(goal(&g, 1), NodeState::Single);
    }

    #[test]
    fn unreachable_crossing_is_recorded_once() {
        let now = Utc::now();
        let mut secondary = node(2, NodeState::CatchingUp, NodeState::CatchingUp, now);
        secondary.last_report_at = Some(now - Duration::seconds(60));
        let mut g = group(vec![node(1, NodeState::WaitPrimary, NodeState::WaitPrimary, now), secondary]);

        let first = run(&mut g, now);
        let second = run(&mut g, now);
        let health_events = |drafts: &[EventDraft]| {
            drafts.iter().filter(|d| d.kind == EventKind::HealthChanged).count()
        };
        assert_eq!(health_events(&first), 1);
        assert_eq!(health_events(&second), 0);
    }
}
