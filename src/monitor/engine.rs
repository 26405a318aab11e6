//! The monitor: owner of every group record and its event log.
//!
//! # Locking
//! ```text
//! groups: DashMap<GroupKey, Arc<GroupSlot>>
//!     GroupSlot.state  tokio::Mutex<Group>   held for read → compute → persist
//!     GroupSlot.events EventLog (arc-swap)   appended under the group lock,
//!                                            read without it
//! ```
//! Groups never share a lock, so evaluations of different groups run in
//! parallel. Registration additionally takes a monitor-wide lock so that
//! two nodes can not claim the same address at once.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::FailoverConfig;
use crate::monitor::clock::Clock;
use crate::monitor::commands;
use crate::monitor::error::{MonitorError, MonitorResult};
use crate::monitor::events::{Event, EventFilter, EventLog};
use crate::monitor::fsm::{proceed_group_state, Evaluation};
use crate::monitor::model::{CommandKind, Group, GroupKey, Node, NodeId};
use crate::monitor::protocol::{
    GroupStatus, NodeActiveReply, NodeReport, NodeStatus, NodeSummary, RegisterReply, RegisterRequest,
};
use crate::monitor::quorum;
use crate::monitor::store::{StateStore, StoreError};
use crate::observability::metrics;
use crate::state::is_legal_transition;

struct GroupSlot {
    state: Mutex<Group>,
    events: EventLog,
}

impl GroupSlot {
    fn new(group: Group, events: EventLog) -> Self {
        Self {
            state: Mutex::new(group),
            events,
        }
    }
}

/// Whether a transaction runs the group rules after its operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Evaluate {
    Yes,
    /// Operator commands that only leave a flag for the next evaluation.
    No,
}

/// Address of a node the health sweep should probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
}

pub struct Monitor {
    groups: DashMap<GroupKey, Arc<GroupSlot>>,
    node_index: DashMap<NodeId, GroupKey>,
    addresses: DashMap<(String, u16), NodeId>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    settings: ArcSwap<FailoverConfig>,
    started_at: DateTime<Utc>,
    next_node_id: AtomicU32,
    next_event_seq: AtomicU64,
    registration: Mutex<()>,
}

impl Monitor {
    /// Load persisted groups and continue from them.
    pub fn open(
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        settings: FailoverConfig,
    ) -> MonitorResult<Self> {
        let stored = store.load_all()?;
        let started_at = clock.now();

        let groups = DashMap::new();
        let node_index = DashMap::new();
        let addresses = DashMap::new();
        let mut max_node = 0u32;
        let mut max_seq = 0u64;

        for entry in stored {
            let group = entry.group;
            for node in group.nodes.values() {
                max_node = max_node.max(node.id.0);
                node_index.insert(node.id, group.key.clone());
                addresses.insert((node.host.clone(), node.port), node.id);
            }
            let log = EventLog::from_events(entry.events);
            max_seq = max_seq.max(log.last_seq().unwrap_or(0));
            groups.insert(group.key.clone(), Arc::new(GroupSlot::new(group, log)));
        }

        tracing::info!(
            groups = groups.len(),
            nodes = node_index.len(),
            next_node_id = max_node + 1,
            "Monitor state restored"
        );

        Ok(Self {
            groups,
            node_index,
            addresses,
            store,
            clock,
            settings: ArcSwap::from_pointee(settings),
            started_at,
            next_node_id: AtomicU32::new(max_node + 1),
            next_event_seq: AtomicU64::new(max_seq + 1),
            registration: Mutex::new(()),
        })
    }

    pub fn settings(&self) -> Arc<FailoverConfig> {
        self.settings.load_full()
    }

    /// Swap in new failover tunables; the next evaluation uses them.
    pub fn reload_settings(&self, settings: FailoverConfig) {
        if *self.settings.load_full() == settings {
            return;
        }
        tracing::info!(
            unhealthy_timeout_ms = settings.unhealthy_timeout_ms,
            drain_timeout_ms = settings.drain_timeout_ms,
            "Failover settings reloaded"
        );
        self.settings.store(Arc::new(settings));
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn in_grace(&self, now: DateTime<Utc>, settings: &FailoverConfig) -> bool {
        now - self.started_at < settings.startup_grace_period()
    }

    fn slot(&self, key: &GroupKey) -> MonitorResult<Arc<GroupSlot>> {
        self.groups
            .get(key)
            .map(|slot| slot.value().clone())
            .ok_or_else(|| MonitorError::GroupNotFound(key.clone()))
    }

    fn key_of(&self, id: NodeId) -> MonitorResult<GroupKey> {
        self.node_index
            .get(&id)
            .map(|key| key.value().clone())
            .ok_or(MonitorError::NodeNotFound(id))
    }

    /// Run `op` and the group rules on a copy of the group, then commit.
    ///
    /// On any error the copy is discarded and nothing is persisted.
    async fn transact<T>(
        &self,
        slot: &GroupSlot,
        evaluate: Evaluate,
        op: impl FnOnce(&mut Evaluation<'_>) -> MonitorResult<T>,
    ) -> MonitorResult<(T, Group)> {
        let mut guard = slot.state.lock().await;
        let mut working = guard.clone();
        let settings = self.settings.load_full();
        let now = self.clock.now();
        let in_grace = self.in_grace(now, &settings);

        let (value, drafts, dirty) = {
            let mut eval = Evaluation::new(&mut working, &settings, now, in_grace);
            let value = op(&mut eval)?;
            if evaluate == Evaluate::Yes {
                proceed_group_state(&mut eval);
            }
            let (drafts, dirty) = eval.finish();
            (value, drafts, dirty)
        };

        let writers = working.writable_goal_count();
        if writers > 1 {
            tracing::error!(group = %working.key, writers, "Refusing to commit a second write-authorised node");
            return Err(MonitorError::InvariantViolation(format!(
                "group {} would have {} nodes with write authority",
                working.key, writers
            )));
        }

        let events: Vec<Event> = drafts
            .into_iter()
            .map(|draft| {
                let seq = self.next_event_seq.fetch_add(1, Ordering::SeqCst);
                draft.into_event(seq, now, &working.key)
            })
            .collect();
        if dirty || !events.is_empty() {
            // File stores fsync; keep that off the async workers.
            let store = self.store.clone();
            let snapshot = working.clone();
            let batch = events.clone();
            tokio::task::spawn_blocking(move || store.commit(&snapshot, &batch))
                .await
                .map_err(|e| StoreError::Interrupted(e.to_string()))??;
        }

        *guard = working.clone();
        slot.events.append(&events);
        Ok((value, working))
    }

    // --- agent RPC ---------------------------------------------------------

    pub async fn register_node(&self, req: RegisterRequest) -> MonitorResult<RegisterReply> {
        let _registration = self.registration.lock().await;

        let address = (req.host.clone(), req.port);
        if let Some(existing) = self.addresses.get(&address) {
            return Err(MonitorError::Conflict(format!(
                "{}:{} is already registered as node {}",
                req.host,
                req.port,
                existing.value()
            )));
        }

        let key = GroupKey::new(req.formation.clone(), req.group.unwrap_or(0));
        let slot = self
            .groups
            .entry(key.clone())
            .or_insert_with(|| Arc::new(GroupSlot::new(Group::new(key.clone()), EventLog::new())))
            .value()
            .clone();

        let id = NodeId(self.next_node_id.fetch_add(1, Ordering::SeqCst));
        let result = self
            .transact(&slot, Evaluate::Yes, |eval| commands::admit_node(eval, id, &req))
            .await;
        let group = match result {
            Ok(((), group)) => group,
            Err(e) => {
                self.groups
                    .remove_if(&key, |_, slot| slot.state.try_lock().map(|g| g.nodes.is_empty()).unwrap_or(false));
                return Err(e);
            }
        };

        self.node_index.insert(id, key);
        self.addresses.insert(address, id);

        let node = group.node(id).ok_or(MonitorError::NodeNotFound(id))?;
        Ok(RegisterReply {
            node_id: id,
            formation: node.formation.clone(),
            group: node.group,
            goal_state: node.goal_state,
            candidate_priority: node.candidate_priority,
            replication_quorum: node.replication_quorum,
        })
    }

    /// Accept a report from an agent and answer with its goal state.
    pub async fn node_active(&self, id: NodeId, report: NodeReport) -> MonitorResult<NodeActiveReply> {
        let key = self.key_of(id)?;
        let slot = self.slot(&key)?;

        let result = self
            .transact(&slot, Evaluate::Yes, |eval| {
                let node = eval.group.node(id).ok_or(MonitorError::NodeNotFound(id))?;
                validate_report(node, &report)?;
                eval.record_report(id, &report);
                Ok(())
            })
            .await;

        match result {
            Ok(((), group)) => active_reply(&group, id),
            Err(e @ (MonitorError::IllegalTransition { .. } | MonitorError::UnauthorizedState { .. })) => {
                tracing::warn!(node_id = %id, error = %e, "Rejected node report");
                metrics::record_rejected_report(e.kind());
                // The goal is unchanged; hand it back so the agent can realign.
                let group = self.snapshot(&key).await?;
                Err(MonitorError::ReportRejected {
                    reason: Box::new(e),
                    reply: Box::new(active_reply(&group, id)?),
                })
            }
            Err(e) => Err(e),
        }
    }

    // --- queries -----------------------------------------------------------

    async fn snapshot(&self, key: &GroupKey) -> MonitorResult<Group> {
        let slot = self.slot(key)?;
        let group = slot.state.lock().await;
        Ok(group.clone())
    }

    pub async fn get_nodes(&self, key: &GroupKey) -> MonitorResult<Vec<NodeStatus>> {
        let group = self.snapshot(key).await?;
        Ok(group.nodes.values().map(NodeStatus::from).collect())
    }

    /// The write-authorised node of the group, if any.
    pub async fn get_primary(&self, key: &GroupKey) -> MonitorResult<Option<NodeStatus>> {
        let group = self.snapshot(key).await?;
        Ok(group.writable_node().map(NodeStatus::from))
    }

    pub async fn synchronous_standby_names(&self, key: &GroupKey) -> MonitorResult<String> {
        let group = self.snapshot(key).await?;
        Ok(quorum::synchronous_standby_names(&group))
    }

    pub async fn group_state(&self, key: &GroupKey) -> MonitorResult<GroupStatus> {
        let group = self.snapshot(key).await?;
        Ok(status_of(&group))
    }

    /// Every group, ordered by key.
    pub async fn groups(&self) -> Vec<GroupStatus> {
        let mut keys: Vec<GroupKey> = self.groups.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        let mut statuses = Vec::with_capacity(keys.len());
        for key in keys {
            if let Ok(status) = self.group_state(&key).await {
                statuses.push(status);
            }
        }
        statuses
    }

    pub async fn node(&self, id: NodeId) -> MonitorResult<NodeStatus> {
        let key = self.key_of(id)?;
        let group = self.snapshot(&key).await?;
        group
            .node(id)
            .map(NodeStatus::from)
            .ok_or(MonitorError::NodeNotFound(id))
    }

    /// Matching events in sequence order; `limit` keeps the most recent ones.
    /// Reads never take a group lock.
    pub fn events(&self, filter: &EventFilter) -> Vec<Event> {
        let mut events: Vec<Event> = match (&filter.formation, filter.group) {
            (Some(formation), Some(group)) => self
                .groups
                .get(&GroupKey::new(formation.clone(), group))
                .map(|slot| slot.events.query(filter))
                .unwrap_or_default(),
            _ => {
                let logs: Vec<Arc<GroupSlot>> = self.groups.iter().map(|e| e.value().clone()).collect();
                let mut all: Vec<Event> = logs.iter().flat_map(|slot| slot.events.query(filter)).collect();
                all.sort_by_key(|e| e.seq);
                all
            }
        };
        if let Some(limit) = filter.limit {
            let skip = events.len().saturating_sub(limit);
            events.drain(..skip);
        }
        events
    }

    // --- operator commands -------------------------------------------------

    async fn command(
        &self,
        key: &GroupKey,
        evaluate: Evaluate,
        op: impl FnOnce(&mut Evaluation<'_>) -> MonitorResult<()>,
    ) -> MonitorResult<GroupStatus> {
        let slot = self.slot(key)?;
        let ((), group) = self.transact(&slot, evaluate, op).await?;
        Ok(status_of(&group))
    }

    pub async fn perform_failover(&self, key: &GroupKey) -> MonitorResult<GroupStatus> {
        self.command(key, Evaluate::No, |eval| {
            commands::request_failover(eval, CommandKind::Failover)
        })
        .await
    }

    pub async fn perform_switchover(&self, key: &GroupKey) -> MonitorResult<GroupStatus> {
        self.command(key, Evaluate::No, |eval| {
            commands::request_failover(eval, CommandKind::Switchover)
        })
        .await
    }

    pub async fn cancel_pending_command(&self, key: &GroupKey) -> MonitorResult<GroupStatus> {
        self.command(key, Evaluate::No, |eval| commands::cancel_pending(eval).map(|_| ()))
            .await
    }

    pub async fn set_number_sync_standbys(&self, key: &GroupKey, value: u32) -> MonitorResult<GroupStatus> {
        self.command(key, Evaluate::Yes, |eval| commands::set_number_sync_standbys(eval, value))
            .await
    }

    pub async fn enable_maintenance(&self, id: NodeId) -> MonitorResult<GroupStatus> {
        let key = self.key_of(id)?;
        self.command(&key, Evaluate::Yes, |eval| commands::enable_maintenance(eval, id))
            .await
    }

    pub async fn disable_maintenance(&self, id: NodeId) -> MonitorResult<GroupStatus> {
        let key = self.key_of(id)?;
        self.command(&key, Evaluate::Yes, |eval| commands::disable_maintenance(eval, id))
            .await
    }

    pub async fn set_candidate_priority(&self, id: NodeId, value: u8) -> MonitorResult<GroupStatus> {
        let key = self.key_of(id)?;
        self.command(&key, Evaluate::Yes, |eval| commands::set_candidate_priority(eval, id, value))
            .await
    }

    pub async fn set_replication_quorum(&self, id: NodeId, value: bool) -> MonitorResult<GroupStatus> {
        let key = self.key_of(id)?;
        self.command(&key, Evaluate::Yes, |eval| commands::set_replication_quorum(eval, id, value))
            .await
    }

    pub async fn remove_node(&self, id: NodeId) -> MonitorResult<GroupStatus> {
        let key = self.key_of(id)?;
        let slot = self.slot(&key)?;
        let (removed, group) = self
            .transact(&slot, Evaluate::Yes, |eval| commands::remove_node(eval, id))
            .await?;
        self.node_index.remove(&id);
        self.addresses.remove(&(removed.host, removed.port));
        Ok(status_of(&group))
    }

    // --- health ------------------------------------------------------------

    /// Addresses of every registered node.
    pub async fn probe_targets(&self) -> Vec<ProbeTarget> {
        let slots: Vec<Arc<GroupSlot>> = self.groups.iter().map(|e| e.value().clone()).collect();
        let mut targets = Vec::new();
        for slot in slots {
            let group = slot.state.lock().await;
            targets.extend(group.nodes.values().map(|n| ProbeTarget {
                node_id: n.id,
                host: n.host.clone(),
                port: n.port,
            }));
        }
        targets
    }

    /// Re-evaluate every group. Nodes in `reachable` answered a probe now.
    ///
    /// Runs on every sweep tick so that timeouts fire, and pending operator
    /// commands are consumed, even when no agent reports.
    pub async fn evaluate_all(&self, reachable: &HashSet<NodeId>) {
        let slots: Vec<(GroupKey, Arc<GroupSlot>)> = self
            .groups
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (key, slot) in slots {
            let now = self.clock.now();
            let result = self
                .transact(&slot, Evaluate::Yes, |eval| {
                    let ids: Vec<NodeId> = eval
                        .group
                        .nodes
                        .keys()
                        .filter(|id| reachable.contains(id))
                        .copied()
                        .collect();
                    for id in ids {
                        if let Some(node) = eval.group.nodes.get_mut(&id) {
                            node.last_probe_ok_at = Some(now);
                        }
                    }
                    Ok(())
                })
                .await;
            if let Err(e) = result {
                tracing::error!(group = %key, error = %e, "Group evaluation failed");
            }
        }
    }

    /// Re-evaluate one group without any new input.
    pub async fn evaluate_group(&self, key: &GroupKey) -> MonitorResult<GroupStatus> {
        self.command(key, Evaluate::Yes, |_| Ok(())).await
    }
}

/// Reported transitions must be edges of the table, and write-enabling
/// states must have been assigned.
fn validate_report(node: &Node, report: &NodeReport) -> MonitorResult<()> {
    let (from, to) = (node.reported_state, report.current_state);
    if from == to {
        return Ok(());
    }
    if !is_legal_transition(from, to) {
        return Err(MonitorError::IllegalTransition {
            node: node.id,
            from,
            to,
        });
    }
    if to.is_writable() && to != node.goal_state {
        return Err(MonitorError::UnauthorizedState {
            node: node.id,
            reported: to,
            goal: node.goal_state,
        });
    }
    Ok(())
}

fn active_reply(group: &Group, id: NodeId) -> MonitorResult<NodeActiveReply> {
    let node = group.node(id).ok_or(MonitorError::NodeNotFound(id))?;
    Ok(NodeActiveReply {
        node_id: id,
        formation: node.formation.clone(),
        group: node.group,
        goal_state: node.goal_state,
        reported_state: node.reported_state,
        candidate_priority: node.candidate_priority,
        replication_quorum: node.replication_quorum,
        nodes: group.others(id).map(NodeSummary::from).collect(),
        primary: group
            .writable_node()
            .filter(|p| p.id != id)
            .map(NodeSummary::from),
        synchronous_standby_names: quorum::synchronous_standby_names(group),
    })
}

fn status_of(group: &Group) -> GroupStatus {
    GroupStatus::new(group, quorum::synchronous_standby_names(group))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::clock::ManualClock;
    use crate::monitor::store::MemoryStore;
    use crate::state::{Lsn, NodeState};

    fn monitor() -> (Monitor, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let settings = FailoverConfig {
            startup_grace_period_ms: 0,
            ..FailoverConfig::default()
        };
        let monitor = Monitor::open(Arc::new(MemoryStore::new()), clock.clone(), settings).unwrap();
        (monitor, clock)
    }

    fn request(port: u16) -> RegisterRequest {
        RegisterRequest {
            formation: "default".into(),
            group: None,
            name: String::new(),
            host: "10.0.0.1".into(),
            port,
            candidate_priority: 100,
            replication_quorum: true,
            current_state: NodeState::Init,
        }
    }

    fn report(state: NodeState) -> NodeReport {
        NodeReport {
            current_state: state,
            pg_is_running: true,
            reported_lsn: Lsn(100),
            reported_tli: 1,
            error: None,
        }
    }

    #[tokio::test]
    async fn first_node_becomes_single() {
        let (monitor, _) = monitor();
        let reply = monitor.register_node(request(5432)).await.unwrap();
        assert_eq!(reply.node_id, NodeId(1));
        assert_eq!(reply.goal_state, NodeState::Single);
    }

    #[tokio::test]
    async fn duplicate_address_is_a_conflict() {
        let (monitor, _) = monitor();
        monitor.register_node(request(5432)).await.unwrap();
        let err = monitor.register_node(request(5432)).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn second_registration_waits_for_the_first_to_join() {
        let (monitor, _) = monitor();
        let first = monitor.register_node(request(5432)).await.unwrap();
        monitor.node_active(first.node_id, report(NodeState::Single)).await.unwrap();

        let second = monitor.register_node(request(5433)).await.unwrap();
        assert_eq!(second.goal_state, NodeState::WaitStandby);
        let err = monitor.register_node(request(5434)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn impossible_jump_is_rejected_without_changes() {
        let (monitor, _) = monitor();
        let first = monitor.register_node(request(5432)).await.unwrap();
        monitor.node_active(first.node_id, report(NodeState::Single)).await.unwrap();
        let second = monitor.register_node(request(5433)).await.unwrap();

        let err = monitor
            .node_active(second.node_id, report(NodeState::Primary))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "illegal_transition");
        match err {
            MonitorError::ReportRejected { reply, .. } => {
                assert_eq!(reply.goal_state, NodeState::WaitStandby);
                assert_eq!(reply.reported_state, NodeState::Init);
            }
            other => panic!("expected the assignment with the refusal, got {other:?}"),
        }
        let node = monitor.node(second.node_id).await.unwrap();
        assert_eq!(node.summary.reported_state, NodeState::Init);
    }

    #[tokio::test]
    async fn events_limit_keeps_the_latest() {
        let (monitor, _) = monitor();
        let first = monitor.register_node(request(5432)).await.unwrap();
        monitor.node_active(first.node_id, report(NodeState::Single)).await.unwrap();

        let all = monitor.events(&EventFilter::default());
        assert!(all.len() >= 2);
        let last = monitor.events(&EventFilter {
            limit: Some(1),
            ..Default::default()
        });
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].seq, all[all.len() - 1].seq);
    }

    #[tokio::test]
    async fn sweep_fails_over_a_silent_primary() {
        let (monitor, clock) = monitor();
        let a = monitor.register_node(request(5432)).await.unwrap().node_id;
        monitor.node_active(a, report(NodeState::Single)).await.unwrap();
        let b = monitor.register_node(request(5433)).await.unwrap().node_id;
        monitor.node_active(a, report(NodeState::WaitPrimary)).await.unwrap();
        monitor.node_active(b, report(NodeState::CatchingUp)).await.unwrap();
        monitor.node_active(b, report(NodeState::Secondary)).await.unwrap();
        monitor.node_active(a, report(NodeState::Primary)).await.unwrap();

        clock.advance(chrono::Duration::seconds(15));
        monitor.node_active(b, report(NodeState::Secondary)).await.unwrap();
        clock.advance(chrono::Duration::seconds(10));
        monitor.evaluate_all(&HashSet::new()).await;

        let key = GroupKey::new("default", 0);
        let state = monitor.group_state(&key).await.unwrap();
        let goal = |id: NodeId| {
            state
                .nodes
                .iter()
                .find(|n| n.summary.node_id == id)
                .map(|n| n.summary.goal_state)
        };
        assert_eq!(goal(a), Some(NodeState::Draining));
        assert_eq!(goal(b), Some(NodeState::PreparePromotion));
    }
}
