//! Append-only audit log of accepted transitions.
//!
//! Each group owns one [`EventLog`]. Appends happen only while the group
//! lock is held, so there is a single writer per log; readers load the
//! current snapshot through `arc-swap` and never take the group lock.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::monitor::model::{GroupKey, NodeId};
use crate::state::{Lsn, NodeState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Registered,
    GoalAssigned,
    StateReported,
    HealthChanged,
    SettingsChanged,
    Removed,
}

/// One immutable log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub formation: String,
    pub group: u32,
    pub node_id: NodeId,
    pub kind: EventKind,
    pub old_state: NodeState,
    pub new_state: NodeState,
    pub reported_lsn: Lsn,
    pub description: String,
}

/// An event computed during an evaluation, numbered only on commit.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub node_id: NodeId,
    pub kind: EventKind,
    pub old_state: NodeState,
    pub new_state: NodeState,
    pub reported_lsn: Lsn,
    pub description: String,
}

impl EventDraft {
    pub fn into_event(self, seq: u64, at: DateTime<Utc>, key: &GroupKey) -> Event {
        Event {
            seq,
            at,
            formation: key.formation.clone(),
            group: key.group,
            node_id: self.node_id,
            kind: self.kind,
            old_state: self.old_state,
            new_state: self.new_state,
            reported_lsn: self.reported_lsn,
            description: self.description,
        }
    }
}

/// Query filter for [`EventLog::query`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub formation: Option<String>,
    pub group: Option<u32>,
    pub node: Option<NodeId>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        self.formation.as_deref().map_or(true, |f| f == event.formation)
            && self.group.map_or(true, |g| g == event.group)
            && self.node.map_or(true, |n| n == event.node_id)
    }
}

/// Per-group event sequence.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: ArcSwap<Vec<Event>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(mut events: Vec<Event>) -> Self {
        events.sort_by_key(|e| e.seq);
        Self {
            entries: ArcSwap::from_pointee(events),
        }
    }

    /// Append committed events. Callers must hold the owning group's lock.
    pub fn append(&self, events: &[Event]) {
        if events.is_empty() {
            return;
        }
        let mut next = Vec::clone(&self.entries.load());
        next.extend_from_slice(events);
        self.entries.store(Arc::new(next));
    }

    pub fn snapshot(&self) -> Arc<Vec<Event>> {
        self.entries.load_full()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.entries.load().last().map(|e| e.seq)
    }

    /// Matching events in sequence order.
    pub fn query(&self, filter: &EventFilter) -> Vec<Event> {
        self.entries
            .load()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(seq: u64, node: u32) -> Event {
        Event {
            seq,
            at: Utc::now(),
            formation: "default".into(),
            group: 0,
            node_id: NodeId(node),
            kind: EventKind::StateReported,
            old_state: NodeState::Init,
            new_state: NodeState::Single,
            reported_lsn: Lsn::ZERO,
            description: String::new(),
        }
    }

    #[test]
    fn readers_keep_their_snapshot_across_appends() {
        let log = EventLog::new();
        log.append(&[event(1, 1)]);
        let before = log.snapshot();
        log.append(&[event(2, 2), event(3, 1)]);

        assert_eq!(before.len(), 1);
        assert_eq!(log.len(), 3);
        assert_eq!(log.last_seq(), Some(3));
    }

    #[test]
    fn query_filters_by_node() {
        let log = EventLog::from_events(vec![event(3, 1), event(1, 1), event(2, 2)]);
        let filter = EventFilter {
            node: Some(NodeId(1)),
            ..Default::default()
        };
        let seqs: Vec<u64> = log.query(&filter).iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 3]);
    }
}
