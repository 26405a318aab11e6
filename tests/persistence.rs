//! Monitor state survives a restart when backed by a state directory.

use std::sync::Arc;

use autofailover::monitor::{EventFilter, FileStore, Monitor, SystemClock};
use autofailover::state::NodeState;

mod common;
use common::{test_settings, Cluster};

#[tokio::test]
async fn restart_restores_groups_ids_and_events() {
    let dir = tempfile::tempdir().unwrap();

    let (before, events_before, ids) = {
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let mut cluster = Cluster::with_store(store, test_settings());
        for name in ["db1", "db2"] {
            cluster.add_node(name, 100, true).await;
            cluster.settle().await;
        }
        let events = cluster.monitor.events(&EventFilter::default());
        (cluster.status().await, events, (cluster.id(0), cluster.id(1)))
    };

    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let monitor = Monitor::open(store, Arc::new(SystemClock), test_settings()).unwrap();

    let after = monitor.group_state(&Cluster::key()).await.unwrap();
    assert_eq!(after.nodes.len(), 2);
    assert_eq!(after.number_sync_standbys, before.number_sync_standbys);
    for (old, new) in before.nodes.iter().zip(after.nodes.iter()) {
        assert_eq!(old.summary.node_id, new.summary.node_id);
        assert_eq!(old.summary.goal_state, new.summary.goal_state);
        assert_eq!(old.summary.reported_state, new.summary.reported_state);
    }
    assert_eq!(monitor.node(ids.0).await.unwrap().summary.goal_state, NodeState::Primary);

    let events_after = monitor.events(&EventFilter::default());
    assert_eq!(events_after, events_before);

    // New registrations continue the id sequence.
    let reply = monitor
        .register_node(autofailover::monitor::RegisterRequest {
            formation: "default".into(),
            group: Some(1),
            name: "db9".into(),
            host: "db9".into(),
            port: 5432,
            candidate_priority: 100,
            replication_quorum: true,
            current_state: NodeState::Init,
        })
        .await
        .unwrap();
    assert!(reply.node_id > ids.1);
    assert_eq!(reply.goal_state, NodeState::Single);

    let newest = monitor.events(&EventFilter::default());
    assert!(newest.last().unwrap().seq > events_before.last().unwrap().seq);
}

#[tokio::test]
async fn restarted_monitor_does_not_fail_over_during_grace() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let mut cluster = Cluster::with_store(store, test_settings());
        for name in ["db1", "db2"] {
            cluster.add_node(name, 100, true).await;
            cluster.settle().await;
        }
    }

    // Contact times from before the restart are stale, the grace period covers them.
    let settings = autofailover::config::FailoverConfig {
        startup_grace_period_ms: 60_000,
        ..test_settings()
    };
    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let monitor = Monitor::open(store, Arc::new(SystemClock), settings).unwrap();

    let status = monitor.evaluate_group(&Cluster::key()).await.unwrap();
    assert!(!status.failover_in_progress);
    assert!(status
        .nodes
        .iter()
        .any(|n| n.summary.goal_state == NodeState::Primary));
}
