//! Operator commands against an in-process monitor.

use autofailover::monitor::{CommandKind, EventFilter, EventKind, MonitorError};
use autofailover::state::NodeState;

mod common;
use common::Cluster;

#[tokio::test]
async fn switchover_moves_write_authority() {
    let mut cluster = Cluster::with_nodes(&[100, 100]).await;

    let status = cluster.monitor.perform_switchover(&Cluster::key()).await.unwrap();
    assert_eq!(status.pending.map(|p| p.kind), Some(CommandKind::Switchover));

    cluster.settle().await;

    assert_eq!(cluster.writable().await, vec![1]);
    assert_eq!(cluster.goal(0).await, NodeState::Secondary);
    assert_eq!(cluster.goal(1).await, NodeState::Primary);
    assert_eq!(cluster.accepting_writes(), vec![1]);
    assert!(cluster.status().await.pending.is_none());
}

#[tokio::test]
async fn pending_failover_can_be_cancelled_once() {
    let cluster = Cluster::with_nodes(&[100, 100]).await;
    let key = Cluster::key();

    cluster.monitor.perform_failover(&key).await.unwrap();
    let second = cluster.monitor.perform_switchover(&key).await;
    assert!(matches!(second, Err(MonitorError::Conflict(_))));

    let status = cluster.monitor.cancel_pending_command(&key).await.unwrap();
    assert!(status.pending.is_none());
    assert!(cluster.monitor.cancel_pending_command(&key).await.is_err());

    // Nothing happens after the cancel.
    cluster.sweep().await;
    assert_eq!(cluster.goal(0).await, NodeState::Primary);
}

#[tokio::test]
async fn failover_needs_two_nodes() {
    let mut cluster = Cluster::new();
    cluster.add_node("db1", 100, true).await;
    cluster.settle().await;

    let result = cluster.monitor.perform_failover(&Cluster::key()).await;
    assert!(matches!(result, Err(MonitorError::NotStable(_))));
}

#[tokio::test]
async fn failover_without_eligible_standby_is_refused() {
    let cluster = Cluster::with_nodes(&[100, 0]).await;
    let result = cluster.monitor.perform_failover(&Cluster::key()).await;
    assert!(matches!(result, Err(MonitorError::NoCandidate(_))));
}

#[tokio::test]
async fn standby_maintenance_round_trip() {
    let mut cluster = Cluster::with_nodes(&[100, 100, 100]).await;
    let id = cluster.id(2);

    cluster.monitor.enable_maintenance(id).await.unwrap();
    cluster.settle().await;
    assert_eq!(cluster.goal(2).await, NodeState::Maintenance);
    assert_eq!(cluster.goal(0).await, NodeState::Primary);
    assert_eq!(cluster.status().await.synchronous_standby_names, "ANY 1 (pgautofailover_standby_2)");

    cluster.monitor.disable_maintenance(id).await.unwrap();
    cluster.settle().await;
    assert_eq!(cluster.goal(2).await, NodeState::Secondary);
}

#[tokio::test]
async fn primary_maintenance_hands_over_first() {
    let mut cluster = Cluster::with_nodes(&[100, 100]).await;
    let id = cluster.id(0);

    cluster.monitor.enable_maintenance(id).await.unwrap();
    cluster.settle().await;

    assert_eq!(cluster.goal(0).await, NodeState::Maintenance);
    assert_eq!(cluster.writable().await, vec![1]);
    assert_eq!(cluster.accepting_writes(), vec![1]);

    cluster.monitor.disable_maintenance(id).await.unwrap();
    cluster.settle().await;
    assert_eq!(cluster.goal(0).await, NodeState::Secondary);
    assert_eq!(cluster.goal(1).await, NodeState::Primary);
}

#[tokio::test]
async fn single_node_keeps_a_nonzero_priority() {
    let cluster = Cluster::with_nodes(&[100]).await;
    let only = cluster.id(0);

    let zero = cluster.monitor.set_candidate_priority(only, 0).await;
    assert!(matches!(zero, Err(MonitorError::Conflict(_))));
    assert_eq!(cluster.node(0).await.summary.candidate_priority, 100);
}

#[tokio::test]
async fn candidate_priority_rules() {
    let mut cluster = Cluster::with_nodes(&[100, 100]).await;
    let standby = cluster.id(1);

    let out_of_range = cluster.monitor.set_candidate_priority(standby, 101).await;
    assert!(matches!(out_of_range, Err(MonitorError::InvalidArgument(_))));

    // Only one other node would be left with a nonzero priority.
    let lone = cluster.monitor.set_candidate_priority(standby, 0).await;
    assert!(matches!(lone, Err(MonitorError::Conflict(_))));

    let status = cluster.monitor.set_candidate_priority(standby, 50).await.unwrap();
    let node = status.nodes.iter().find(|n| n.summary.node_id == standby).unwrap();
    assert_eq!(node.summary.candidate_priority, 50);

    cluster.settle().await;
    assert_eq!(cluster.goal(0).await, NodeState::Primary);

    let changes = cluster
        .monitor
        .events(&EventFilter {
            node: Some(standby),
            ..Default::default()
        })
        .into_iter()
        .filter(|e| e.kind == EventKind::SettingsChanged)
        .count();
    assert_eq!(changes, 1);
}

#[tokio::test]
async fn number_sync_standbys_is_bounded_by_quorum_standbys() {
    let mut cluster = Cluster::with_nodes(&[100, 100, 100]).await;
    let key = Cluster::key();

    let too_many = cluster.monitor.set_number_sync_standbys(&key, 3).await;
    assert!(matches!(too_many, Err(MonitorError::InvalidArgument(_))));

    cluster.monitor.set_number_sync_standbys(&key, 2).await.unwrap();
    cluster.settle().await;

    let names = "ANY 2 (pgautofailover_standby_2, pgautofailover_standby_3)";
    assert_eq!(cluster.status().await.synchronous_standby_names, names);
    assert_eq!(cluster.nodes[0].db.synchronous_standby_names(), names);

    // Two quorum standbys are required, so none may leave the quorum.
    let leave = cluster.monitor.set_replication_quorum(cluster.id(2), false).await;
    assert!(matches!(leave, Err(MonitorError::Conflict(_))));
}

#[tokio::test]
async fn removing_the_primary_elects_a_new_one() {
    let mut cluster = Cluster::with_nodes(&[100, 100, 100]).await;

    cluster.monitor.remove_node(cluster.id(0)).await.unwrap();
    cluster.nodes[0].agent_running = false;
    cluster.settle().await;

    let status = cluster.status().await;
    assert_eq!(status.nodes.len(), 2);
    assert_eq!(cluster.writable().await, vec![1]);
    assert_eq!(cluster.goal(2).await, NodeState::Secondary);
}

#[tokio::test]
async fn removing_the_last_standby_returns_to_single() {
    let mut cluster = Cluster::with_nodes(&[100, 100]).await;

    cluster.monitor.remove_node(cluster.id(1)).await.unwrap();
    cluster.settle().await;

    assert_eq!(cluster.goal(0).await, NodeState::Single);
    let removed = cluster.monitor.node(cluster.id(1)).await;
    assert!(matches!(removed, Err(MonitorError::NodeNotFound(_))));
}
