//! The HTTP surface: agents over the wire, queries and operator commands
//! through the SDK.

use std::sync::Arc;
use std::time::Duration;

use autofailover::agent::{HttpMonitorClient, MonitorClient};
use autofailover_sdk::{AutofailoverClient, EventQuery, SdkError};
use serde_json::json;

mod common;
use common::{spawn_server, Cluster, API_KEY};

fn http_client(url: &str) -> Arc<dyn MonitorClient> {
    Arc::new(HttpMonitorClient::new(url, Duration::from_secs(5)).unwrap())
}

/// Two agents registered through HTTP and settled.
async fn http_cluster() -> (Cluster, String, autofailover::Shutdown) {
    let mut cluster = Cluster::new();
    let (url, shutdown) = spawn_server(cluster.monitor.clone()).await;
    for name in ["db1", "db2"] {
        cluster.add_node_with_client(name, 100, true, http_client(&url)).await;
        cluster.settle().await;
    }
    (cluster, url, shutdown)
}

#[tokio::test]
async fn agents_converge_over_http() {
    let (cluster, url, shutdown) = http_cluster().await;
    let sdk = AutofailoverClient::new(&url);

    let health = sdk.healthz().await.unwrap();
    assert_eq!(health["status"], "ok");

    let nodes = sdk.nodes("default", 0).await.unwrap();
    assert_eq!(nodes.len(), 2);

    let primary = sdk.primary("default", 0).await.unwrap().expect("a primary");
    assert_eq!(primary.node_id, cluster.id(0).0);
    assert_eq!(primary.goal_state, "primary");

    let state = sdk.group_state("default", 0).await.unwrap();
    assert_eq!(state.node(cluster.id(1).0).unwrap().goal_state, "secondary");
    assert!(!state.failover_in_progress);

    let names = sdk.synchronous_standby_names("default", 0).await.unwrap();
    assert_eq!(names, "ANY 1 (pgautofailover_standby_2)");

    let events = sdk
        .events(&EventQuery {
            node: Some(cluster.id(1).0),
            limit: Some(3),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.node_id == cluster.id(1).0));
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));

    shutdown.trigger();
}

#[tokio::test]
async fn operator_routes_require_the_api_key() {
    let (_cluster, url, shutdown) = http_cluster().await;

    let anonymous = AutofailoverClient::new(&url);
    match anonymous.status().await {
        Err(SdkError::Api { status, .. }) => assert_eq!(status, 401),
        other => panic!("expected 401, got {other:?}"),
    }

    let operator = AutofailoverClient::new(&url).with_api_key(API_KEY);
    let status = operator.status().await.unwrap();
    assert_eq!(status.status, "operational");
    assert_eq!(status.groups.len(), 1);

    shutdown.trigger();
}

#[tokio::test]
async fn switchover_through_the_sdk() {
    let (mut cluster, url, shutdown) = http_cluster().await;
    let operator = AutofailoverClient::new(&url).with_api_key(API_KEY);

    let state = operator.perform_switchover("default", 0).await.unwrap();
    assert_eq!(state.pending.map(|p| p.kind), Some("switchover".to_string()));

    cluster.settle().await;
    let primary = operator.primary("default", 0).await.unwrap().expect("a primary");
    assert_eq!(primary.node_id, cluster.id(1).0);

    shutdown.trigger();
}

#[tokio::test]
async fn monitor_errors_map_to_http_statuses() {
    let (cluster, url, shutdown) = http_cluster().await;
    let operator = AutofailoverClient::new(&url).with_api_key(API_KEY);

    match operator.set_candidate_priority(cluster.id(1).0, 500).await {
        Err(SdkError::Api { status, .. }) => assert_eq!(status, 400),
        other => panic!("expected 400, got {other:?}"),
    }
    match operator.enable_maintenance(99).await {
        Err(SdkError::Api { status, kind, .. }) => {
            assert_eq!(status, 404);
            assert_eq!(kind, "node_not_found");
        }
        other => panic!("expected 404, got {other:?}"),
    }

    // A secondary claiming to be primary is an illegal jump.
    let http = reqwest::Client::builder().no_proxy().build().unwrap();
    let res = http
        .post(format!("{url}/api/v1/nodes/{}/active", cluster.id(1)))
        .json(&json!({
            "current_state": "primary",
            "pg_is_running": true,
            "reported_lsn": 0,
            "reported_tli": 1
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 422);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["kind"], "illegal_transition");
    // The refusal carries the node's unchanged assignment.
    assert_eq!(body["reply"]["node_id"], cluster.id(1).0);
    assert_eq!(body["reply"]["reported_state"], body["reply"]["goal_state"]);

    let res = http
        .get(format!("{url}/api/v1/formations/default/groups/7/state"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);

    shutdown.trigger();
}

#[tokio::test]
async fn third_registration_waits_while_a_standby_joins() {
    let mut cluster = Cluster::new();
    let (url, shutdown) = spawn_server(cluster.monitor.clone()).await;
    cluster.add_node_with_client("db1", 100, true, http_client(&url)).await;
    cluster.settle().await;
    cluster.add_node_with_client("db2", 100, true, http_client(&url)).await;

    // db2 has not caught up yet: a third node is told to come back later.
    let err = http_client(&url)
        .register(&autofailover::monitor::RegisterRequest {
            formation: "default".into(),
            group: None,
            name: "db3".into(),
            host: "db3".into(),
            port: 5432,
            candidate_priority: 100,
            replication_quorum: true,
            current_state: autofailover::state::NodeState::Init,
        })
        .await
        .unwrap_err();
    assert!(err.is_busy());

    shutdown.trigger();
}
