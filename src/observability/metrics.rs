//! Metrics collection and exposition.
//!
//! # Metrics
//! - `autofailover_goal_assignments_total` (counter): goal changes by from, to
//! - `autofailover_reported_transitions_total` (counter): state changes reported by agents
//! - `autofailover_rejected_reports_total` (counter): refused reports by reason
//! - `autofailover_failovers_total` (counter): failovers started by trigger
//! - `autofailover_node_reachable` (gauge): 1=reachable, 0=unreachable
//! - `autofailover_agent_poll_duration_seconds` (histogram): one agent poll
//! - `autofailover_agent_transition_failures_total` (counter): failed procedures by goal

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

use crate::monitor::NodeId;
use crate::state::NodeState;

/// Start the Prometheus scrape endpoint. Must run inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_goal_assignment(from: NodeState, to: NodeState) {
    counter!(
        "autofailover_goal_assignments_total",
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

pub fn record_reported_transition(from: NodeState, to: NodeState) {
    counter!(
        "autofailover_reported_transitions_total",
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

pub fn record_rejected_report(reason: &'static str) {
    counter!("autofailover_rejected_reports_total", "reason" => reason).increment(1);
}

pub fn record_failover(trigger: &'static str) {
    counter!("autofailover_failovers_total", "trigger" => trigger).increment(1);
}

pub fn record_node_reachable(node: NodeId, reachable: bool) {
    gauge!("autofailover_node_reachable", "node" => node.to_string())
        .set(if reachable { 1.0 } else { 0.0 });
}

pub fn record_poll(duration: Duration) {
    histogram!("autofailover_agent_poll_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_transition_failure(goal: NodeState) {
    counter!("autofailover_agent_transition_failures_total", "goal" => goal.as_str()).increment(1);
}
