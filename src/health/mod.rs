//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Agent polls (monitor side, passive):
//!     node_active report → last_report_at
//!
//! Active sweep (active.rs), every interval:
//!     → probe.rs: TCP connect to each node's database address
//!     → Monitor::evaluate_all (successful probes → last_probe_ok_at)
//!     → every group re-evaluated, so timeouts fire without agent traffic
//!
//! Reachability (monitor/fsm.rs):
//!     reachable ⇔ now - max(last_report_at, last_probe_ok_at) ≤ unhealthy_timeout
//! ```
//!
//! # Design Decisions
//! - A single threshold, no hysteresis: failover latency stays predictable
//! - Crossings of the threshold are events; individual probes are not
//! - Probes run concurrently; a slow node never delays the others

pub mod active;
pub mod probe;

pub use active::HealthMonitor;
pub use probe::{Probe, TcpProbe};
