//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! monitor (goal assignments, reports, failovers, reachability)
//! agent (poll loop, transition failures)
//!     → logging.rs (structured log events, pretty or JSON)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every goal assignment is logged with its reason, and also kept in the
//!   monitor's event log for operators
//! - Metrics are cheap (atomic increments); without an installed exporter
//!   the recording calls are no-ops

pub mod logging;
pub mod metrics;
