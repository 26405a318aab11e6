//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a database driver or a node probe:
//!     → timeouts.rs (every external call has a deadline)
//!
//! Agent contact with the monitor:
//!     → On failure: backoff.rs (exponential delay with jitter, then retry)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Backoff only slows down retries of the same call; the poll cadence
//!   itself stays fixed so failover latency is predictable

pub mod backoff;
pub mod timeouts;
