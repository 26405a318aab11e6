//! The per-node agent (keeper).
//!
//! # Data Flow
//! ```text
//! Keeper::run
//!     → driver facts (running, LSN, timeline)
//!     → state_file.rs (persist before reporting)
//!     → client.rs node_active → goal + peers
//!     → transitions.rs procedure for (current, goal)
//!     → current = goal, persist, fast poll
//! ```
//!
//! # Design Decisions
//! - The agent never decides a role: it only executes the monitor's goal
//! - A monitor outage freezes local state instead of changing it
//! - Pairs outside the legal table are refused before touching the database

pub mod client;
pub mod keeper;
pub mod state_file;
pub mod transitions;

pub use client::{ClientError, HttpMonitorClient, LocalMonitorClient, MonitorClient};
pub use keeper::{AgentError, Keeper, StepOutcome};
pub use state_file::KeeperState;
pub use transitions::{run_transition, TransitionContext, TransitionError};
