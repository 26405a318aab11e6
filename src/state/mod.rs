//! Node states, replication positions and the legal-transition table.
//!
//! # Data Flow
//! ```text
//! agent report (current_state)
//!     → transitions.rs (is the jump adjacent to the recorded state?)
//!     → node_state.rs (does the new state authorise writes?)
//!     → monitor accepts or rejects the report
//!
//! monitor evaluation
//!     → assigns goal states drawn from node_state.rs
//!     → agent looks up the (current, goal) pair in transitions.rs
//!        before running a local procedure
//! ```
//!
//! # Design Decisions
//! - One enum shared by the monitor and the agent, snake_case on the wire
//! - The adjacency table is data, not scattered conditionals
//! - LSNs are plain u64 with the `X/X` textual form used by PostgreSQL

pub mod lsn;
pub mod node_state;
pub mod transitions;

pub use lsn::Lsn;
pub use node_state::NodeState;
pub use transitions::is_legal_transition;
