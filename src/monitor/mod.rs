//! The monitor: single source of truth for every node's goal state.
//!
//! # Data Flow
//! ```text
//! agent report (node_active) / operator command / sweep tick
//!     → engine.rs (find group, take the group lock, copy the group)
//!     → commands.rs (validate and apply the request, if any)
//!     → fsm.rs (health refresh, group rules, until nothing changes)
//!         → quorum.rs (synchronous standby accounting)
//!         → failover.rs (failure detection, candidate selection, promotion)
//!     → single-writer check
//!     → store.rs (snapshot + events) → events.rs (publish to readers)
//! ```
//!
//! # Design Decisions
//! - One lock per group, never a global one
//! - Rules only read persisted facts, so a restarted monitor resumes where
//!   it stopped
//! - No fencing: a partitioned primary keeps running, the dual-writer
//!   window is bounded by `unhealthy_timeout + drain_timeout`

pub mod clock;
pub mod commands;
pub mod engine;
pub mod error;
pub mod events;
pub mod failover;
pub mod fsm;
pub mod model;
pub mod protocol;
pub mod quorum;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{Monitor, ProbeTarget};
pub use error::{MonitorError, MonitorResult};
pub use events::{Event, EventFilter, EventKind};
pub use model::{CommandKind, Group, GroupKey, Node, NodeHealth, NodeId};
pub use protocol::{
    GroupStatus, NodeActiveReply, NodeReport, NodeStatus, NodeSummary, RegisterReply, RegisterRequest,
    SettingValue, SyncStandbyNames,
};
pub use store::{FileStore, MemoryStore, StateStore, StoreError};
