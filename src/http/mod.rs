//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, tracing + timeout layers)
//!     → handlers.rs (agent RPC under /api/v1, queries, /healthz)
//!     → admin (operator API under /admin, bearer token)
//!     → Monitor
//!     → error.rs (MonitorError → status + JSON body)
//! ```

pub mod error;
pub mod handlers;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{AppState, MonitorServer};
