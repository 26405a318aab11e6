//! Timeout enforcement.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// An operation did not finish within its deadline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} timed out after {}ms", .limit.as_millis())]
pub struct TimeoutError {
    pub operation: &'static str,
    pub limit: Duration,
}

/// Run `fut` with a deadline. The future is dropped when the deadline hits.
pub async fn with_timeout<F, T>(operation: &'static str, limit: Duration, fut: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TimeoutError { operation, limit })
}
