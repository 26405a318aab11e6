//! API error type mapped to HTTP status codes.
//!
//! Every error renders as a JSON body `{"error": "message", "kind": "tag"}`.
//! Agents look at `kind` to tell a retryable refusal (`busy`) from a hard one.
//! A refused agent report also carries `reply`, the node's unchanged
//! assignment.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::monitor::{MonitorError, NodeActiveReply};

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    /// Assignment returned alongside a refused report.
    pub reply: Option<Box<NodeActiveReply>>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "invalid_argument",
            message: message.into(),
            reply: None,
        }
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        if let MonitorError::ReportRejected { reason, reply } = err {
            return Self {
                reply: Some(reply),
                ..Self::from(*reason)
            };
        }
        let status = match &err {
            MonitorError::NodeNotFound(_) | MonitorError::GroupNotFound(_) => StatusCode::NOT_FOUND,
            MonitorError::IllegalTransition { .. }
            | MonitorError::UnauthorizedState { .. }
            | MonitorError::ReportRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            MonitorError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            MonitorError::Busy(_)
            | MonitorError::Conflict(_)
            | MonitorError::NotStable(_)
            | MonitorError::NoCandidate(_) => StatusCode::CONFLICT,
            MonitorError::InvariantViolation(_) | MonitorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
            reply: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.message, "kind": self.kind });
        if let Some(reply) = self.reply {
            body["reply"] = json!(reply);
        }
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
