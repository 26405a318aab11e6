//! The agent's view of the monitor.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::monitor::{Monitor, MonitorError, NodeActiveReply, NodeId, NodeReport, RegisterReply, RegisterRequest};

#[derive(Debug, Error)]
pub enum ClientError {
    /// The monitor answered with an error. `kind` is the wire tag
    /// (`busy`, `node_not_found`, `illegal_transition`, ...).
    #[error("monitor refused the request ({kind}): {message}")]
    Rejected {
        kind: String,
        message: String,
        /// The node's assignment, sent back when a report is refused.
        reply: Option<Box<NodeActiveReply>>,
    },

    /// The monitor could not be reached.
    #[error("monitor unreachable: {0}")]
    Transport(String),

    #[error("unexpected monitor response: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn is_busy(&self) -> bool {
        matches!(self, ClientError::Rejected { kind, .. } if kind == "busy")
    }

    /// The monitor no longer knows this node.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Rejected { kind, .. } if kind == "node_not_found")
    }

    /// Worth retrying without changing anything.
    pub fn is_transient(&self) -> bool {
        self.is_busy() || matches!(self, ClientError::Transport(_))
    }

    /// The assignment that came back with a refused report.
    pub fn assignment(&self) -> Option<&NodeActiveReply> {
        match self {
            ClientError::Rejected { reply, .. } => reply.as_deref(),
            _ => None,
        }
    }
}

impl From<MonitorError> for ClientError {
    fn from(err: MonitorError) -> Self {
        let kind = err.kind().to_string();
        let message = err.to_string();
        let reply = match err {
            MonitorError::ReportRejected { reply, .. } => Some(reply),
            _ => None,
        };
        ClientError::Rejected { kind, message, reply }
    }
}

/// The two calls an agent makes.
#[async_trait]
pub trait MonitorClient: Send + Sync {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterReply, ClientError>;

    async fn node_active(&self, node: NodeId, report: &NodeReport) -> Result<NodeActiveReply, ClientError>;
}

/// Talks to a remote monitor over its HTTP API.
pub struct HttpMonitorClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    kind: String,
    #[serde(default)]
    reply: Option<Box<NodeActiveReply>>,
}

impl HttpMonitorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: serde::Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|e| ClientError::Decode(e.to_string()));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => Err(ClientError::Rejected {
                kind: body.kind,
                message: body.error,
                reply: body.reply,
            }),
            Err(_) => Err(ClientError::Decode(format!("status {status}: {text}"))),
        }
    }
}

#[async_trait]
impl MonitorClient for HttpMonitorClient {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterReply, ClientError> {
        self.post("/api/v1/nodes", request).await
    }

    async fn node_active(&self, node: NodeId, report: &NodeReport) -> Result<NodeActiveReply, ClientError> {
        self.post(&format!("/api/v1/nodes/{node}/active"), report).await
    }
}

/// Calls an in-process monitor directly.
pub struct LocalMonitorClient {
    monitor: Arc<Monitor>,
}

impl LocalMonitorClient {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl MonitorClient for LocalMonitorClient {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterReply, ClientError> {
        Ok(self.monitor.register_node(request.clone()).await?)
    }

    async fn node_active(&self, node: NodeId, report: &NodeReport) -> Result<NodeActiveReply, ClientError> {
        Ok(self.monitor.node_active(node, report.clone()).await?)
    }
}
