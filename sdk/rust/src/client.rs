use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The monitor answered with an error body.
    #[error("monitor returned {status} ({kind}): {message}")]
    Api { status: u16, kind: String, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: u32,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub reported_state: String,
    pub goal_state: String,
    pub reported_lsn: u64,
    pub reported_tli: u32,
    pub candidate_priority: u8,
    pub replication_quorum: bool,
    pub health: String,
    pub pg_is_running: bool,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCommand {
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupStatus {
    pub formation: String,
    pub group: u32,
    pub number_sync_standbys: u32,
    pub synchronous_standby_names: String,
    pub failover_in_progress: bool,
    #[serde(default)]
    pub pending: Option<PendingCommand>,
    pub nodes: Vec<NodeStatus>,
}

impl GroupStatus {
    pub fn node(&self, id: u32) -> Option<&NodeStatus> {
        self.nodes.iter().find(|n| n.node_id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub groups: Vec<GroupStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub at: String,
    pub formation: String,
    pub group: u32,
    pub node_id: u32,
    pub kind: String,
    pub old_state: String,
    pub new_state: String,
    pub reported_lsn: u64,
    pub description: String,
}

/// Filter for [`AutofailoverClient::events`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    kind: String,
}

#[derive(Deserialize)]
struct SyncNames {
    synchronous_standby_names: String,
}

pub struct AutofailoverClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl AutofailoverClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    /// Bearer token for the operator routes.
    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, SdkError> {
        let resp = builder.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }

        let text = resp.text().await?;
        let (kind, message) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (body.kind, body.error),
            Err(_) => ("unknown".to_string(), text),
        };
        Err(SdkError::Api {
            status: status.as_u16(),
            kind,
            message,
        })
    }

    fn group_path(formation: &str, group: u32, leaf: &str) -> String {
        format!("/api/v1/formations/{formation}/groups/{group}/{leaf}")
    }

    fn admin_group_path(formation: &str, group: u32, leaf: &str) -> String {
        format!("/admin/formations/{formation}/groups/{group}/{leaf}")
    }

    pub async fn healthz(&self) -> Result<serde_json::Value, SdkError> {
        self.send(self.request(Method::GET, "/healthz")).await
    }

    pub async fn nodes(&self, formation: &str, group: u32) -> Result<Vec<NodeStatus>, SdkError> {
        self.send(self.request(Method::GET, &Self::group_path(formation, group, "nodes")))
            .await
    }

    pub async fn primary(&self, formation: &str, group: u32) -> Result<Option<NodeStatus>, SdkError> {
        self.send(self.request(Method::GET, &Self::group_path(formation, group, "primary")))
            .await
    }

    pub async fn synchronous_standby_names(&self, formation: &str, group: u32) -> Result<String, SdkError> {
        let names: SyncNames = self
            .send(self.request(
                Method::GET,
                &Self::group_path(formation, group, "synchronous_standby_names"),
            ))
            .await?;
        Ok(names.synchronous_standby_names)
    }

    pub async fn group_state(&self, formation: &str, group: u32) -> Result<GroupStatus, SdkError> {
        self.send(self.request(Method::GET, &Self::group_path(formation, group, "state")))
            .await
    }

    pub async fn events(&self, query: &EventQuery) -> Result<Vec<Event>, SdkError> {
        self.send(self.request(Method::GET, "/api/v1/events").query(query)).await
    }

    pub async fn status(&self) -> Result<SystemStatus, SdkError> {
        self.send(self.request(Method::GET, "/admin/status")).await
    }

    pub async fn perform_failover(&self, formation: &str, group: u32) -> Result<GroupStatus, SdkError> {
        self.send(self.request(Method::POST, &Self::admin_group_path(formation, group, "failover")))
            .await
    }

    pub async fn perform_switchover(&self, formation: &str, group: u32) -> Result<GroupStatus, SdkError> {
        self.send(self.request(Method::POST, &Self::admin_group_path(formation, group, "switchover")))
            .await
    }

    pub async fn cancel_pending_command(&self, formation: &str, group: u32) -> Result<GroupStatus, SdkError> {
        self.send(self.request(Method::DELETE, &Self::admin_group_path(formation, group, "pending")))
            .await
    }

    pub async fn set_number_sync_standbys(
        &self,
        formation: &str,
        group: u32,
        value: u32,
    ) -> Result<GroupStatus, SdkError> {
        let path = Self::admin_group_path(formation, group, "number_sync_standbys");
        self.send(self.request(Method::PUT, &path).json(&json!({ "value": value })))
            .await
    }

    pub async fn enable_maintenance(&self, node: u32) -> Result<GroupStatus, SdkError> {
        self.send(self.request(Method::POST, &format!("/admin/nodes/{node}/maintenance")))
            .await
    }

    pub async fn disable_maintenance(&self, node: u32) -> Result<GroupStatus, SdkError> {
        self.send(self.request(Method::DELETE, &format!("/admin/nodes/{node}/maintenance")))
            .await
    }

    /// Accepts any integer so out-of-range values reach the monitor's validation.
    pub async fn set_candidate_priority(&self, node: u32, value: i64) -> Result<GroupStatus, SdkError> {
        let path = format!("/admin/nodes/{node}/candidate_priority");
        self.send(self.request(Method::PUT, &path).json(&json!({ "value": value })))
            .await
    }

    pub async fn set_replication_quorum(&self, node: u32, value: bool) -> Result<GroupStatus, SdkError> {
        let path = format!("/admin/nodes/{node}/replication_quorum");
        self.send(self.request(Method::PUT, &path).json(&json!({ "value": value })))
            .await
    }

    pub async fn remove_node(&self, node: u32) -> Result<GroupStatus, SdkError> {
        self.send(self.request(Method::DELETE, &format!("/admin/nodes/{node}")))
            .await
    }
}
