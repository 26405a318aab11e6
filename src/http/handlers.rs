//! Agent RPC and query handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::http::error::ApiResult;
use crate::http::server::AppState;
use crate::monitor::{
    Event, EventFilter, GroupKey, GroupStatus, NodeActiveReply, NodeId, NodeReport, NodeStatus, RegisterReply,
    RegisterRequest, SyncStandbyNames,
};

#[derive(Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn healthz() -> Json<Liveness> {
    Json(Liveness {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn register_node(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterReply>)> {
    let reply = state.monitor.register_node(request).await?;
    Ok((StatusCode::CREATED, Json(reply)))
}

pub async fn node_active(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(report): Json<NodeReport>,
) -> ApiResult<Json<NodeActiveReply>> {
    let reply = state.monitor.node_active(NodeId(id), report).await?;
    Ok(Json(reply))
}

pub async fn get_nodes(
    State(state): State<AppState>,
    Path((formation, group)): Path<(String, u32)>,
) -> ApiResult<Json<Vec<NodeStatus>>> {
    let nodes = state.monitor.get_nodes(&GroupKey::new(formation, group)).await?;
    Ok(Json(nodes))
}

pub async fn get_primary(
    State(state): State<AppState>,
    Path((formation, group)): Path<(String, u32)>,
) -> ApiResult<Json<Option<NodeStatus>>> {
    let primary = state.monitor.get_primary(&GroupKey::new(formation, group)).await?;
    Ok(Json(primary))
}

pub async fn synchronous_standby_names(
    State(state): State<AppState>,
    Path((formation, group)): Path<(String, u32)>,
) -> ApiResult<Json<SyncStandbyNames>> {
    let key = GroupKey::new(formation, group);
    let names = state.monitor.synchronous_standby_names(&key).await?;
    Ok(Json(SyncStandbyNames {
        formation: key.formation,
        group: key.group,
        synchronous_standby_names: names,
    }))
}

pub async fn group_state(
    State(state): State<AppState>,
    Path((formation, group)): Path<(String, u32)>,
) -> ApiResult<Json<GroupStatus>> {
    let status = state.monitor.group_state(&GroupKey::new(formation, group)).await?;
    Ok(Json(status))
}

pub async fn events(State(state): State<AppState>, Query(filter): Query<EventFilter>) -> Json<Vec<Event>> {
    Json(state.monitor.events(&filter))
}
