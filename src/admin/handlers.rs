//! Operator command handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::http::error::{ApiError, ApiResult};
use crate::http::server::AppState;
use crate::monitor::{GroupKey, GroupStatus, NodeId, SettingValue};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub groups: Vec<GroupStatus>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        groups: state.monitor.groups().await,
    })
}

pub async fn perform_failover(
    State(state): State<AppState>,
    Path((formation, group)): Path<(String, u32)>,
) -> ApiResult<Json<GroupStatus>> {
    let status = state.monitor.perform_failover(&GroupKey::new(formation, group)).await?;
    Ok(Json(status))
}

pub async fn perform_switchover(
    State(state): State<AppState>,
    Path((formation, group)): Path<(String, u32)>,
) -> ApiResult<Json<GroupStatus>> {
    let status = state.monitor.perform_switchover(&GroupKey::new(formation, group)).await?;
    Ok(Json(status))
}

pub async fn cancel_pending_command(
    State(state): State<AppState>,
    Path((formation, group)): Path<(String, u32)>,
) -> ApiResult<Json<GroupStatus>> {
    let status = state
        .monitor
        .cancel_pending_command(&GroupKey::new(formation, group))
        .await?;
    Ok(Json(status))
}

pub async fn set_number_sync_standbys(
    State(state): State<AppState>,
    Path((formation, group)): Path<(String, u32)>,
    Json(body): Json<SettingValue<u32>>,
) -> ApiResult<Json<GroupStatus>> {
    let status = state
        .monitor
        .set_number_sync_standbys(&GroupKey::new(formation, group), body.value)
        .await?;
    Ok(Json(status))
}

pub async fn enable_maintenance(State(state): State<AppState>, Path(id): Path<u32>) -> ApiResult<Json<GroupStatus>> {
    let status = state.monitor.enable_maintenance(NodeId(id)).await?;
    Ok(Json(status))
}

pub async fn disable_maintenance(State(state): State<AppState>, Path(id): Path<u32>) -> ApiResult<Json<GroupStatus>> {
    let status = state.monitor.disable_maintenance(NodeId(id)).await?;
    Ok(Json(status))
}

pub async fn set_candidate_priority(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(body): Json<SettingValue<i64>>,
) -> ApiResult<Json<GroupStatus>> {
    let value = u8::try_from(body.value)
        .map_err(|_| ApiError::bad_request(format!("candidate priority {} is out of range 0..=100", body.value)))?;
    let status = state.monitor.set_candidate_priority(NodeId(id), value).await?;
    Ok(Json(status))
}

pub async fn set_replication_quorum(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Json(body): Json<SettingValue<bool>>,
) -> ApiResult<Json<GroupStatus>> {
    let status = state.monitor.set_replication_quorum(NodeId(id), body.value).await?;
    Ok(Json(status))
}

pub async fn remove_node(State(state): State<AppState>, Path(id): Path<u32>) -> ApiResult<Json<GroupStatus>> {
    let status = state.monitor.remove_node(NodeId(id)).await?;
    Ok(Json(status))
}
