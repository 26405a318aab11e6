pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/formations/{formation}/groups/{group}/failover", post(perform_failover))
        .route("/admin/formations/{formation}/groups/{group}/switchover", post(perform_switchover))
        .route("/admin/formations/{formation}/groups/{group}/pending", delete(cancel_pending_command))
        .route(
            "/admin/formations/{formation}/groups/{group}/number_sync_standbys",
            put(set_number_sync_standbys),
        )
        .route(
            "/admin/nodes/{id}/maintenance",
            post(enable_maintenance).delete(disable_maintenance),
        )
        .route("/admin/nodes/{id}/candidate_priority", put(set_candidate_priority))
        .route("/admin/nodes/{id}/replication_quorum", put(set_replication_quorum))
        .route("/admin/nodes/{id}", delete(remove_node))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
