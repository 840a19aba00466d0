//! Monitor handlers - listing and hot reload.

use axum::extract::{Json, State};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;
use crate::models::MonitorSummary;
use crate::utils::error::ApiResult;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ReloadResponse {
    pub reloaded: usize,
}

/// GET /api/monitors
#[utoipa::path(
    get,
    path = "/api/monitors",
    responses(
        (status = 200, description = "Configured monitors", body = [MonitorSummary]),
    ),
    tag = "Monitors"
)]
pub async fn list_monitors(State(s): State<Arc<AppState>>) -> ApiResult<Json<Vec<MonitorSummary>>> {
    let monitors = s.registry.list().iter().map(MonitorSummary::from).collect();
    Ok(Json(monitors))
}

/// POST /api/monitors/reload
///
/// Stops all monitor tasks, reloads the monitors file atomically, then
/// restarts. A failed reload keeps the previous monitor set running.
#[utoipa::path(
    post,
    path = "/api/monitors/reload",
    responses(
        (status = 200, description = "Reload result", body = ReloadResponse),
        (status = 400, description = "Invalid monitors document"),
    ),
    tag = "Monitors"
)]
pub async fn reload_monitors(State(s): State<Arc<AppState>>) -> ApiResult<Json<ReloadResponse>> {
    let reloaded = s.scheduler.reload().await?;
    Ok(Json(ReloadResponse { reloaded }))
}
