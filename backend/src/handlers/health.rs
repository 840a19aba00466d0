//! Liveness and readiness handlers.

use axum::extract::{Json, State};
use axum::http::StatusCode;
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub database: bool,
    pub enabled_monitors: usize,
    pub scheduler_tasks: usize,
    pub active_incidents: i64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// GET /api/health
#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Process is alive", body = HealthResponse)),
    tag = "Health"
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// GET /api/ready
///
/// Ready when the database answers and at least one enabled monitor is
/// scheduled.
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Ready to serve", body = ReadyResponse),
        (status = 503, description = "Not ready", body = ReadyResponse),
    ),
    tag = "Health"
)]
pub async fn ready(State(s): State<Arc<AppState>>) -> (StatusCode, Json<ReadyResponse>) {
    let database = sqlx::query("SELECT 1").fetch_one(&s.db).await.is_ok();
    let enabled_monitors = s.registry.list_enabled().len();
    let scheduler_tasks = s.scheduler.task_count().await;
    let active_incidents = s.incidents.get_active_incident_count().await.unwrap_or(-1);
    let (cache_hits, cache_misses) = s.cache.stats();

    let ready = database && enabled_monitors > 0;
    let response = ReadyResponse {
        status: if ready { "ready" } else { "not_ready" },
        database,
        enabled_monitors,
        scheduler_tasks,
        active_incidents,
        cache_hits,
        cache_misses,
    };

    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(response))
}
