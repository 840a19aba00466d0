//! Incident handlers - admin surface over persisted incidents.

use axum::extract::{Json, Path, Query, State};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::AppState;
use crate::models::{Incident, IncidentStatus};
use crate::services::incident_service::IncidentFilter;
use crate::utils::error::ApiResult;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListQuery {
    pub status: Option<IncidentStatus>,
    pub monitor_id: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UpdateStatusRequest {
    pub status: IncidentStatus,
}

/// GET /api/incidents
#[utoipa::path(
    get,
    path = "/api/incidents",
    params(ListQuery),
    responses(
        (status = 200, description = "Incident list", body = [Incident]),
    ),
    tag = "Incidents"
)]
pub async fn list_incidents(
    State(s): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Incident>>> {
    let filter = IncidentFilter {
        status: query.status,
        monitor_id: query.monitor_id,
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
    };
    let incidents = s.incidents.list_incidents(&filter).await?;
    Ok(Json(incidents))
}

/// GET /api/incidents/:id
#[utoipa::path(
    get,
    path = "/api/incidents/{id}",
    params(("id" = Uuid, Path, description = "Incident ID")),
    responses(
        (status = 200, description = "Incident detail", body = Incident),
        (status = 400, description = "Incident not found"),
    ),
    tag = "Incidents"
)]
pub async fn get_incident(
    State(s): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(s.incidents.get_incident(id).await?))
}

/// PUT /api/incidents/:id/status
#[utoipa::path(
    put,
    path = "/api/incidents/{id}/status",
    params(("id" = Uuid, Path, description = "Incident ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Updated incident", body = Incident),
        (status = 400, description = "Incident not found"),
    ),
    tag = "Incidents"
)]
pub async fn update_incident_status(
    State(s): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<Json<Incident>> {
    let incident = s.incidents.update_status(id, req.status).await?;
    tracing::info!("incident {} moved to {}", incident.external_id, incident.status.as_str());
    Ok(Json(incident))
}
