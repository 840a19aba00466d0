//! incident-ops backend library
//!
//! Automated incident-response platform: per-monitor anomaly detection
//! against learned baselines, tiered multi-source investigation, LLM-backed
//! root-cause analysis with a deterministic fallback, and Teams delivery.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::middleware::{AuthState, auth_middleware};
use crate::services::{DetectionScheduler, IncidentService, MemoryCache, MonitorRegistry};

/// Shared application state handed to every handler.
pub struct AppState {
    pub config: Config,
    pub db: SqlitePool,
    pub cache: Arc<MemoryCache>,
    pub registry: Arc<MonitorRegistry>,
    pub incidents: Arc<IncidentService>,
    pub scheduler: Arc<DetectionScheduler>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::health::ready,
        handlers::incident::list_incidents,
        handlers::incident::get_incident,
        handlers::incident::update_incident_status,
        handlers::monitor::list_monitors,
        handlers::monitor::reload_monitors,
    ),
    components(schemas(
        handlers::health::HealthResponse,
        handlers::health::ReadyResponse,
        handlers::incident::UpdateStatusRequest,
        handlers::monitor::ReloadResponse,
        models::Incident,
        models::incident::IncidentStatus,
        models::incident::InvestigationTier,
        models::monitor::MonitorSummary,
        models::monitor::Severity,
        models::monitor::Threshold,
        models::monitor::ThresholdType,
        utils::error::ApiErrorResponse,
    )),
    tags(
        (name = "Health", description = "Liveness and readiness"),
        (name = "Incidents", description = "Incident administration"),
        (name = "Monitors", description = "Monitor configuration"),
    )
)]
pub struct ApiDoc;

/// Build the admin router. Health endpoints are public; everything else is
/// behind the API-key middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let auth_state = AuthState { api_key: state.config.auth.api_key.clone() };

    let protected = Router::new()
        .route("/api/incidents", get(handlers::incident::list_incidents))
        .route("/api/incidents/:id", get(handlers::incident::get_incident))
        .route("/api/incidents/:id/status", put(handlers::incident::update_incident_status))
        .route("/api/monitors", get(handlers::monitor::list_monitors))
        .route("/api/monitors/reload", post(handlers::monitor::reload_monitors))
        .layer(axum::middleware::from_fn_with_state(auth_state, auth_middleware));

    Router::new()
        .route("/api/health", get(handlers::health::health))
        .route("/api/ready", get(handlers::health::ready))
        .merge(protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
