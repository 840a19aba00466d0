use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::utils::ApiError;

/// API-key state shared with the auth middleware.
#[derive(Clone)]
pub struct AuthState {
    pub api_key: String,
}

/// API-key authentication middleware.
///
/// Compares the `X-API-Key` header against the configured key. An empty
/// configured key disables authentication (development mode); a startup
/// warning covers that case.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.api_key.is_empty() {
        return Ok(next.run(req).await);
    }

    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing X-API-Key header for {} {}", req.method(), req.uri());
            ApiError::unauthorized("Missing X-API-Key header")
        })?;

    if provided != state.api_key {
        tracing::warn!("Invalid API key for {} {}", req.method(), req.uri());
        return Err(ApiError::unauthorized("Invalid API key"));
    }

    Ok(next.run(req).await)
}
