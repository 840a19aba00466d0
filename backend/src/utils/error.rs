use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// API Error with rich context and automatic error trait implementations
///
/// Design: Uses thiserror for ergonomic error handling with context.
/// Each variant maps to one of the platform error kinds; the HTTP layer
/// translates kind -> code, logic never discriminates on class identity.
#[derive(Error, Debug)]
pub enum ApiError {
    // Configuration errors - fatal at load, preserve prior state on reload
    #[error("Configuration error: {0}")]
    Configuration(String),

    // External service errors. `ExternalApi` is terminal (4xx, bad payloads);
    // `ExternalApiUnavailable` and `ExternalApiTimeout` are transient and
    // eligible for adapter retry.
    #[error("External API error ({service}): {message}")]
    ExternalApi { service: String, message: String },

    #[error("External API unavailable ({service}): {message}")]
    ExternalApiUnavailable { service: String, message: String },

    #[error("External API timeout ({service})")]
    ExternalApiTimeout { service: String },

    // Analysis errors
    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Circuit breaker open for {service}")]
    CircuitOpen { service: String },

    // Cache errors
    #[error("Cache error: {0}")]
    Cache(String),

    // Authentication errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // Validation errors
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    // System errors
    #[error("Internal error: {0}")]
    InternalError(String),

    // Database errors - auto-convert from sqlx::Error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Generic wrapper for other errors - auto-convert from anyhow::Error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// Helper to create configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Helper to create external API error
    pub fn external_api(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalApi { service: service.into(), message: message.into() }
    }

    /// Helper to create transient external API error (5xx, 429, connect)
    pub fn external_api_unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalApiUnavailable { service: service.into(), message: message.into() }
    }

    /// Helper to create external API timeout error
    pub fn external_api_timeout(service: impl Into<String>) -> Self {
        Self::ExternalApiTimeout { service: service.into() }
    }

    /// Helper to create analysis error
    pub fn analysis(message: impl Into<String>) -> Self {
        Self::Analysis(message.into())
    }

    /// Helper to create cache error
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }

    /// Helper to create unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Helper to create validation error
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    /// Helper to create not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::ResourceNotFound(message.into())
    }

    /// Helper to create internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    /// Stable error code string for API consumers
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::ExternalApi { .. }
            | Self::ExternalApiUnavailable { .. }
            | Self::ExternalApiTimeout { .. } => "EXTERNAL_API_ERROR",
            Self::Analysis(_) | Self::CircuitOpen { .. } => "ANALYSIS_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Unauthorized(_) => "AUTHENTICATION_ERROR",
            Self::ValidationError(_) | Self::ResourceNotFound(_) => "VALIDATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::InternalError(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error is worth retrying at an adapter boundary
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ExternalApiTimeout { .. } | Self::ExternalApiUnavailable { .. })
    }
}

/// Structured error response body
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ApiErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.error_code().to_string();
        let message = self.to_string();

        // Status set is closed: 400, 401, 500, 502, 503. Missing resources
        // are validation failures against the current state, hence 400.
        let status = match &self {
            Self::Configuration(_) | Self::ValidationError(_) | Self::ResourceNotFound(_) => {
                StatusCode::BAD_REQUEST
            },
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ExternalApi { .. }
            | Self::ExternalApiUnavailable { .. }
            | Self::ExternalApiTimeout { .. } => StatusCode::BAD_GATEWAY,
            Self::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let response = ApiErrorResponse { code, message, details: None };

        (status, Json(response)).into_response()
    }
}

/// Implement From for serde_json::Error
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::internal_error(format!("JSON serialization error: {}", err))
    }
}

/// Implement From for reqwest::Error, classifying timeouts separately
impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        let service =
            err.url().and_then(|u| u.host_str().map(String::from)).unwrap_or_else(|| "http".into());
        if err.is_timeout() {
            ApiError::external_api_timeout(service)
        } else if err.is_connect() {
            ApiError::external_api_unavailable(service, err.to_string())
        } else {
            ApiError::external_api(service, err.to_string())
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ApiError::configuration("bad monitor").error_code(), "CONFIGURATION_ERROR");
        assert_eq!(ApiError::external_api("gitlab", "503").error_code(), "EXTERNAL_API_ERROR");
        assert_eq!(ApiError::analysis("schema mismatch").error_code(), "ANALYSIS_ERROR");
        assert_eq!(ApiError::cache("poisoned").error_code(), "CACHE_ERROR");
        assert_eq!(ApiError::unauthorized("missing key").error_code(), "AUTHENTICATION_ERROR");
        assert_eq!(ApiError::validation_error("too short").error_code(), "VALIDATION_ERROR");
        assert_eq!(ApiError::internal_error("bug").error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ApiError::external_api_timeout("datadog").is_transient());
        assert!(ApiError::external_api_unavailable("datadog", "status 503").is_transient());
        assert!(!ApiError::external_api("datadog", "status 404").is_transient());
        assert!(!ApiError::validation_error("nope").is_transient());
    }
}
