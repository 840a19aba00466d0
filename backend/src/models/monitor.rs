//! Monitor configuration models.
//!
//! A monitor combines a metric query with an alerting policy and a
//! notification target. Monitors are loaded from a JSON document, validated
//! as a whole, and immutable within a load cycle.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::utils::time_window::parse_time_window_secs;

/// Top-level monitor configuration document: `{ "monitors": [ ... ] }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorsFile {
    pub monitors: Vec<MonitorConfig>,
}

/// Declared incident severity for a monitor, and the severity attached to
/// emitted incidents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Threshold evaluation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdType {
    Absolute,
    Percentage,
    Multiplier,
}

/// Alerting threshold. Invariant: `critical >= warning`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Threshold {
    #[serde(rename = "type")]
    pub threshold_type: ThresholdType,
    pub warning: f64,
    pub critical: f64,
}

/// Queries the monitor issues against the metrics backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorQueries {
    /// Primary metric query driving anomaly detection.
    pub metric: String,
    /// Optional error-tracking query used to enrich incidents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_tracking: Option<String>,
    /// Optional deployment-events query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
}

/// Scope for read-only database investigation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseContext {
    #[serde(default)]
    pub relevant_tables: Vec<String>,
    #[serde(default)]
    pub relevant_schemas: Vec<String>,
}

impl DatabaseContext {
    pub fn is_empty(&self) -> bool {
        self.relevant_tables.is_empty() && self.relevant_schemas.is_empty()
    }
}

/// URL templates used when rendering notification links.
/// Placeholders: `{id}` (incident id), `{query}` (metric query).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlPatterns {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datadog: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitlab: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident: Option<String>,
}

/// Teams notification target for a monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamsNotification {
    pub channel_webhook_url: String,
    #[serde(default)]
    pub mention_users: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_patterns: Option<UrlPatterns>,
}

/// A single monitor entry.
///
/// Validation failures on any entry fail the whole load; on reload the
/// previous snapshot stays in effect.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    #[validate(length(min = 1, message = "monitor id must not be empty"))]
    pub id: String,
    #[validate(length(min = 1, message = "monitor name must not be empty"))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    #[validate(custom(function = "validate_queries"))]
    pub queries: MonitorQueries,
    #[validate(range(min = 30, message = "checkIntervalSeconds must be >= 30"))]
    pub check_interval_seconds: u64,
    #[validate(custom(function = "validate_threshold"))]
    pub threshold: Threshold,
    #[validate(custom(function = "validate_time_window"))]
    pub time_window: String,
    #[serde(default)]
    pub gitlab_repositories: Vec<String>,
    #[serde(default)]
    pub enable_database_investigation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_context: Option<DatabaseContext>,
    pub teams_notification: TeamsNotification,
    #[serde(default)]
    pub tags: Vec<String>,
    pub severity: Severity,
}

impl MonitorConfig {
    /// Window length in seconds; callers rely on load-time validation.
    pub fn time_window_secs(&self) -> u64 {
        parse_time_window_secs(&self.time_window).unwrap_or(300)
    }

    /// Whether this monitor is scoped for database investigation.
    pub fn has_database_scope(&self) -> bool {
        self.enable_database_investigation
            && self.database_context.as_ref().is_some_and(|ctx| !ctx.is_empty())
    }
}

fn validate_queries(queries: &MonitorQueries) -> Result<(), ValidationError> {
    if queries.metric.trim().is_empty() {
        return Err(ValidationError::new("empty_metric_query"));
    }
    Ok(())
}

fn validate_threshold(threshold: &Threshold) -> Result<(), ValidationError> {
    if threshold.critical < threshold.warning {
        return Err(ValidationError::new("critical_below_warning"));
    }
    Ok(())
}

fn validate_time_window(window: &str) -> Result<(), ValidationError> {
    parse_time_window_secs(window).map_err(|_| ValidationError::new("invalid_time_window"))?;
    Ok(())
}

/// Reduced monitor view returned by the admin surface (no webhook URLs).
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub check_interval_seconds: u64,
    pub threshold: Threshold,
    pub time_window: String,
    pub severity: Severity,
    pub tags: Vec<String>,
}

impl From<&MonitorConfig> for MonitorSummary {
    fn from(m: &MonitorConfig) -> Self {
        Self {
            id: m.id.clone(),
            name: m.name.clone(),
            description: m.description.clone(),
            enabled: m.enabled,
            check_interval_seconds: m.check_interval_seconds,
            threshold: m.threshold.clone(),
            time_window: m.time_window.clone(),
            severity: m.severity,
            tags: m.tags.clone(),
        }
    }
}
