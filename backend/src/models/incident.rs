//! Incident model and lifecycle enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::monitor::Severity;

/// Incident lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Active,
    Resolved,
    FalsePositive,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Resolved => "resolved",
            Self::FalsePositive => "false_positive",
        }
    }
}

/// Investigation depth tag controlling which data sources are consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum InvestigationTier {
    T1,
    T2,
    T3,
}

impl InvestigationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::T1 => "T1",
            Self::T2 => "T2",
            Self::T3 => "T3",
        }
    }
}

/// A fired incident.
///
/// Invariants: `detected_at` is immutable; `resolved_at` is set iff
/// `status == Resolved`; `deviation_percentage` is derived from
/// `(metric_value - baseline_value) / baseline_value * 100`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: Uuid,
    /// Human-facing identifier, e.g. `INC-20260801-a1b2c3`.
    pub external_id: String,
    pub monitor_id: String,
    pub service_name: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub investigation_tier: InvestigationTier,
    pub metric_name: String,
    pub metric_value: f64,
    pub baseline_value: f64,
    pub threshold_value: f64,
    pub deviation_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    pub detected_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

impl Incident {
    /// Derive the deviation percentage against a baseline. A zero baseline
    /// (possible in absolute mode) yields 0 rather than a division by zero.
    pub fn deviation_percentage(metric_value: f64, baseline_value: f64) -> f64 {
        if baseline_value == 0.0 {
            0.0
        } else {
            (metric_value - baseline_value) / baseline_value * 100.0
        }
    }
}
