//! Analysis models: the structured root-cause report produced by the
//! analysis engine, plus the validation applied to LLM output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::{ApiError, ApiResult};

/// Minimum length accepted for the analysis summary.
pub const MIN_SUMMARY_LEN: usize = 20;
/// Minimum length accepted for the root-cause hypothesis.
pub const MIN_HYPOTHESIS_LEN: usize = 10;

/// Confidence attached to a root-cause hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Rough remediation complexity estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatedComplexity {
    Low,
    Medium,
    High,
}

/// Root-cause hypothesis with supporting evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootCause {
    pub hypothesis: String,
    pub confidence: Confidence,
    pub evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspected_commit: Option<String>,
}

/// One prioritized recommended action. Priority 1 is highest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedAction {
    pub priority: u32,
    pub action: String,
    pub reasoning: String,
    pub estimated_impact: String,
}

/// Token accounting for one LLM interaction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn zero() -> Self {
        Self::default()
    }
}

/// Metadata about how the analysis was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetadata {
    pub analyzed_at: DateTime<Utc>,
    pub model_used: String,
    pub tokens_used: TokenUsage,
    pub duration_ms: u64,
}

/// The payload shape the LLM is asked to produce. Parsed strictly; any
/// violation routes to the fallback template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisPayload {
    pub summary: String,
    pub root_cause: RootCause,
    pub mechanism: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_findings: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_repo_findings: Option<String>,
    #[serde(default)]
    pub contributing_factors: Vec<String>,
    #[serde(default)]
    pub recommended_actions: Vec<RecommendedAction>,
    pub estimated_complexity: EstimatedComplexity,
    pub requires_human_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_rollback: Option<bool>,
}

impl AnalysisPayload {
    /// Validate field constraints beyond what serde enforces.
    pub fn validate(&self) -> ApiResult<()> {
        if self.summary.trim().len() < MIN_SUMMARY_LEN {
            return Err(ApiError::analysis(format!(
                "summary too short ({} < {} chars)",
                self.summary.trim().len(),
                MIN_SUMMARY_LEN
            )));
        }
        if self.root_cause.hypothesis.trim().len() < MIN_HYPOTHESIS_LEN {
            return Err(ApiError::analysis(format!(
                "rootCause.hypothesis too short ({} < {} chars)",
                self.root_cause.hypothesis.trim().len(),
                MIN_HYPOTHESIS_LEN
            )));
        }
        if self.root_cause.evidence.is_empty() {
            return Err(ApiError::analysis("rootCause.evidence must not be empty"));
        }
        Ok(())
    }
}

/// A complete incident analysis: validated LLM output or the deterministic
/// fallback template, plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub incident_id: Uuid,
    #[serde(flatten)]
    pub payload: AnalysisPayload,
    pub metadata: AnalysisMetadata,
}

impl Analysis {
    pub fn from_payload(incident_id: Uuid, payload: AnalysisPayload, metadata: AnalysisMetadata) -> Self {
        Self { incident_id, payload, metadata }
    }

    /// Whether this analysis came from the fallback template.
    pub fn is_fallback(&self) -> bool {
        self.metadata.model_used == "fallback-template"
    }
}
