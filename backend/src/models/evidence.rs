//! Evidence models: metric samples, baselines, commits, and the aggregated
//! evidence bundle handed to the analysis engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::incident::InvestigationTier;

// ============================================================================
// Metrics backend data
// ============================================================================

/// One point in a metric series (unix seconds, value).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: i64,
    pub value: f64,
}

/// An error-tracking event from the metrics backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    pub timestamp: i64,
}

/// A deployment event from the metrics backend event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentEvent {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Per-monitor, per-hour-of-day historical expectation for a metric.
///
/// `sample_count == 0` is the no-baseline sentinel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Baseline {
    pub monitor_id: String,
    pub hour_of_day: u32,
    pub average_value: f64,
    pub standard_deviation: f64,
    pub sample_count: u32,
    pub computed_at: DateTime<Utc>,
}

impl Baseline {
    /// Zero baseline returned when no historical samples exist.
    pub fn empty(monitor_id: impl Into<String>, hour_of_day: u32) -> Self {
        Self {
            monitor_id: monitor_id.into(),
            hour_of_day,
            average_value: 0.0,
            standard_deviation: 0.0,
            sample_count: 0,
            computed_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }
}

// ============================================================================
// Source control data
// ============================================================================

/// A commit as returned by the source-control adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub repository: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
}

/// Pipeline status for a commit (best-effort enrichment).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
}

/// Merge request associated with a commit (best-effort enrichment).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequestRef {
    pub iid: u64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
}

/// Per-factor score components, each in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CommitScore {
    pub temporal: f64,
    pub risk: f64,
    pub combined: f64,
}

/// Diagnostic record of one scoring contribution. Part of the contract so
/// individual factors can be asserted on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringFactor {
    pub factor: String,
    pub value: f64,
    pub detail: String,
}

/// A commit ranked by the commit scorer, ordered by `score.combined`
/// descending with ties broken by more recent timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredCommit {
    #[serde(flatten)]
    pub commit: Commit,
    pub score: CommitScore,
    pub scoring_factors: Vec<ScoringFactor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_request: Option<MergeRequestRef>,
}

impl ScoredCommit {
    /// Whether a diff was fetched for this commit.
    pub fn has_diff(&self) -> bool {
        !self.commit.files_changed.is_empty()
    }
}

// ============================================================================
// Evidence contexts
// ============================================================================

/// Error details attached to the metrics context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
}

/// Metrics-backend evidence. Always present in a bundle; synthesized from the
/// incident when nothing else was collected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatadogContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_event: Option<DeploymentEvent>,
    #[serde(default)]
    pub metric_history: Vec<MetricSample>,
}

/// How commits were ranked for this incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoringMethod {
    Deployment,
    StackTrace,
    Temporal,
}

/// Source-control evidence. Included iff at least one scored commit exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitlabContext {
    pub commits: Vec<ScoredCommit>,
    pub scoring_method: ScoringMethod,
}

/// Severity of a single database finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    High,
    Medium,
    Low,
}

/// Overall relevance of the database evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relevance {
    High,
    Medium,
    Low,
}

/// One finding from the read-only database investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbFinding {
    pub description: String,
    pub severity: FindingSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

/// Database evidence grouped by probe kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseEvidence {
    pub schema_findings: Vec<DbFinding>,
    pub data_findings: Vec<DbFinding>,
    pub performance_findings: Vec<DbFinding>,
    pub relevance: Relevance,
}

impl DatabaseEvidence {
    pub fn finding_count(&self) -> usize {
        self.schema_findings.len() + self.data_findings.len() + self.performance_findings.len()
    }
}

/// One code-search match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMatch {
    pub repository: String,
    pub file_path: String,
    pub line_number: u32,
    pub preview: String,
}

/// Cross-repository impact evidence from the code-search adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossRepoContext {
    pub search_pattern: String,
    pub affected_repositories: Vec<String>,
    pub total_match_count: u64,
    pub critical_paths: Vec<String>,
    pub matches: Vec<SearchMatch>,
}

/// Recoverable failure from one evidence collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionError {
    pub source: String,
    pub message: String,
    pub recoverable: bool,
}

impl CollectionError {
    pub fn recoverable(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self { source: source.into(), message: message.into(), recoverable: true }
    }
}

/// Aggregated, completeness-scored view of everything the investigation
/// learned. Absent contexts are never invented.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceBundle {
    pub incident_id: Uuid,
    pub investigation_tier: InvestigationTier,
    /// Scalar in [0, 1] summarizing how much of the expected per-tier
    /// evidence was collected.
    pub completeness: f64,
    pub collected_at: DateTime<Utc>,
    pub datadog_context: DatadogContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitlab_context: Option<GitlabContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_context: Option<DatabaseEvidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_repo_context: Option<CrossRepoContext>,
    pub warnings: Vec<String>,
}

impl EvidenceBundle {
    /// Top-scored commit across the bundle, if any.
    pub fn top_commit(&self) -> Option<&ScoredCommit> {
        self.gitlab_context.as_ref().and_then(|ctx| ctx.commits.first())
    }
}

// ============================================================================
// Anomaly detection output
// ============================================================================

/// Result of evaluating a monitor threshold against a baseline.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyResult {
    pub severity: super::monitor::Severity,
    pub current_value: f64,
    pub baseline_value: f64,
    pub threshold_value: f64,
    pub deviation_percentage: f64,
}
