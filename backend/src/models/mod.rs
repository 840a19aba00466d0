pub mod analysis;
pub mod evidence;
pub mod incident;
pub mod monitor;

pub use analysis::{
    Analysis, AnalysisMetadata, AnalysisPayload, Confidence, EstimatedComplexity, RecommendedAction,
    RootCause, TokenUsage,
};
pub use evidence::{
    AnomalyResult, Baseline, CollectionError, Commit, CommitScore, CrossRepoContext,
    DatabaseEvidence, DatadogContext, DbFinding, DeploymentEvent, ErrorDetails, EvidenceBundle,
    FindingSeverity, GitlabContext, MergeRequestRef, MetricSample, PipelineStatus, Relevance,
    ScoredCommit, ScoringFactor, ScoringMethod, SearchMatch, TrackedError,
};
pub use incident::{Incident, IncidentStatus, InvestigationTier};
pub use monitor::{
    DatabaseContext, MonitorConfig, MonitorQueries, MonitorSummary, MonitorsFile, Severity,
    TeamsNotification, Threshold, ThresholdType, UrlPatterns,
};
