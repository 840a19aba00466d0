pub mod analysis_engine;
pub mod anomaly_detector;
pub mod baseline_engine;
pub mod cache;
pub mod commit_scorer;
pub mod datadog_client;
pub mod db_investigator;
pub mod detection_scheduler;
pub mod evidence_aggregator;
pub mod gitlab_client;
pub mod incident_service;
pub mod investigation;
pub mod llm;
pub mod monitor_registry;
pub mod sourcegraph_client;
pub mod teams_notifier;
pub mod tier_selector;
pub mod workflow;

#[cfg(test)]
pub mod testing;

pub use analysis_engine::{AnalysisEngine, AnalysisEngineConfig, FALLBACK_MODEL};
pub use anomaly_detector::AnomalyDetector;
pub use baseline_engine::BaselineEngine;
pub use cache::{Cache, MemoryCache};
pub use commit_scorer::{CommitScorer, ScoringContext};
pub use datadog_client::{DatadogClient, DatadogConfig, MetricsProvider};
pub use db_investigator::{
    DbInvestigationResult, DbInvestigator, DbInvestigatorConfig, MySqlInvestigator,
};
pub use detection_scheduler::DetectionScheduler;
pub use evidence_aggregator::{AggregationInput, EvidenceAggregator};
pub use gitlab_client::{CommitDiff, GitlabClient, GitlabConfig, SourceControlProvider};
pub use incident_service::{IncidentFilter, IncidentService, LlmUsageRecord};
pub use investigation::{InvestigationConfig, InvestigationOrchestrator, InvestigationOutcome};
pub use monitor_registry::MonitorRegistry;
pub use sourcegraph_client::{
    CodeSearchProvider, SearchRequest, SearchResponse, SourcegraphClient, SourcegraphConfig,
};
pub use teams_notifier::{
    NotificationMessage, Notifier, SendResult, TeamsConfig, TeamsNotifier, build_incident_message,
};
pub use tier_selector::{TierCriteria, TierSelector, TierStrategy};
pub use workflow::{IncidentWorkflow, WorkflowResult};
