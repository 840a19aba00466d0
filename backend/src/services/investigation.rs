//! Investigation orchestrator
//!
//! Executes the selected investigation tier: collects the metrics context,
//! refines the tier on deployment evidence, then runs the git, database, and
//! cross-repo collectors in parallel. Any single collector failure is
//! recoverable and recorded; the bundle is aggregated from whatever partial
//! results survived.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Duration as ChronoDuration;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{
    CollectionError, CrossRepoContext, DatadogContext, EvidenceBundle, GitlabContext, Incident,
    InvestigationTier, MonitorConfig, ScoringMethod,
};
use crate::services::commit_scorer::{CommitScorer, ScoringContext};
use crate::services::datadog_client::MetricsProvider;
use crate::services::db_investigator::DbInvestigator;
use crate::services::evidence_aggregator::{
    AggregationInput, EvidenceAggregator, build_error_details,
};
use crate::services::gitlab_client::SourceControlProvider;
use crate::services::sourcegraph_client::{CodeSearchProvider, SearchRequest};
use crate::services::tier_selector::{TierCriteria, TierSelector, TierStrategy};
use crate::utils::{ApiError, ApiResult};

/// Commits per repository that get their diff fetched.
const DIFFS_PER_REPO: usize = 10;
/// Scored commits per repository enriched with pipeline/MR lookups.
const ENRICHED_PER_REPO: usize = 5;
/// Upper bound on code-search results.
const MAX_SEARCH_RESULTS: usize = 50;

/// Ordered patterns for deriving a code-search term from an error message.
static SEARCH_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(\w+Error):", r"at (\w+)\.", r"function (\w+)", r"class (\w+)", r"method (\w+)"]
        .iter()
        .map(|p| Regex::new(p).expect("search pattern regex"))
        .collect()
});

#[derive(Debug, Clone)]
pub struct InvestigationConfig {
    pub collector_timeout_secs: u64,
    pub commit_window_hours: i64,
    pub recent_deployment_window_hours: i64,
}

impl Default for InvestigationConfig {
    fn default() -> Self {
        Self { collector_timeout_secs: 30, commit_window_hours: 24, recent_deployment_window_hours: 24 }
    }
}

/// Result of one investigation run.
#[derive(Debug)]
pub struct InvestigationOutcome {
    pub bundle: EvidenceBundle,
    pub tier_used: InvestigationTier,
    pub duration_ms: u64,
    pub errors: Vec<CollectionError>,
}

/// Tier usage counters, exposed for diagnostics.
#[derive(Debug, Default)]
pub struct TierUsage {
    pub t1: AtomicU64,
    pub t2: AtomicU64,
    pub t3: AtomicU64,
}

impl TierUsage {
    fn record(&self, tier: InvestigationTier) {
        match tier {
            InvestigationTier::T1 => self.t1.fetch_add(1, Ordering::Relaxed),
            InvestigationTier::T2 => self.t2.fetch_add(1, Ordering::Relaxed),
            InvestigationTier::T3 => self.t3.fetch_add(1, Ordering::Relaxed),
        };
    }
}

pub struct InvestigationOrchestrator {
    metrics: Arc<dyn MetricsProvider>,
    source_control: Arc<dyn SourceControlProvider>,
    code_search: Arc<dyn CodeSearchProvider>,
    db: Option<Arc<dyn DbInvestigator>>,
    config: InvestigationConfig,
    tier_usage: TierUsage,
}

impl InvestigationOrchestrator {
    pub fn new(
        metrics: Arc<dyn MetricsProvider>,
        source_control: Arc<dyn SourceControlProvider>,
        code_search: Arc<dyn CodeSearchProvider>,
        db: Option<Arc<dyn DbInvestigator>>,
        config: InvestigationConfig,
    ) -> Self {
        Self { metrics, source_control, code_search, db, config, tier_usage: TierUsage::default() }
    }

    pub fn tier_usage(&self) -> &TierUsage {
        &self.tier_usage
    }

    /// Run the full investigation for an incident.
    pub async fn investigate(
        &self,
        incident: &Incident,
        monitor: &MonitorConfig,
    ) -> InvestigationOutcome {
        let started = Instant::now();

        // Invariant: the workflow resolves the monitor from the incident.
        if monitor.id != incident.monitor_id {
            return self.fatal_outcome(
                incident,
                started,
                format!(
                    "monitor mismatch: incident belongs to '{}' but '{}' was supplied",
                    incident.monitor_id, monitor.id
                ),
            );
        }

        let mut errors: Vec<CollectionError> = Vec::new();

        let initial_tier = TierSelector::select(TierCriteria::from_incident(incident, monitor));

        let metrics_context = self.collect_metrics_context(incident, monitor, &mut errors).await;
        let has_deployment =
            metrics_context.as_ref().is_some_and(|ctx| ctx.deployment_event.is_some());

        let tier = TierSelector::refine(initial_tier, has_deployment, monitor);
        let strategy = TierSelector::strategy(tier);

        let stack_file_path = metrics_context
            .as_ref()
            .and_then(|ctx| ctx.error_details.as_ref())
            .and_then(|d| d.file_path.clone());
        let deployment_sha = metrics_context
            .as_ref()
            .and_then(|ctx| ctx.deployment_event.as_ref())
            .and_then(|e| e.commit_sha.clone());

        let search_pattern = strategy
            .collect_cross_repo
            .then(|| self.derive_search_pattern(incident, metrics_context.as_ref()))
            .flatten();

        let collect_git = strategy.collect_git && !monitor.gitlab_repositories.is_empty();
        let collect_db = strategy.collect_db && monitor.has_database_scope();
        let collect_cross =
            search_pattern.is_some() && !monitor.gitlab_repositories.is_empty();

        let (git_result, db_result, cross_result) = tokio::join!(
            self.run_collector("git", collect_git, self.collect_git(incident, monitor, strategy, stack_file_path, deployment_sha)),
            self.run_collector("database", collect_db, self.collect_database(incident, monitor)),
            self.run_collector(
                "cross-repo",
                collect_cross,
                self.collect_cross_repo(monitor, search_pattern.clone().unwrap_or_default())
            ),
        );

        let (gitlab_context, git_error) = git_result;
        let (database_result, db_error) = db_result;
        let (cross_repo_context, cross_error) = cross_result;
        errors.extend([git_error, db_error, cross_error].into_iter().flatten());

        let bundle = EvidenceAggregator::aggregate(AggregationInput {
            incident,
            tier,
            metrics_context,
            gitlab_context,
            database_result,
            cross_repo_context: cross_repo_context.flatten(),
            errors: errors.clone(),
        });

        let duration_ms = started.elapsed().as_millis() as u64;
        self.tier_usage.record(tier);
        tracing::info!(
            tier = tier.as_str(),
            duration_ms,
            completeness = bundle.completeness,
            warnings = bundle.warnings.len(),
            "investigation finished for {}",
            incident.external_id
        );

        InvestigationOutcome { bundle, tier_used: tier, duration_ms, errors }
    }

    /// T1 bundle with an explanatory warning and zero completeness, used when
    /// a non-recoverable error precedes any collector.
    fn fatal_outcome(
        &self,
        incident: &Incident,
        started: Instant,
        message: String,
    ) -> InvestigationOutcome {
        tracing::error!("investigation aborted for {}: {}", incident.external_id, message);
        let error = CollectionError { source: "orchestrator".to_string(), message, recoverable: false };

        let mut bundle = EvidenceAggregator::aggregate(AggregationInput {
            incident,
            tier: InvestigationTier::T1,
            metrics_context: None,
            gitlab_context: None,
            database_result: None,
            cross_repo_context: None,
            errors: vec![],
        });
        bundle.completeness = 0.0;
        bundle.warnings = vec![format!("{}: {}", error.source, error.message)];

        self.tier_usage.record(InvestigationTier::T1);
        InvestigationOutcome {
            bundle,
            tier_used: InvestigationTier::T1,
            duration_ms: started.elapsed().as_millis() as u64,
            errors: vec![error],
        }
    }

    /// Run one collector under the per-call timeout; failures become
    /// recoverable collection errors rather than aborting the others.
    async fn run_collector<T, F>(
        &self,
        source: &str,
        enabled: bool,
        fut: F,
    ) -> (Option<T>, Option<CollectionError>)
    where
        F: Future<Output = ApiResult<T>>,
    {
        if !enabled {
            return (None, None);
        }

        let timeout = Duration::from_secs(self.config.collector_timeout_secs);
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(data)) => (Some(data), None),
            Ok(Err(e)) => (None, Some(CollectionError::recoverable(source, e.to_string()))),
            Err(_) => (
                None,
                Some(CollectionError::recoverable(
                    source,
                    format!("timed out after {}s", self.config.collector_timeout_secs),
                )),
            ),
        }
    }

    /// Base metrics context: incident error details plus recent metric
    /// history and deployment events. Failures here are recoverable.
    async fn collect_metrics_context(
        &self,
        incident: &Incident,
        monitor: &MonitorConfig,
        errors: &mut Vec<CollectionError>,
    ) -> Option<DatadogContext> {
        let error_details = incident
            .error_message
            .as_deref()
            .map(|msg| build_error_details(msg, incident.stack_trace.as_deref()));

        let to = incident.detected_at.timestamp();
        let history_from = (incident.detected_at
            - ChronoDuration::seconds(monitor.time_window_secs() as i64 * 4))
        .timestamp();

        let metric_history = match self
            .metrics
            .query_metrics(&monitor.queries.metric, history_from, to)
            .await
        {
            Ok(samples) => samples,
            Err(e) => {
                errors.push(CollectionError::recoverable("metrics", e.to_string()));
                Vec::new()
            },
        };

        let deployment_from = (incident.detected_at
            - ChronoDuration::hours(self.config.recent_deployment_window_hours))
        .timestamp();
        let deployment_event = self
            .metrics
            .query_deployment_events(&monitor.tags, deployment_from, to)
            .await
            .into_iter()
            .next();

        Some(DatadogContext { error_details, deployment_event, metric_history })
    }

    async fn collect_git(
        &self,
        incident: &Incident,
        monitor: &MonitorConfig,
        strategy: TierStrategy,
        stack_file_path: Option<String>,
        deployment_sha: Option<String>,
    ) -> ApiResult<GitlabContext> {
        let since = incident.detected_at - ChronoDuration::hours(self.config.commit_window_hours);
        let until = incident.detected_at;

        let scoring_ctx = ScoringContext {
            incident_time: Some(incident.detected_at),
            stack_file_path: stack_file_path.clone(),
            deployment_commit_sha: deployment_sha.clone(),
            window: Some(ChronoDuration::hours(self.config.commit_window_hours)),
        };

        let mut all_scored = Vec::new();
        let mut failed_repos = 0usize;
        let mut last_error: Option<ApiError> = None;

        for repo in &monitor.gitlab_repositories {
            let mut commits = match self
                .source_control
                .get_commits(repo, since, until, strategy.max_commits_to_analyze)
                .await
            {
                Ok(commits) => commits,
                Err(e) => {
                    tracing::warn!("commit listing failed for {}: {}", repo, e);
                    failed_repos += 1;
                    last_error = Some(e);
                    continue;
                },
            };

            if strategy.include_commit_diffs {
                for commit in commits.iter_mut().take(DIFFS_PER_REPO) {
                    match self.source_control.get_commit_diff(repo, &commit.sha).await {
                        Ok(diff) => {
                            commit.files_changed = diff.files_changed;
                            commit.additions = diff.additions;
                            commit.deletions = diff.deletions;
                        },
                        Err(e) => {
                            tracing::debug!("diff fetch failed for {}@{}: {}", repo, commit.sha, e);
                        },
                    }
                }
            }

            let mut scored = CommitScorer::score_commits(commits, &scoring_ctx);

            // Pipeline and MR enrichment is best-effort by contract.
            for commit in scored.iter_mut().take(ENRICHED_PER_REPO) {
                commit.pipeline = self
                    .source_control
                    .get_pipeline_for_commit(repo, &commit.commit.sha)
                    .await
                    .unwrap_or(None);
                commit.merge_request = self
                    .source_control
                    .get_merge_request_for_commit(repo, &commit.commit.sha)
                    .await
                    .unwrap_or(None);
            }

            all_scored.extend(scored);
        }

        if all_scored.is_empty() && failed_repos == monitor.gitlab_repositories.len() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        all_scored.sort_by(|a, b| {
            b.score
                .combined
                .partial_cmp(&a.score.combined)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.commit.timestamp.cmp(&a.commit.timestamp))
        });

        let scoring_method = if deployment_sha.is_some() {
            ScoringMethod::Deployment
        } else if stack_file_path.is_some() {
            ScoringMethod::StackTrace
        } else {
            ScoringMethod::Temporal
        };

        Ok(GitlabContext { commits: all_scored, scoring_method })
    }

    async fn collect_database(
        &self,
        incident: &Incident,
        monitor: &MonitorConfig,
    ) -> ApiResult<crate::services::db_investigator::DbInvestigationResult> {
        let Some(db) = &self.db else {
            return Err(ApiError::configuration("database investigation is not configured"));
        };
        let Some(context) = &monitor.database_context else {
            return Err(ApiError::configuration("monitor has no database context"));
        };

        db.investigate(
            &context.relevant_tables,
            &context.relevant_schemas,
            incident.error_message.as_deref(),
        )
        .await
    }

    async fn collect_cross_repo(
        &self,
        monitor: &MonitorConfig,
        pattern: String,
    ) -> ApiResult<Option<CrossRepoContext>> {
        let response = self
            .code_search
            .search(SearchRequest {
                pattern: pattern.clone(),
                repositories: monitor.gitlab_repositories.clone(),
                exclude_tests: true,
                file_patterns: Vec::new(),
                max_results: MAX_SEARCH_RESULTS,
            })
            .await?;

        if response.total_match_count == 0 && response.matches.is_empty() {
            return Ok(None);
        }

        Ok(Some(CrossRepoContext {
            search_pattern: pattern,
            affected_repositories: response.affected_repositories,
            total_match_count: response.total_match_count,
            critical_paths: response.critical_paths,
            matches: response.matches,
        }))
    }

    /// Derive a single search pattern from the error message via the ordered
    /// patterns, falling back to the first word longer than 5 characters.
    fn derive_search_pattern(
        &self,
        incident: &Incident,
        metrics_context: Option<&DatadogContext>,
    ) -> Option<String> {
        let message = metrics_context
            .and_then(|ctx| ctx.error_details.as_ref().map(|d| d.message.as_str()))
            .or(incident.error_message.as_deref())?;

        for pattern in SEARCH_PATTERNS.iter() {
            if let Some(caps) = pattern.captures(message) {
                if let Some(term) = caps.get(1) {
                    return Some(term.as_str().to_string());
                }
            }
        }

        message.split_whitespace().find(|word| word.len() > 5).map(String::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IncidentStatus, Severity};
    use crate::services::testing::{FakeCodeSearch, FakeDb, FakeMetricsBackend, FakeSourceControl};
    use chrono::Utc;
    use uuid::Uuid;

    fn monitor(value: serde_json::Value) -> MonitorConfig {
        serde_json::from_value(value).unwrap()
    }

    fn t3_monitor() -> MonitorConfig {
        monitor(serde_json::json!({
            "id": "m1",
            "name": "m1",
            "enabled": true,
            "queries": { "metric": "avg:latency" },
            "checkIntervalSeconds": 60,
            "threshold": { "type": "absolute", "warning": 50.0, "critical": 100.0 },
            "timeWindow": "5m",
            "gitlabRepositories": ["org/repo"],
            "enableDatabaseInvestigation": true,
            "databaseContext": { "relevantTables": ["orders"] },
            "teamsNotification": { "channelWebhookUrl": "https://example.test/hook" },
            "severity": "critical"
        }))
    }

    fn incident(monitor_id: &str) -> Incident {
        let now = Utc::now();
        Incident {
            id: Uuid::new_v4(),
            external_id: "INC-orch".to_string(),
            monitor_id: monitor_id.to_string(),
            service_name: "checkout".to_string(),
            severity: Severity::Critical,
            status: IncidentStatus::Active,
            investigation_tier: InvestigationTier::T1,
            metric_name: "latency".to_string(),
            metric_value: 150.0,
            baseline_value: 20.0,
            threshold_value: 100.0,
            deviation_percentage: 650.0,
            error_message: Some("TimeoutError: upstream call exceeded deadline".to_string()),
            stack_trace: Some("at handler (/app/src/orders.ts:42:13)".to_string()),
            detected_at: now,
            resolved_at: None,
            created_at: now,
            updated_at: now,
            tags: vec![],
        }
    }

    fn orchestrator(
        source_control: FakeSourceControl,
        code_search: FakeCodeSearch,
        db: Option<FakeDb>,
    ) -> InvestigationOrchestrator {
        InvestigationOrchestrator::new(
            Arc::new(FakeMetricsBackend::default()),
            Arc::new(source_control),
            Arc::new(code_search),
            db.map(|d| Arc::new(d) as Arc<dyn DbInvestigator>),
            InvestigationConfig { collector_timeout_secs: 2, ..Default::default() },
        )
    }

    #[tokio::test]
    async fn test_t3_happy_path_collects_everything() {
        let orch = orchestrator(
            FakeSourceControl::with_commits(3),
            FakeCodeSearch::with_matches(2),
            Some(FakeDb::with_findings()),
        );
        let incident = incident("m1");
        let outcome = orch.investigate(&incident, &t3_monitor()).await;

        assert_eq!(outcome.tier_used, InvestigationTier::T3);
        assert!(outcome.errors.is_empty());
        assert!(outcome.bundle.gitlab_context.is_some());
        assert!(outcome.bundle.database_context.is_some());
        assert!(outcome.bundle.cross_repo_context.is_some());
        assert!(outcome.bundle.completeness > 0.9);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_surviving_sources() {
        // Git succeeds; DB and code search fail. The bundle keeps git, drops
        // the failed contexts, and records one warning per failed source.
        let orch = orchestrator(
            FakeSourceControl::with_commits(3),
            FakeCodeSearch::failing(),
            Some(FakeDb::failing()),
        );
        let incident = incident("m1");
        let outcome = orch.investigate(&incident, &t3_monitor()).await;

        assert_eq!(outcome.tier_used, InvestigationTier::T3);
        assert!(outcome.bundle.gitlab_context.is_some());
        assert!(outcome.bundle.database_context.is_none());
        assert!(outcome.bundle.cross_repo_context.is_none());
        assert_eq!(outcome.bundle.warnings.len(), 2);
        assert!(outcome.bundle.completeness < 1.0);
        // Metrics (with errors) + git (with diffs): (0.25 + 0.35) * 1.2 = 0.72
        assert!((outcome.bundle.completeness - 0.72).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_monitor_mismatch_is_fatal() {
        let orch = orchestrator(
            FakeSourceControl::with_commits(1),
            FakeCodeSearch::with_matches(1),
            None,
        );
        let incident = incident("other-monitor");
        let outcome = orch.investigate(&incident, &t3_monitor()).await;

        assert_eq!(outcome.tier_used, InvestigationTier::T1);
        assert_eq!(outcome.bundle.completeness, 0.0);
        assert_eq!(outcome.bundle.warnings.len(), 1);
        assert!(!outcome.errors[0].recoverable);
    }

    #[tokio::test]
    async fn test_search_pattern_derivation() {
        let orch = orchestrator(
            FakeSourceControl::with_commits(0),
            FakeCodeSearch::with_matches(0),
            None,
        );
        let mut inc = incident("m1");

        inc.error_message = Some("TimeoutError: deadline exceeded".to_string());
        assert_eq!(orch.derive_search_pattern(&inc, None).as_deref(), Some("TimeoutError"));

        inc.error_message = Some("panic at OrderService.process".to_string());
        assert_eq!(orch.derive_search_pattern(&inc, None).as_deref(), Some("OrderService"));

        inc.error_message = Some("function checkoutTotals crashed".to_string());
        assert_eq!(orch.derive_search_pattern(&inc, None).as_deref(), Some("checkoutTotals"));

        inc.error_message = Some("short words then somethinglong".to_string());
        assert_eq!(orch.derive_search_pattern(&inc, None).as_deref(), Some("somethinglong"));

        inc.error_message = None;
        assert!(orch.derive_search_pattern(&inc, None).is_none());
    }
}
