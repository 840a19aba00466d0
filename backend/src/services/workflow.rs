//! Incident workflow
//!
//! Glues context fetch -> investigation -> analysis -> notification into a
//! sequential pipeline with explicit state. Any stage may set a terminal
//! error, after which downstream stages skip; the final result carries
//! whatever partial artifacts exist plus the total duration.

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::models::{Analysis, EvidenceBundle, Incident};
use crate::services::analysis_engine::AnalysisEngine;
use crate::services::incident_service::IncidentService;
use crate::services::investigation::InvestigationOrchestrator;
use crate::services::monitor_registry::MonitorRegistry;
use crate::services::teams_notifier::{Notifier, build_incident_message};

/// Outcome of one incident run through the workflow.
#[derive(Debug)]
pub struct WorkflowResult {
    pub incident_id: Uuid,
    pub evidence: Option<EvidenceBundle>,
    pub analysis: Option<Analysis>,
    /// Terminal error, prefixed with the stage that set it.
    pub error: Option<String>,
    pub duration_ms: u64,
}

pub struct IncidentWorkflow {
    registry: Arc<MonitorRegistry>,
    orchestrator: Arc<InvestigationOrchestrator>,
    analysis_engine: Arc<AnalysisEngine>,
    notifier: Arc<dyn Notifier>,
    incidents: Arc<IncidentService>,
}

impl IncidentWorkflow {
    pub fn new(
        registry: Arc<MonitorRegistry>,
        orchestrator: Arc<InvestigationOrchestrator>,
        analysis_engine: Arc<AnalysisEngine>,
        notifier: Arc<dyn Notifier>,
        incidents: Arc<IncidentService>,
    ) -> Self {
        Self { registry, orchestrator, analysis_engine, notifier, incidents }
    }

    pub async fn run(&self, incident: Incident) -> WorkflowResult {
        let started = Instant::now();
        let mut result = WorkflowResult {
            incident_id: incident.id,
            evidence: None,
            analysis: None,
            error: None,
            duration_ms: 0,
        };

        // Stage 1: resolve the monitor configuration.
        let monitor = match self.registry.get(&incident.monitor_id) {
            Some(monitor) => Some(monitor),
            None => {
                result.error =
                    Some(format!("fetch_context: unknown monitor '{}'", incident.monitor_id));
                None
            },
        };

        // Stage 2: investigation. A non-recoverable orchestrator error is
        // terminal; recoverable ones are already folded into the bundle.
        if let Some(monitor) = &monitor {
            let outcome = self.orchestrator.investigate(&incident, monitor).await;

            if outcome.tier_used != incident.investigation_tier {
                if let Err(e) = self.incidents.update_tier(incident.id, outcome.tier_used).await {
                    tracing::warn!("failed to record refined tier for {}: {}", incident.external_id, e);
                }
            }

            if let Some(fatal) = outcome.errors.iter().find(|e| !e.recoverable) {
                result.error = Some(format!("investigate: {}", fatal.message));
            }
            result.evidence = Some(outcome.bundle);
        }

        // Stage 3: analysis (never fails; degraded paths yield the fallback).
        if result.error.is_none() {
            if let Some(bundle) = &result.evidence {
                result.analysis = Some(self.analysis_engine.analyze(&incident, bundle).await);
            }
        }

        // Stage 4: notification. Failure is recorded but does not discard
        // the artifacts produced upstream.
        if result.error.is_none() {
            if let (Some(analysis), Some(monitor)) = (&result.analysis, &monitor) {
                let message = build_incident_message(&incident, analysis, monitor);
                match self.notifier.send_message(message).await {
                    Ok(sent) => {
                        tracing::info!(
                            "notification delivered for {} (message id: {:?})",
                            incident.external_id,
                            sent.message_id
                        );
                    },
                    Err(e) => {
                        tracing::warn!("notification failed for {}: {}", incident.external_id, e);
                        result.error = Some(format!("notify: {}", e));
                    },
                }
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IncidentStatus, InvestigationTier, Severity};
    use crate::services::analysis_engine::AnalysisEngineConfig;
    use crate::services::cache::MemoryCache;
    use crate::services::db_investigator::DbInvestigator;
    use crate::services::investigation::InvestigationConfig;
    use crate::services::testing::{
        FakeCodeSearch, FakeDb, FakeLlmBackend, FakeMetricsBackend, FakeSourceControl,
        RecordingNotifier,
    };
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn incident_service() -> Arc<IncidentService> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        IncidentService::init_schema(&pool).await.unwrap();
        Arc::new(IncidentService::new(pool))
    }

    async fn registry_with_monitor() -> Arc<MonitorRegistry> {
        let path = std::env::temp_dir().join(format!("wf-monitors-{}.json", Uuid::new_v4()));
        let doc = serde_json::json!({ "monitors": [{
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
        }]});
        tokio::fs::write(&path, doc.to_string()).await.unwrap();
        let registry = Arc::new(MonitorRegistry::new(&path));
        registry.load().await.unwrap();
        registry
    }

    fn incident(monitor_id: &str) -> Incident {
        let now = Utc::now();
        Incident {
            id: Uuid::new_v4(),
            external_id: "INC-wf".to_string(),
            monitor_id: monitor_id.to_string(),
            service_name: "checkout".to_string(),
            severity: Severity::Critical,
            status: IncidentStatus::Active,
            investigation_tier: InvestigationTier::T3,
            metric_name: "latency".to_string(),
            metric_value: 150.0,
            baseline_value: 20.0,
            threshold_value: 100.0,
            deviation_percentage: 650.0,
            error_message: Some("TimeoutError: upstream".to_string()),
            stack_trace: Some("at handler (/app/src/orders.ts:42:13)".to_string()),
            detected_at: now,
            resolved_at: None,
            created_at: now,
            updated_at: now,
            tags: vec![],
        }
    }

    fn valid_llm_json() -> serde_json::Value {
        serde_json::json!({
            "summary": "Latency regression caused by a recent checkout change",
            "rootCause": {
                "hypothesis": "Commit sha0000 introduced a slow path",
                "confidence": "medium",
                "evidence": ["650% deviation over baseline"]
            },
            "mechanism": "The new code path bypasses the cache",
            "contributingFactors": [],
            "recommendedActions": [],
            "estimatedComplexity": "low",
            "requiresHumanReview": false
        })
    }

    async fn workflow(
        registry: Arc<MonitorRegistry>,
        incidents: Arc<IncidentService>,
        llm_json: Option<serde_json::Value>,
        notifier: Arc<RecordingNotifier>,
    ) -> IncidentWorkflow {
        let orchestrator = Arc::new(InvestigationOrchestrator::new(
            Arc::new(FakeMetricsBackend::default()),
            Arc::new(FakeSourceControl::with_commits(3)),
            Arc::new(FakeCodeSearch::with_matches(2)),
            Some(Arc::new(FakeDb::with_findings()) as Arc<dyn DbInvestigator>),
            InvestigationConfig { collector_timeout_secs: 2, ..Default::default() },
        ));
        let analysis_engine = Arc::new(AnalysisEngine::new(
            Arc::new(FakeLlmBackend { response: llm_json }),
            Arc::new(MemoryCache::new()),
            Some(incidents.clone()),
            AnalysisEngineConfig::default(),
        ));
        IncidentWorkflow::new(registry, orchestrator, analysis_engine, notifier, incidents)
    }

    #[tokio::test]
    async fn test_full_run_produces_analysis_and_notification() {
        let registry = registry_with_monitor().await;
        let incidents = incident_service().await;
        let notifier = Arc::new(RecordingNotifier::default());
        let wf = workflow(registry, incidents.clone(), Some(valid_llm_json()), notifier.clone()).await;

        let inc = incident("m1");
        incidents.create_incident(&inc).await.unwrap();
        let result = wf.run(inc).await;

        assert!(result.error.is_none());
        assert!(result.evidence.is_some());
        let analysis = result.analysis.unwrap();
        assert!(!analysis.is_fallback());
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_monitor_short_circuits() {
        let registry = registry_with_monitor().await;
        let incidents = incident_service().await;
        let notifier = Arc::new(RecordingNotifier::default());
        let wf = workflow(registry, incidents, Some(valid_llm_json()), notifier.clone()).await;

        let result = wf.run(incident("ghost")).await;

        assert!(result.error.as_deref().unwrap().starts_with("fetch_context:"));
        assert!(result.evidence.is_none());
        assert!(result.analysis.is_none());
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_llm_failure_still_notifies_with_fallback() {
        let registry = registry_with_monitor().await;
        let incidents = incident_service().await;
        let notifier = Arc::new(RecordingNotifier::default());
        let wf = workflow(registry, incidents.clone(), None, notifier.clone()).await;

        let inc = incident("m1");
        incidents.create_incident(&inc).await.unwrap();
        let result = wf.run(inc).await;

        assert!(result.error.is_none());
        let analysis = result.analysis.unwrap();
        assert!(analysis.is_fallback());
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_notification_failure_preserves_artifacts() {
        let registry = registry_with_monitor().await;
        let incidents = incident_service().await;
        let notifier = Arc::new(RecordingNotifier { fail: true, ..Default::default() });
        let wf = workflow(registry, incidents.clone(), Some(valid_llm_json()), notifier).await;

        let inc = incident("m1");
        incidents.create_incident(&inc).await.unwrap();
        let result = wf.run(inc).await;

        assert!(result.error.as_deref().unwrap().starts_with("notify:"));
        assert!(result.evidence.is_some());
        assert!(result.analysis.is_some());
    }
}
