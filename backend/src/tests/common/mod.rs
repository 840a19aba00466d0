// Common test utilities and helpers

use std::sync::Arc;
use std::time::Duration;

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use uuid::Uuid;

use crate::models::{MetricSample, TrackedError};
use crate::services::analysis_engine::{AnalysisEngine, AnalysisEngineConfig};
use crate::services::cache::MemoryCache;
use crate::services::db_investigator::DbInvestigator;
use crate::services::detection_scheduler::DetectionScheduler;
use crate::services::incident_service::IncidentService;
use crate::services::investigation::{InvestigationConfig, InvestigationOrchestrator};
use crate::services::monitor_registry::MonitorRegistry;
use crate::services::testing::{
    FakeCodeSearch, FakeDb, FakeLlmBackend, FakeMetricsBackend, FakeSourceControl,
    RecordingNotifier,
};
use crate::services::workflow::IncidentWorkflow;
use crate::services::BaselineEngine;

/// Create an in-memory SQLite database with the platform schema applied.
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(3))
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    IncidentService::init_schema(&pool).await.expect("Failed to initialize schema");

    pool
}

/// Write a monitors document to a temp file and return a loaded registry.
/// The file is removed when the returned guard drops.
pub struct TempMonitorsFile {
    pub path: std::path::PathBuf,
}

impl Drop for TempMonitorsFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub async fn registry_from(doc: serde_json::Value) -> (Arc<MonitorRegistry>, TempMonitorsFile) {
    let path = std::env::temp_dir().join(format!("test-monitors-{}.json", Uuid::new_v4()));
    tokio::fs::write(&path, doc.to_string()).await.expect("write monitors file");
    let registry = Arc::new(MonitorRegistry::new(&path));
    registry.load().await.expect("load monitors");
    (registry, TempMonitorsFile { path })
}

/// Standard single-monitor document used across integration tests.
pub fn absolute_monitor_doc(check_interval_seconds: u64) -> serde_json::Value {
    serde_json::json!({ "monitors": [{
        "id": "checkout-latency",
        "name": "checkout",
        "enabled": true,
        "queries": {
            "metric": "avg:checkout.latency{env:prod}",
            "errorTracking": "service:checkout status:error"
        },
        "checkIntervalSeconds": check_interval_seconds,
        "threshold": { "type": "absolute", "warning": 50.0, "critical": 100.0 },
        "timeWindow": "5m",
        "gitlabRepositories": ["shop/checkout"],
        "enableDatabaseInvestigation": true,
        "databaseContext": { "relevantTables": ["orders"] },
        "teamsNotification": { "channelWebhookUrl": "https://example.test/hook" },
        "tags": ["service:checkout"],
        "severity": "critical"
    }]})
}

/// Everything a scheduler-level test needs to observe side effects.
pub struct SchedulerHarness {
    pub scheduler: Arc<DetectionScheduler>,
    pub incidents: Arc<IncidentService>,
    pub notifier: Arc<RecordingNotifier>,
    pub registry: Arc<MonitorRegistry>,
    _monitors_file: TempMonitorsFile,
}

/// Assemble a full detect -> investigate -> analyze -> notify stack on fake
/// adapters. `metric_value` is what every metrics query returns.
pub async fn scheduler_harness(
    doc: serde_json::Value,
    metric_value: f64,
    llm_json: Option<serde_json::Value>,
) -> SchedulerHarness {
    let (registry, monitors_file) = registry_from(doc).await;
    let pool = create_test_db().await;
    let incidents = Arc::new(IncidentService::new(pool));
    let notifier = Arc::new(RecordingNotifier::default());
    let cache = Arc::new(MemoryCache::new());

    let metrics = Arc::new(FakeMetricsBackend {
        samples: vec![
            MetricSample { timestamp: 0, value: metric_value },
            MetricSample { timestamp: 60, value: metric_value },
        ],
        tracked_errors: vec![TrackedError {
            message: "TimeoutError: upstream call exceeded deadline".to_string(),
            error_type: Some("TimeoutError".to_string()),
            stack_trace: Some("at handler (/app/src/orders.ts:42:13)".to_string()),
            timestamp: 0,
        }],
        ..Default::default()
    });

    let baselines = Arc::new(BaselineEngine::new(metrics.clone(), cache.clone(), 60));

    let orchestrator = Arc::new(InvestigationOrchestrator::new(
        metrics.clone(),
        Arc::new(FakeSourceControl::with_commits(3)),
        Arc::new(FakeCodeSearch::with_matches(1)),
        Some(Arc::new(FakeDb::with_findings()) as Arc<dyn DbInvestigator>),
        InvestigationConfig { collector_timeout_secs: 2, ..Default::default() },
    ));

    let analysis_engine = Arc::new(AnalysisEngine::new(
        Arc::new(FakeLlmBackend { response: llm_json }),
        cache.clone(),
        Some(incidents.clone()),
        AnalysisEngineConfig::default(),
    ));

    let workflow = Arc::new(IncidentWorkflow::new(
        registry.clone(),
        orchestrator,
        analysis_engine,
        notifier.clone(),
        incidents.clone(),
    ));

    let scheduler = Arc::new(DetectionScheduler::new(
        registry.clone(),
        metrics,
        baselines,
        incidents.clone(),
        workflow,
    ));

    SchedulerHarness { scheduler, incidents, notifier, registry, _monitors_file: monitors_file }
}
