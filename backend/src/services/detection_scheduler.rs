//! Detection scheduler
//!
//! Drives per-monitor polling: one long-lived task per enabled monitor, each
//! on its own cadence. Checks within a monitor are strictly serialized (a
//! tick that fires while a check is still running is skipped), and an
//! in-flight incident is owned by its monitor task until analysis completes.
//! Deduplication suppresses a second incident within five minutes of the
//! previous one for the same monitor.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Timelike, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::models::{AnomalyResult, Incident, IncidentStatus, MonitorConfig};
use crate::services::anomaly_detector::AnomalyDetector;
use crate::services::baseline_engine::BaselineEngine;
use crate::services::datadog_client::MetricsProvider;
use crate::services::incident_service::IncidentService;
use crate::services::monitor_registry::MonitorRegistry;
use crate::services::tier_selector::{TierCriteria, TierSelector};
use crate::services::workflow::IncidentWorkflow;
use crate::utils::ApiResult;

/// Deduplication window: a monitor with an incident in the last N minutes
/// emits nothing new.
const DEDUP_WINDOW_MINUTES: i64 = 5;
/// Lookback for the best-effort error-tracking sample.
const ERROR_LOOKBACK_SECS: i64 = 900;

struct SchedulerDeps {
    metrics: Arc<dyn MetricsProvider>,
    baselines: Arc<BaselineEngine>,
    incidents: Arc<IncidentService>,
    workflow: Arc<IncidentWorkflow>,
}

struct RunningTasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

pub struct DetectionScheduler {
    registry: Arc<MonitorRegistry>,
    deps: Arc<SchedulerDeps>,
    running: tokio::sync::Mutex<Option<RunningTasks>>,
}

impl DetectionScheduler {
    pub fn new(
        registry: Arc<MonitorRegistry>,
        metrics: Arc<dyn MetricsProvider>,
        baselines: Arc<BaselineEngine>,
        incidents: Arc<IncidentService>,
        workflow: Arc<IncidentWorkflow>,
    ) -> Self {
        Self {
            registry,
            deps: Arc::new(SchedulerDeps { metrics, baselines, incidents, workflow }),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Launch one polling task per enabled monitor. Idempotent: a second
    /// start while running is a no-op.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            tracing::warn!("detection scheduler already running");
            return;
        }

        let (shutdown_tx, _) = watch::channel(false);
        let monitors = self.registry.list_enabled();
        let mut handles = Vec::with_capacity(monitors.len());

        for monitor in monitors {
            let deps = self.deps.clone();
            let shutdown_rx = shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                monitor_loop(deps, monitor, shutdown_rx).await;
            }));
        }

        tracing::info!("detection scheduler started with {} monitor tasks", handles.len());
        *running = Some(RunningTasks { shutdown_tx, handles });
    }

    /// Signal cancellation to every monitor task and wait for all of them to
    /// observe it and exit.
    pub async fn stop(&self) {
        let Some(tasks) = self.running.lock().await.take() else {
            return;
        };

        let _ = tasks.shutdown_tx.send(true);
        for handle in tasks.handles {
            if let Err(e) = handle.await {
                tracing::warn!("monitor task ended abnormally: {}", e);
            }
        }
        tracing::info!("detection scheduler stopped");
    }

    /// Stop all tasks, reload the monitor set atomically, then restart. A
    /// failed reload keeps the previous snapshot, and the scheduler restarts
    /// with it.
    pub async fn reload(&self) -> ApiResult<usize> {
        self.stop().await;
        let result = self.registry.reload().await;
        if let Err(e) = &result {
            tracing::error!("monitor reload failed, keeping previous set: {}", e);
        }
        self.start().await;
        result
    }

    /// Number of tasks currently running, for diagnostics.
    pub async fn task_count(&self) -> usize {
        self.running.lock().await.as_ref().map(|t| t.handles.len()).unwrap_or(0)
    }
}

async fn monitor_loop(
    deps: Arc<SchedulerDeps>,
    monitor: MonitorConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(monitor.check_interval_seconds));
    // A tick that fires while the previous check is still running is skipped,
    // so checks never overlap within a monitor.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        "monitor {} polling every {}s over a {} window",
        monitor.id,
        monitor.check_interval_seconds,
        monitor.time_window
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_check(&deps, &monitor).await;
            },
            _ = shutdown_rx.changed() => {
                tracing::debug!("monitor {} task exiting", monitor.id);
                break;
            },
        }
    }
}

async fn run_check(deps: &SchedulerDeps, monitor: &MonitorConfig) {
    let now = Utc::now();
    let window_secs = monitor.time_window_secs() as i64;
    let from = (now - ChronoDuration::seconds(window_secs)).timestamp();

    let samples = match deps.metrics.query_metrics(&monitor.queries.metric, from, now.timestamp()).await
    {
        Ok(samples) => samples,
        Err(e) => {
            tracing::warn!("metric query failed for monitor {}: {}", monitor.id, e);
            return;
        },
    };
    if samples.is_empty() {
        tracing::debug!("monitor {} window produced no samples", monitor.id);
        return;
    }

    let current_value = samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64;
    let baseline = deps.baselines.get_baseline(monitor, now.hour(), now).await;

    let Some(anomaly) = AnomalyDetector::detect(monitor, current_value, &baseline) else {
        return;
    };

    tracing::info!(
        "anomaly on monitor {}: current={:.2} baseline={:.2} severity={}",
        monitor.id,
        anomaly.current_value,
        anomaly.baseline_value,
        anomaly.severity.as_str()
    );

    // Dedup: any incident for this monitor in the last five minutes
    // suppresses emission.
    match deps.incidents.get_recent_incidents(&monitor.id, DEDUP_WINDOW_MINUTES).await {
        Ok(recent) if !recent.is_empty() => {
            tracing::info!(
                "monitor {} anomaly deduplicated against incident {}",
                monitor.id,
                recent[0].external_id
            );
            return;
        },
        Ok(_) => {},
        Err(e) => {
            tracing::error!("dedup lookup failed for monitor {}: {}", monitor.id, e);
            return;
        },
    }

    // Best-effort error enrichment before the incident is emitted.
    let (error_message, stack_trace) = match &monitor.queries.error_tracking {
        Some(query) => {
            let from = now.timestamp() - ERROR_LOOKBACK_SECS;
            match deps.metrics.query_error_tracking(query, from, now.timestamp()).await {
                Ok(errors) => errors
                    .into_iter()
                    .next()
                    .map(|e| (Some(e.message), e.stack_trace))
                    .unwrap_or((None, None)),
                Err(e) => {
                    tracing::warn!("error-tracking query failed for {}: {}", monitor.id, e);
                    (None, None)
                },
            }
        },
        None => (None, None),
    };

    let incident = build_incident(monitor, &anomaly, error_message, stack_trace);

    if let Err(e) = deps.incidents.create_incident(&incident).await {
        tracing::error!("failed to persist incident for monitor {}: {}", monitor.id, e);
        return;
    }
    tracing::info!("incident {} emitted for monitor {}", incident.external_id, monitor.id);

    // The monitor task owns the incident through analysis; a slow workflow
    // simply causes intermediate ticks to be skipped.
    let result = deps.workflow.run(incident).await;
    match &result.error {
        Some(error) => {
            tracing::warn!("workflow for incident {} ended with error: {}", result.incident_id, error)
        },
        None => tracing::info!(
            "workflow for incident {} completed in {}ms",
            result.incident_id,
            result.duration_ms
        ),
    }
}

fn build_incident(
    monitor: &MonitorConfig,
    anomaly: &AnomalyResult,
    error_message: Option<String>,
    stack_trace: Option<String>,
) -> Incident {
    let now = Utc::now();
    let id = Uuid::new_v4();
    let external_id = format!("INC-{}-{}", now.format("%Y%m%d"), &id.simple().to_string()[..6]);

    let criteria = TierCriteria {
        has_stack_trace: stack_trace.as_deref().is_some_and(|s| !s.is_empty()),
        has_deployment_event: false,
        severity: anomaly.severity,
        has_git_config: !monitor.gitlab_repositories.is_empty(),
        has_db_config: monitor.has_database_scope(),
    };

    Incident {
        id,
        external_id,
        monitor_id: monitor.id.clone(),
        service_name: monitor.name.clone(),
        severity: anomaly.severity,
        status: IncidentStatus::Active,
        investigation_tier: TierSelector::select(criteria),
        metric_name: monitor.queries.metric.clone(),
        metric_value: anomaly.current_value,
        baseline_value: anomaly.baseline_value,
        threshold_value: anomaly.threshold_value,
        deviation_percentage: anomaly.deviation_percentage,
        error_message,
        stack_trace,
        detected_at: now,
        resolved_at: None,
        created_at: now,
        updated_at: now,
        tags: monitor.tags.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;

    fn monitor() -> MonitorConfig {
        serde_json::from_value(serde_json::json!({
            "id": "m1",
            "name": "checkout",
            "enabled": true,
            "queries": { "metric": "avg:latency" },
            "checkIntervalSeconds": 60,
            "threshold": { "type": "absolute", "warning": 50.0, "critical": 100.0 },
            "timeWindow": "5m",
            "gitlabRepositories": ["org/repo"],
            "teamsNotification": { "channelWebhookUrl": "https://example.test/hook" },
            "tags": ["service:checkout"],
            "severity": "high"
        }))
        .unwrap()
    }

    fn anomaly() -> AnomalyResult {
        AnomalyResult {
            severity: Severity::Critical,
            current_value: 150.0,
            baseline_value: 20.0,
            threshold_value: 100.0,
            deviation_percentage: 650.0,
        }
    }

    #[test]
    fn test_build_incident_fields() {
        let incident = build_incident(&monitor(), &anomaly(), Some("boom".into()), None);

        assert_eq!(incident.monitor_id, "m1");
        assert_eq!(incident.service_name, "checkout");
        assert_eq!(incident.severity, Severity::Critical);
        assert_eq!(incident.status, IncidentStatus::Active);
        assert_eq!(incident.metric_value, 150.0);
        assert_eq!(incident.threshold_value, 100.0);
        assert!(incident.external_id.starts_with("INC-"));
        assert_eq!(incident.tags, vec!["service:checkout".to_string()]);
        // Critical without stack trace or DB scope, git configured: T2.
        assert_eq!(incident.investigation_tier, crate::models::InvestigationTier::T2);
    }

    #[test]
    fn test_build_incident_tier_with_stack_and_db() {
        let mut m = monitor();
        m.enable_database_investigation = true;
        m.database_context =
            Some(serde_json::from_value(serde_json::json!({ "relevantTables": ["orders"] })).unwrap());

        let incident =
            build_incident(&m, &anomaly(), Some("boom".into()), Some("at x (a.ts:1:2)".into()));
        assert_eq!(incident.investigation_tier, crate::models::InvestigationTier::T3);
    }
}
