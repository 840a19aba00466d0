//! Analysis engine
//!
//! Builds the structured prompt, invokes the LLM behind a circuit breaker,
//! validates the output against the analysis schema, and on any failure
//! emits a deterministic template fallback. Responses are cached by prompt
//! hash; cache hits bypass both the breaker and the failure counters. Token
//! usage is persisted best-effort.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::models::{
    Analysis, AnalysisMetadata, AnalysisPayload, Confidence, EstimatedComplexity, EvidenceBundle,
    Incident, RecommendedAction, RootCause, TokenUsage,
};
use crate::services::cache::Cache;
use crate::services::incident_service::{IncidentService, LlmUsageRecord};
use crate::services::llm::{BreakerConfig, CircuitBreaker, LlmProvider, build_analysis_prompt};

/// Model name reported by the fallback template.
pub const FALLBACK_MODEL: &str = "fallback-template";

#[derive(Debug, Clone)]
pub struct AnalysisEngineConfig {
    /// TTL for cached LLM responses (default 1h).
    pub response_ttl_secs: u64,
    pub cost_per_1k_input: f64,
    pub cost_per_1k_output: f64,
    pub breaker: BreakerConfig,
}

impl Default for AnalysisEngineConfig {
    fn default() -> Self {
        Self {
            response_ttl_secs: 3600,
            cost_per_1k_input: 0.003,
            cost_per_1k_output: 0.015,
            breaker: BreakerConfig::default(),
        }
    }
}

pub struct AnalysisEngine {
    llm: Arc<dyn LlmProvider>,
    cache: Arc<dyn Cache>,
    breaker: CircuitBreaker,
    usage_store: Option<Arc<IncidentService>>,
    config: AnalysisEngineConfig,
}

impl AnalysisEngine {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        cache: Arc<dyn Cache>,
        usage_store: Option<Arc<IncidentService>>,
        config: AnalysisEngineConfig,
    ) -> Self {
        let breaker = CircuitBreaker::new("llm", config.breaker);
        Self { llm, cache, breaker, usage_store, config }
    }

    /// Breaker state, exposed for readiness diagnostics.
    pub fn breaker_state(&self) -> crate::services::llm::BreakerState {
        self.breaker.state()
    }

    fn cache_key(prompt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        format!("llm:{}", hex::encode(hasher.finalize()))
    }

    /// Analyze an incident. Never fails: every error path produces the
    /// fallback template instead.
    pub async fn analyze(&self, incident: &Incident, bundle: &EvidenceBundle) -> Analysis {
        let started = Instant::now();
        let prompt = build_analysis_prompt(incident, bundle);
        let key = Self::cache_key(&prompt);

        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_str::<Analysis>(&cached) {
                Ok(analysis) => {
                    tracing::debug!("analysis cache hit for incident {}", incident.external_id);
                    return analysis;
                },
                Err(e) => tracing::warn!("dropping unparseable cached analysis: {}", e),
            }
        }

        if let Err(e) = self.breaker.try_acquire() {
            tracing::warn!("analysis for {} fell back: {}", incident.external_id, e);
            return self.fallback(incident, bundle, started);
        }

        let response = match self.llm.generate_analysis(&prompt).await {
            Ok(response) => {
                self.breaker.record_success();
                response
            },
            Err(e) => {
                self.breaker.record_failure();
                tracing::warn!("LLM call failed for {}: {}", incident.external_id, e);
                return self.fallback(incident, bundle, started);
            },
        };

        let payload = match serde_json::from_value::<AnalysisPayload>(response.content.clone())
            .map_err(|e| e.to_string())
            .and_then(|p| p.validate().map(|_| p).map_err(|e| e.to_string()))
        {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    "LLM response for {} failed schema validation: {}",
                    incident.external_id,
                    e
                );
                return self.fallback(incident, bundle, started);
            },
        };

        let analysis = Analysis::from_payload(
            incident.id,
            payload,
            AnalysisMetadata {
                analyzed_at: Utc::now(),
                model_used: response.model_used.clone(),
                tokens_used: response.token_usage,
                duration_ms: started.elapsed().as_millis() as u64,
            },
        );

        match serde_json::to_string(&analysis) {
            Ok(serialized) => {
                self.cache.setex(&key, self.config.response_ttl_secs, &serialized).await
            },
            Err(e) => tracing::warn!("failed to serialize analysis for cache: {}", e),
        }

        self.record_usage(incident, &response.model_used, response.token_usage, response.duration_ms)
            .await;

        analysis
    }

    /// Persist token usage; failures are logged, never propagated.
    async fn record_usage(&self, incident: &Incident, model: &str, tokens: TokenUsage, duration_ms: u64) {
        let Some(store) = &self.usage_store else {
            return;
        };
        let cost_usd = tokens.input as f64 / 1000.0 * self.config.cost_per_1k_input
            + tokens.output as f64 / 1000.0 * self.config.cost_per_1k_output;

        let record = LlmUsageRecord {
            incident_id: incident.id,
            model: model.to_string(),
            input_tokens: tokens.input as i64,
            output_tokens: tokens.output as i64,
            total_tokens: tokens.total as i64,
            cost_usd,
            duration_ms: duration_ms as i64,
        };

        if let Err(e) = store.store_llm_usage(&record).await {
            tracing::warn!("failed to persist LLM usage for {}: {}", incident.external_id, e);
        }
    }

    /// Deterministic template analysis used whenever the LLM path fails.
    fn fallback(&self, incident: &Incident, bundle: &EvidenceBundle, started: Instant) -> Analysis {
        let top_commit = bundle.top_commit();

        let mut evidence = vec![format!(
            "Metric {} deviated {:.1}% from its baseline ({:.2} vs {:.2})",
            incident.metric_name,
            incident.deviation_percentage,
            incident.metric_value,
            incident.baseline_value
        )];
        if let Some(details) = &bundle.datadog_context.error_details {
            evidence.push(format!("Error observed: {}", details.message));
        }
        if let Some(commit) = top_commit {
            evidence.push(format!(
                "Highest-scored recent commit {} in {} (score {:.2})",
                commit.commit.sha, commit.commit.repository, commit.score.combined
            ));
        }

        let hypothesis = match top_commit {
            Some(commit) => format!(
                "Recent change {} in {} is the leading candidate for the {} anomaly",
                commit.commit.sha, commit.commit.repository, incident.metric_name
            ),
            None => format!(
                "Metric {} exceeded its threshold; no correlated change was identified automatically",
                incident.metric_name
            ),
        };

        let mut actions = vec![RecommendedAction {
            priority: 1,
            action: format!("Review service {} dashboards and recent logs", incident.service_name),
            reasoning: "Automated analysis was unavailable; manual triage is required".to_string(),
            estimated_impact: "Confirms or rules out the detected anomaly".to_string(),
        }];
        if let Some(commit) = top_commit {
            actions.push(RecommendedAction {
                priority: 2,
                action: format!("Inspect commit {} for rollback", commit.commit.sha),
                reasoning: "Top-scored commit in the incident window".to_string(),
                estimated_impact: "Potential direct remediation".to_string(),
            });
        }

        let payload = AnalysisPayload {
            summary: format!(
                "Automated fallback analysis for {}: {} deviated {:.1}% from baseline and the \
                 configured threshold was exceeded.",
                incident.service_name, incident.metric_name, incident.deviation_percentage
            ),
            root_cause: RootCause {
                hypothesis,
                confidence: Confidence::Low,
                evidence,
                suspected_commit: top_commit.map(|c| c.commit.sha.clone()),
            },
            mechanism: "Insufficient automated evidence to establish the propagation path; see \
                        collected contexts for manual correlation."
                .to_string(),
            database_findings: None,
            cross_repo_findings: None,
            contributing_factors: bundle.warnings.clone(),
            recommended_actions: actions,
            estimated_complexity: EstimatedComplexity::Medium,
            requires_human_review: true,
            requires_rollback: None,
        };

        Analysis::from_payload(
            incident.id,
            payload,
            AnalysisMetadata {
                analyzed_at: Utc::now(),
                model_used: FALLBACK_MODEL.to_string(),
                tokens_used: TokenUsage::zero(),
                duration_ms: started.elapsed().as_millis() as u64,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Commit, CommitScore, DatadogContext, GitlabContext, IncidentStatus, InvestigationTier,
        ScoredCommit, ScoringMethod, Severity,
    };
    use crate::services::cache::MemoryCache;
    use crate::services::llm::LlmResponse;
    use crate::utils::{ApiError, ApiResult};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct FakeLlm {
        responses: Mutex<Vec<ApiResult<serde_json::Value>>>,
        calls: AtomicU32,
    }

    impl FakeLlm {
        fn with(responses: Vec<ApiResult<serde_json::Value>>) -> Self {
            Self { responses: Mutex::new(responses), calls: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl LlmProvider for FakeLlm {
        async fn generate_analysis(&self, prompt: &str) -> ApiResult<LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            let next = if responses.is_empty() {
                Err(ApiError::external_api_timeout("llm"))
            } else {
                responses.remove(0)
            };
            next.map(|content| LlmResponse {
                content,
                token_usage: TokenUsage {
                    input: crate::services::llm::estimate_tokens(prompt),
                    output: 10,
                    total: crate::services::llm::estimate_tokens(prompt) + 10,
                },
                duration_ms: 5,
                model_used: "fake-model".to_string(),
            })
        }
    }

    fn incident() -> Incident {
        let now = Utc::now();
        Incident {
            id: Uuid::new_v4(),
            external_id: "INC-1".to_string(),
            monitor_id: "m1".to_string(),
            service_name: "checkout".to_string(),
            severity: Severity::Critical,
            status: IncidentStatus::Active,
            investigation_tier: InvestigationTier::T2,
            metric_name: "latency".to_string(),
            metric_value: 150.0,
            baseline_value: 20.0,
            threshold_value: 100.0,
            deviation_percentage: 650.0,
            error_message: None,
            stack_trace: None,
            detected_at: now,
            resolved_at: None,
            created_at: now,
            updated_at: now,
            tags: vec![],
        }
    }

    fn bundle_with_commit(incident_id: Uuid) -> EvidenceBundle {
        EvidenceBundle {
            incident_id,
            investigation_tier: InvestigationTier::T2,
            completeness: 0.6,
            collected_at: Utc::now(),
            datadog_context: DatadogContext::default(),
            gitlab_context: Some(GitlabContext {
                commits: vec![ScoredCommit {
                    commit: Commit {
                        sha: "abc123".to_string(),
                        message: "hotfix".to_string(),
                        author: "dev".to_string(),
                        timestamp: Utc::now(),
                        repository: "org/repo".to_string(),
                        files_changed: vec![],
                        additions: 1,
                        deletions: 0,
                    },
                    score: CommitScore { temporal: 0.9, risk: 0.5, combined: 0.66 },
                    scoring_factors: vec![],
                    pipeline: None,
                    merge_request: None,
                }],
                scoring_method: ScoringMethod::Temporal,
            }),
            database_context: None,
            cross_repo_context: None,
            warnings: vec![],
        }
    }

    fn valid_llm_json() -> serde_json::Value {
        serde_json::json!({
            "summary": "Latency regression caused by a recent checkout change",
            "rootCause": {
                "hypothesis": "Commit abc123 introduced a slow path",
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

    fn engine(llm: FakeLlm) -> AnalysisEngine {
        AnalysisEngine::new(
            Arc::new(llm),
            Arc::new(MemoryCache::new()),
            None,
            AnalysisEngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_valid_response_passes_through() {
        let engine = engine(FakeLlm::with(vec![Ok(valid_llm_json())]));
        let incident = incident();
        let analysis = engine.analyze(&incident, &bundle_with_commit(incident.id)).await;

        assert!(!analysis.is_fallback());
        assert_eq!(analysis.metadata.model_used, "fake-model");
        assert!(analysis.metadata.tokens_used.total > 0);
    }

    #[tokio::test]
    async fn test_invalid_schema_falls_back_with_top_commit() {
        // Summary below minimum length: schema-invalid.
        let engine = engine(FakeLlm::with(vec![Ok(serde_json::json!({ "summary": "x" }))]));
        let incident = incident();
        let analysis = engine.analyze(&incident, &bundle_with_commit(incident.id)).await;

        assert!(analysis.is_fallback());
        assert_eq!(analysis.metadata.model_used, FALLBACK_MODEL);
        assert_eq!(analysis.payload.root_cause.confidence, Confidence::Low);
        assert!(analysis.payload.requires_human_review);
        assert_eq!(analysis.metadata.tokens_used.total, 0);
        assert_eq!(analysis.payload.root_cause.suspected_commit.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_cache_returns_identical_analysis_without_second_call() {
        let llm = FakeLlm::with(vec![Ok(valid_llm_json())]);
        let engine = AnalysisEngine::new(
            Arc::new(llm),
            Arc::new(MemoryCache::new()),
            None,
            AnalysisEngineConfig::default(),
        );
        let incident = incident();
        let bundle = bundle_with_commit(incident.id);

        let first = engine.analyze(&incident, &bundle).await;
        let second = engine.analyze(&incident, &bundle).await;

        assert!(!second.is_fallback());
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_breaker_opens_after_consecutive_failures() {
        let failures: Vec<ApiResult<serde_json::Value>> =
            (0..10).map(|_| Err(ApiError::external_api_timeout("llm"))).collect();
        let llm = FakeLlm::with(failures);
        let engine = AnalysisEngine::new(
            Arc::new(llm),
            Arc::new(MemoryCache::new()),
            None,
            AnalysisEngineConfig::default(),
        );

        // Distinct incidents so prompts differ and the cache never hits.
        for _ in 0..5 {
            let mut inc = incident();
            inc.external_id = format!("INC-{}", Uuid::new_v4().simple());
            let analysis = engine.analyze(&inc, &bundle_with_commit(inc.id)).await;
            assert!(analysis.is_fallback());
        }

        assert_eq!(engine.breaker_state(), crate::services::llm::BreakerState::Open);
    }

    #[tokio::test]
    async fn test_fallback_summary_meets_schema_minimums() {
        let engine = engine(FakeLlm::with(vec![Err(ApiError::external_api_timeout("llm"))]));
        let incident = incident();
        let analysis = engine.analyze(&incident, &bundle_with_commit(incident.id)).await;
        assert!(analysis.is_fallback());
        assert!(analysis.payload.validate().is_ok());
    }
}
