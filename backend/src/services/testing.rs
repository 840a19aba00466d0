//! In-memory fake adapters shared across service tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Mutex;

use crate::models::{
    Commit, DbFinding, DeploymentEvent, FindingSeverity, MergeRequestRef, MetricSample,
    PipelineStatus, TrackedError,
};
use crate::services::datadog_client::MetricsProvider;
use crate::services::db_investigator::{DbInvestigationResult, DbInvestigator};
use crate::services::gitlab_client::{CommitDiff, SourceControlProvider};
use crate::services::llm::{LlmProvider, LlmResponse};
use crate::services::sourcegraph_client::{CodeSearchProvider, SearchRequest, SearchResponse};
use crate::services::teams_notifier::{NotificationMessage, Notifier, SendResult};
use crate::models::{SearchMatch, TokenUsage};
use crate::utils::{ApiError, ApiResult};

// ============================================================================
// Metrics backend
// ============================================================================

#[derive(Default)]
pub struct FakeMetricsBackend {
    pub samples: Vec<MetricSample>,
    pub tracked_errors: Vec<TrackedError>,
    pub deployments: Vec<DeploymentEvent>,
    pub fail_metrics: bool,
}

#[async_trait]
impl MetricsProvider for FakeMetricsBackend {
    async fn query_metrics(&self, _query: &str, _from: i64, _to: i64) -> ApiResult<Vec<MetricSample>> {
        if self.fail_metrics {
            return Err(ApiError::external_api_timeout("datadog"));
        }
        Ok(self.samples.clone())
    }

    async fn query_error_tracking(&self, _query: &str, _from: i64, _to: i64) -> ApiResult<Vec<TrackedError>> {
        Ok(self.tracked_errors.clone())
    }

    async fn query_deployment_events(
        &self,
        _tags: &[String],
        _from: i64,
        _to: i64,
    ) -> Vec<DeploymentEvent> {
        self.deployments.clone()
    }
}

// ============================================================================
// Source control
// ============================================================================

pub struct FakeSourceControl {
    pub commits_per_repo: usize,
    pub fail: bool,
}

impl FakeSourceControl {
    pub fn with_commits(n: usize) -> Self {
        Self { commits_per_repo: n, fail: false }
    }

    pub fn failing() -> Self {
        Self { commits_per_repo: 0, fail: true }
    }
}

#[async_trait]
impl SourceControlProvider for FakeSourceControl {
    async fn get_commits(
        &self,
        repository: &str,
        _since: DateTime<Utc>,
        until: DateTime<Utc>,
        per_page: usize,
    ) -> ApiResult<Vec<Commit>> {
        if self.fail {
            return Err(ApiError::external_api_unavailable("gitlab", "status 503"));
        }
        Ok((0..self.commits_per_repo.min(per_page))
            .map(|i| Commit {
                sha: format!("sha{:04}", i),
                message: "fix checkout flow".to_string(),
                author: "dev".to_string(),
                timestamp: until - ChronoDuration::minutes(10 * (i as i64 + 1)),
                repository: repository.to_string(),
                files_changed: Vec::new(),
                additions: 0,
                deletions: 0,
            })
            .collect())
    }

    async fn get_commit_diff(&self, _repository: &str, _sha: &str) -> ApiResult<CommitDiff> {
        Ok(CommitDiff {
            files_changed: vec!["src/orders.ts".to_string()],
            additions: 12,
            deletions: 3,
        })
    }

    async fn get_pipeline_for_commit(
        &self,
        _repository: &str,
        _sha: &str,
    ) -> ApiResult<Option<PipelineStatus>> {
        Ok(Some(PipelineStatus { status: "success".to_string(), web_url: None }))
    }

    async fn get_merge_request_for_commit(
        &self,
        _repository: &str,
        _sha: &str,
    ) -> ApiResult<Option<MergeRequestRef>> {
        Ok(None)
    }
}

// ============================================================================
// Code search
// ============================================================================

pub struct FakeCodeSearch {
    pub matches: usize,
    pub fail: bool,
}

impl FakeCodeSearch {
    pub fn with_matches(n: usize) -> Self {
        Self { matches: n, fail: false }
    }

    pub fn failing() -> Self {
        Self { matches: 0, fail: true }
    }
}

#[async_trait]
impl CodeSearchProvider for FakeCodeSearch {
    async fn search(&self, request: SearchRequest) -> ApiResult<SearchResponse> {
        if self.fail {
            return Err(ApiError::external_api_unavailable("sourcegraph", "status 502"));
        }
        Ok(SearchResponse {
            affected_repositories: if self.matches > 0 {
                request.repositories.clone()
            } else {
                Vec::new()
            },
            total_match_count: self.matches as u64,
            critical_paths: Vec::new(),
            matches: (0..self.matches)
                .map(|i| SearchMatch {
                    repository: request.repositories.first().cloned().unwrap_or_default(),
                    file_path: format!("src/file{}.ts", i),
                    line_number: 10 + i as u32,
                    preview: format!("use of {}", request.pattern),
                })
                .collect(),
        })
    }
}

// ============================================================================
// Database investigation
// ============================================================================

pub struct FakeDb {
    pub fail: bool,
}

impl FakeDb {
    pub fn with_findings() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl DbInvestigator for FakeDb {
    async fn investigate(
        &self,
        tables: &[String],
        _schemas: &[String],
        _error_context: Option<&str>,
    ) -> ApiResult<DbInvestigationResult> {
        if self.fail {
            return Err(ApiError::external_api_timeout("db-investigation"));
        }
        Ok(DbInvestigationResult {
            schema_findings: tables
                .iter()
                .map(|t| DbFinding {
                    description: format!("Nullable business column {}.amount", t),
                    severity: FindingSeverity::Medium,
                    table: Some(t.clone()),
                })
                .collect(),
            data_findings: Vec::new(),
            performance_findings: Vec::new(),
        })
    }
}

// ============================================================================
// LLM and notification
// ============================================================================

pub struct FakeLlmBackend {
    pub response: Option<serde_json::Value>,
}

#[async_trait]
impl LlmProvider for FakeLlmBackend {
    async fn generate_analysis(&self, prompt: &str) -> ApiResult<LlmResponse> {
        match &self.response {
            Some(content) => {
                let input = crate::services::llm::estimate_tokens(prompt);
                Ok(LlmResponse {
                    content: content.clone(),
                    token_usage: TokenUsage { input, output: 25, total: input + 25 },
                    duration_ms: 3,
                    model_used: "fake-model".to_string(),
                })
            },
            None => Err(ApiError::external_api_timeout("llm")),
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<NotificationMessage>>,
    pub fail: bool,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_message(&self, message: NotificationMessage) -> ApiResult<SendResult> {
        if self.fail {
            return Err(ApiError::external_api_unavailable("teams", "status 500"));
        }
        self.sent.lock().unwrap().push(message);
        Ok(SendResult { success: true, message_id: Some("msg-1".to_string()) })
    }
}
