//! Source-control adapter (GitLab-compatible API).
//!
//! Commit listing and diffs go through the shared retry policy; pipeline and
//! merge-request lookups are best-effort and return `None` on any failure.
//! Project path -> numeric id resolution is cached (repo metadata TTL) so
//! repeated investigations of the same repositories skip the lookup.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::models::{Commit, MergeRequestRef, PipelineStatus};
use crate::services::cache::Cache;
use crate::utils::{ApiError, ApiResult, RetryPolicy, retry_with_backoff};

/// Diff summary for a single commit.
#[derive(Debug, Clone, Default)]
pub struct CommitDiff {
    pub files_changed: Vec<String>,
    pub additions: u64,
    pub deletions: u64,
}

/// Source-control adapter contract.
#[async_trait]
pub trait SourceControlProvider: Send + Sync {
    async fn get_commits(
        &self,
        repository: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        per_page: usize,
    ) -> ApiResult<Vec<Commit>>;

    async fn get_commit_diff(&self, repository: &str, sha: &str) -> ApiResult<CommitDiff>;

    /// Best-effort: `Ok(None)` on upstream error.
    async fn get_pipeline_for_commit(
        &self,
        repository: &str,
        sha: &str,
    ) -> ApiResult<Option<PipelineStatus>>;

    /// Best-effort: `Ok(None)` on upstream error.
    async fn get_merge_request_for_commit(
        &self,
        repository: &str,
        sha: &str,
    ) -> ApiResult<Option<MergeRequestRef>>;
}

#[derive(Debug, Clone)]
pub struct GitlabConfig {
    pub api_url: String,
    pub token: String,
    pub timeout_secs: u64,
}

pub struct GitlabClient {
    http_client: Client,
    config: GitlabConfig,
    retry: RetryPolicy,
    metadata_cache: Option<(Arc<dyn Cache>, u64)>,
}

impl GitlabClient {
    pub fn new(config: GitlabConfig) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { http_client, config, retry: RetryPolicy::default(), metadata_cache: None }
    }

    /// Enable project-metadata caching with the given TTL.
    pub fn with_metadata_cache(mut self, cache: Arc<dyn Cache>, ttl_secs: u64) -> Self {
        self.metadata_cache = Some((cache, ttl_secs));
        self
    }

    fn project_url(&self, project_ref: &str) -> String {
        format!("{}/api/v4/projects/{}", self.config.api_url.trim_end_matches('/'), project_ref)
    }

    fn encoded_path(repository: &str) -> String {
        urlencoding::encode(repository).into_owned()
    }

    /// Resolve a repository path to its numeric project id, cached under the
    /// repo-metadata TTL. Falls back to the URL-encoded path on any failure.
    async fn resolve_project_ref(&self, repository: &str) -> String {
        let Some((cache, ttl)) = &self.metadata_cache else {
            return Self::encoded_path(repository);
        };

        let key = format!("gitlab:project:{}", repository);
        if let Some(cached) = cache.get(&key).await {
            return cached;
        }

        let url = self.project_url(&Self::encoded_path(repository));
        match self.get_json::<RawProject>(&url).await {
            Ok(project) => {
                let id = project.id.to_string();
                cache.setex(&key, *ttl, &id).await;
                id
            },
            Err(e) => {
                tracing::debug!("project metadata lookup failed for {}: {}", repository, e);
                Self::encoded_path(repository)
            },
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> ApiResult<T> {
        let response =
            self.http_client.get(url).header("PRIVATE-TOKEN", &self.config.token).send().await?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ApiError::external_api_unavailable("gitlab", format!("status {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::external_api("gitlab", format!("status {}: {}", status, body)));
        }

        Ok(response.json::<T>().await?)
    }
}

#[derive(Debug, Deserialize)]
struct RawProject {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    author_name: String,
    committed_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RawDiffEntry {
    new_path: String,
    #[serde(default)]
    diff: String,
}

impl RawDiffEntry {
    /// Count added/removed lines from unified diff text. Hunk headers
    /// (`+++` / `---`) are excluded.
    fn line_counts(&self) -> (u64, u64) {
        let mut additions = 0;
        let mut deletions = 0;
        for line in self.diff.lines() {
            if line.starts_with('+') && !line.starts_with("+++") {
                additions += 1;
            } else if line.starts_with('-') && !line.starts_with("---") {
                deletions += 1;
            }
        }
        (additions, deletions)
    }
}

#[derive(Debug, Deserialize)]
struct RawPipeline {
    status: String,
    #[serde(default)]
    web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMergeRequest {
    iid: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    web_url: Option<String>,
}

#[async_trait]
impl SourceControlProvider for GitlabClient {
    async fn get_commits(
        &self,
        repository: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        per_page: usize,
    ) -> ApiResult<Vec<Commit>> {
        let project = self.resolve_project_ref(repository).await;
        let url = format!(
            "{}/repository/commits?since={}&until={}&per_page={}",
            self.project_url(&project),
            urlencoding::encode(&since.to_rfc3339()),
            urlencoding::encode(&until.to_rfc3339()),
            per_page
        );

        let raw: Vec<RawCommit> =
            retry_with_backoff("gitlab", self.retry, || self.get_json(&url)).await?;

        Ok(raw
            .into_iter()
            .map(|c| Commit {
                sha: c.id,
                message: c.message,
                author: c.author_name,
                timestamp: c.committed_date,
                repository: repository.to_string(),
                files_changed: Vec::new(),
                additions: 0,
                deletions: 0,
            })
            .collect())
    }

    async fn get_commit_diff(&self, repository: &str, sha: &str) -> ApiResult<CommitDiff> {
        let project = self.resolve_project_ref(repository).await;
        let url = format!("{}/repository/commits/{}/diff", self.project_url(&project), sha);

        let entries: Vec<RawDiffEntry> =
            retry_with_backoff("gitlab", self.retry, || self.get_json(&url)).await?;

        let mut diff = CommitDiff::default();
        for entry in entries {
            let (added, removed) = entry.line_counts();
            diff.additions += added;
            diff.deletions += removed;
            diff.files_changed.push(entry.new_path);
        }
        Ok(diff)
    }

    async fn get_pipeline_for_commit(
        &self,
        repository: &str,
        sha: &str,
    ) -> ApiResult<Option<PipelineStatus>> {
        let project = self.resolve_project_ref(repository).await;
        let url = format!("{}/pipelines?sha={}", self.project_url(&project), sha);

        match self.get_json::<Vec<RawPipeline>>(&url).await {
            Ok(pipelines) => Ok(pipelines
                .into_iter()
                .next()
                .map(|p| PipelineStatus { status: p.status, web_url: p.web_url })),
            Err(e) => {
                tracing::debug!("pipeline lookup failed for {}@{}: {}", repository, sha, e);
                Ok(None)
            },
        }
    }

    async fn get_merge_request_for_commit(
        &self,
        repository: &str,
        sha: &str,
    ) -> ApiResult<Option<MergeRequestRef>> {
        let project = self.resolve_project_ref(repository).await;
        let url =
            format!("{}/repository/commits/{}/merge_requests", self.project_url(&project), sha);

        match self.get_json::<Vec<RawMergeRequest>>(&url).await {
            Ok(mrs) => Ok(mrs
                .into_iter()
                .next()
                .map(|mr| MergeRequestRef { iid: mr.iid, title: mr.title, web_url: mr.web_url })),
            Err(e) => {
                tracing::debug!("merge request lookup failed for {}@{}: {}", repository, sha, e);
                Ok(None)
            },
        }
    }
}
