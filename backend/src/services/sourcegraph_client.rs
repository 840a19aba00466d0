//! Code-search adapter.
//!
//! Thin client over the code-search host's JSON search API, used for
//! cross-repository impact analysis during tier-3 investigations. Search
//! responses are cached so repeated incidents with the same error signature
//! do not re-run the search.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::SearchMatch;
use crate::services::cache::Cache;
use crate::utils::{ApiError, ApiResult, RetryPolicy, retry_with_backoff};

/// Search request sent to the code-search host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub pattern: String,
    pub repositories: Vec<String>,
    pub exclude_tests: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub file_patterns: Vec<String>,
    pub max_results: usize,
}

/// Search response from the code-search host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub affected_repositories: Vec<String>,
    #[serde(default)]
    pub total_match_count: u64,
    #[serde(default)]
    pub critical_paths: Vec<String>,
    #[serde(default)]
    pub matches: Vec<SearchMatch>,
}

/// Code-search adapter contract.
#[async_trait]
pub trait CodeSearchProvider: Send + Sync {
    async fn search(&self, request: SearchRequest) -> ApiResult<SearchResponse>;
}

#[derive(Debug, Clone)]
pub struct SourcegraphConfig {
    pub api_url: String,
    pub token: String,
    pub timeout_secs: u64,
}

pub struct SourcegraphClient {
    http_client: Client,
    config: SourcegraphConfig,
    retry: RetryPolicy,
    result_cache: Option<(Arc<dyn Cache>, u64)>,
}

impl SourcegraphClient {
    pub fn new(config: SourcegraphConfig) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { http_client, config, retry: RetryPolicy::default(), result_cache: None }
    }

    /// Enable search-result caching with the given TTL.
    pub fn with_result_cache(mut self, cache: Arc<dyn Cache>, ttl_secs: u64) -> Self {
        self.result_cache = Some((cache, ttl_secs));
        self
    }

    fn cache_key(request: &SearchRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.pattern.as_bytes());
        for repo in &request.repositories {
            hasher.update(repo.as_bytes());
        }
        format!("search:{}", hex::encode(hasher.finalize()))
    }

    async fn post_search(&self, request: &SearchRequest) -> ApiResult<SearchResponse> {
        let url = format!("{}/api/search", self.config.api_url.trim_end_matches('/'));

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.config.token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ApiError::external_api_unavailable("sourcegraph", format!("status {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::external_api("sourcegraph", format!("status {}: {}", status, body)));
        }

        Ok(response.json::<SearchResponse>().await?)
    }
}

#[async_trait]
impl CodeSearchProvider for SourcegraphClient {
    async fn search(&self, request: SearchRequest) -> ApiResult<SearchResponse> {
        let key = Self::cache_key(&request);
        if let Some((cache, _)) = &self.result_cache {
            if let Some(cached) = cache.get(&key).await {
                if let Ok(response) = serde_json::from_str::<SearchResponse>(&cached) {
                    return Ok(response);
                }
            }
        }

        let response =
            retry_with_backoff("sourcegraph", self.retry, || self.post_search(&request)).await?;
        tracing::debug!(
            "code search for '{}' matched {} across {} repositories",
            request.pattern,
            response.total_match_count,
            response.affected_repositories.len()
        );

        if let Some((cache, ttl)) = &self.result_cache {
            if let Ok(serialized) = serde_json::to_string(&response) {
                cache.setex(&key, *ttl, &serialized).await;
            }
        }
        Ok(response)
    }
}
