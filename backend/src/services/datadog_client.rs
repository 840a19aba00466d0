//! Metrics backend adapter (Datadog-compatible API).
//!
//! Wraps metric queries, error-tracking search, and deployment-event lookup
//! with retry and per-request timeouts. Deployment events are best-effort:
//! failures degrade to an empty list.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::models::{DeploymentEvent, MetricSample, TrackedError};
use crate::utils::{ApiError, ApiResult, RetryPolicy, retry_with_backoff};

/// Metrics adapter contract.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Ordered series of samples for a metric query.
    async fn query_metrics(&self, query: &str, from_unix: i64, to_unix: i64)
    -> ApiResult<Vec<MetricSample>>;

    /// Error-tracking events matching a query.
    async fn query_error_tracking(
        &self,
        query: &str,
        from_unix: i64,
        to_unix: i64,
    ) -> ApiResult<Vec<TrackedError>>;

    /// Deployment events for a tag set. Best-effort: empty on failure.
    async fn query_deployment_events(
        &self,
        tags: &[String],
        from_unix: i64,
        to_unix: i64,
    ) -> Vec<DeploymentEvent>;
}

#[derive(Debug, Clone)]
pub struct DatadogConfig {
    pub api_url: String,
    pub api_key: String,
    pub app_key: String,
    pub timeout_secs: u64,
}

pub struct DatadogClient {
    http_client: Client,
    config: DatadogConfig,
    retry: RetryPolicy,
}

impl DatadogClient {
    pub fn new(config: DatadogConfig) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { http_client, config, retry: RetryPolicy::default() }
    }

    fn base_url(&self) -> &str {
        self.config.api_url.trim_end_matches('/')
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> ApiResult<T> {
        let response = self
            .http_client
            .get(url)
            .header("DD-API-KEY", &self.config.api_key)
            .header("DD-APPLICATION-KEY", &self.config.app_key)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ApiError::external_api_unavailable("datadog", format!("status {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::external_api("datadog", format!("status {}: {}", status, body)));
        }

        Ok(response.json::<T>().await?)
    }
}

// Response shapes for the subset of the API we consume.

#[derive(Debug, Deserialize)]
struct MetricQueryResponse {
    #[serde(default)]
    series: Vec<MetricSeries>,
}

#[derive(Debug, Deserialize)]
struct MetricSeries {
    /// Points as [timestamp_ms, value] pairs; value may be null for gaps.
    #[serde(default)]
    pointlist: Vec<(f64, Option<f64>)>,
}

#[derive(Debug, Deserialize)]
struct ErrorSearchResponse {
    #[serde(default)]
    data: Vec<ErrorEvent>,
}

#[derive(Debug, Deserialize)]
struct ErrorEvent {
    attributes: ErrorAttributes,
}

#[derive(Debug, Deserialize)]
struct ErrorAttributes {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default, rename = "stackTrace")]
    stack_trace: Option<String>,
    #[serde(default)]
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    title: String,
    #[serde(default)]
    date_happened: i64,
    #[serde(default)]
    tags: Vec<String>,
}

impl RawEvent {
    /// Deployment SHA carried as a `commit_sha:<sha>` or `sha:<sha>` tag.
    fn commit_sha(&self) -> Option<String> {
        self.tags.iter().find_map(|tag| {
            tag.strip_prefix("commit_sha:").or_else(|| tag.strip_prefix("sha:")).map(String::from)
        })
    }
}

#[async_trait]
impl MetricsProvider for DatadogClient {
    async fn query_metrics(
        &self,
        query: &str,
        from_unix: i64,
        to_unix: i64,
    ) -> ApiResult<Vec<MetricSample>> {
        let url = format!(
            "{}/api/v1/query?from={}&to={}&query={}",
            self.base_url(),
            from_unix,
            to_unix,
            urlencoding::encode(query)
        );

        let response: MetricQueryResponse =
            retry_with_backoff("datadog", self.retry, || self.get_json(&url)).await?;

        let mut samples: Vec<MetricSample> = response
            .series
            .into_iter()
            .flat_map(|s| s.pointlist)
            .filter_map(|(ts_ms, value)| {
                value.map(|v| MetricSample { timestamp: (ts_ms / 1000.0) as i64, value: v })
            })
            .collect();
        samples.sort_by_key(|s| s.timestamp);

        tracing::debug!("datadog query returned {} samples", samples.len());
        Ok(samples)
    }

    async fn query_error_tracking(
        &self,
        query: &str,
        from_unix: i64,
        to_unix: i64,
    ) -> ApiResult<Vec<TrackedError>> {
        let url = format!(
            "{}/api/v2/errors/search?from={}&to={}&query={}",
            self.base_url(),
            from_unix,
            to_unix,
            urlencoding::encode(query)
        );

        let response: ErrorSearchResponse =
            retry_with_backoff("datadog", self.retry, || self.get_json(&url)).await?;

        Ok(response
            .data
            .into_iter()
            .map(|e| TrackedError {
                message: e.attributes.message,
                error_type: e.attributes.error_type,
                stack_trace: e.attributes.stack_trace,
                timestamp: e.attributes.timestamp,
            })
            .collect())
    }

    async fn query_deployment_events(
        &self,
        tags: &[String],
        from_unix: i64,
        to_unix: i64,
    ) -> Vec<DeploymentEvent> {
        let tag_filter = tags.join(",");
        let url = format!(
            "{}/api/v1/events?start={}&end={}&tags={}",
            self.base_url(),
            from_unix,
            to_unix,
            urlencoding::encode(&tag_filter)
        );

        match retry_with_backoff("datadog", self.retry, || self.get_json::<EventsResponse>(&url))
            .await
        {
            Ok(response) => {
                let mut events: Vec<DeploymentEvent> = response
                    .events
                    .into_iter()
                    .map(|e| DeploymentEvent {
                        commit_sha: e.commit_sha(),
                        title: e.title,
                        timestamp: e.date_happened,
                        tags: e.tags,
                    })
                    .collect();
                // Newest first so callers can take the most recent deployment.
                events.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
                events
            },
            Err(e) => {
                tracing::warn!("deployment event lookup failed, continuing without: {}", e);
                Vec::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_sha_extraction() {
        let event = RawEvent {
            title: "deploy checkout v42".to_string(),
            date_happened: 1_700_000_000,
            tags: vec!["env:prod".to_string(), "commit_sha:abc123".to_string()],
        };
        assert_eq!(event.commit_sha().as_deref(), Some("abc123"));

        let bare = RawEvent { title: String::new(), date_happened: 0, tags: vec![] };
        assert!(bare.commit_sha().is_none());
    }

    #[test]
    fn test_metric_response_parsing_skips_gaps() {
        let raw = serde_json::json!({
            "series": [
                { "pointlist": [[1000.0, 1.5], [2000.0, null], [3000.0, 2.5]] }
            ]
        });
        let parsed: MetricQueryResponse = serde_json::from_value(raw).unwrap();
        let samples: Vec<MetricSample> = parsed
            .series
            .into_iter()
            .flat_map(|s| s.pointlist)
            .filter_map(|(ts, v)| v.map(|v| MetricSample { timestamp: (ts / 1000.0) as i64, value: v }))
            .collect();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].timestamp, 1);
    }
}
