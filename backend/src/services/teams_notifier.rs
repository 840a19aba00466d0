//! Teams notification adapter.
//!
//! Delivery target selection: explicit webhook URL if the message carries
//! one, else an authenticated team+channel post, else the configured default
//! webhook. Retry policy: connect errors, timeouts, and 5xx responses are
//! retried with the shared backoff policy (3 attempts, jittered exponential,
//! 10s cap); 4xx responses are terminal.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::models::{Analysis, Incident, MonitorConfig};
use crate::utils::{ApiError, ApiResult, RetryPolicy, retry_with_backoff};

/// Outbound notification, already formatted.
#[derive(Debug, Clone)]
pub struct NotificationMessage {
    pub content: serde_json::Value,
    pub webhook_url: Option<String>,
    pub team_id: Option<String>,
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SendResult {
    pub success: bool,
    pub message_id: Option<String>,
}

/// Notification collaborator contract.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(&self, message: NotificationMessage) -> ApiResult<SendResult>;
}

#[derive(Debug, Clone)]
pub struct TeamsConfig {
    pub default_webhook_url: String,
    pub api_url: String,
    pub token: String,
    pub timeout_secs: u64,
}

pub struct TeamsNotifier {
    http_client: Client,
    config: TeamsConfig,
    retry: RetryPolicy,
}

impl TeamsNotifier {
    pub fn new(config: TeamsConfig) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { http_client, config, retry: RetryPolicy::default() }
    }

    async fn post_webhook(&self, url: &str, content: &serde_json::Value) -> ApiResult<SendResult> {
        let response = self.http_client.post(url).json(content).send().await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(ApiError::external_api_unavailable("teams", format!("status {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::external_api("teams", format!("status {}: {}", status, body)));
        }
        Ok(SendResult { success: true, message_id: None })
    }

    async fn post_channel(
        &self,
        team_id: &str,
        channel_id: &str,
        content: &serde_json::Value,
    ) -> ApiResult<SendResult> {
        let url = format!(
            "{}/teams/{}/channels/{}/messages",
            self.config.api_url.trim_end_matches('/'),
            team_id,
            channel_id
        );
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.config.token)
            .json(content)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ApiError::external_api_unavailable("teams", format!("status {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::external_api("teams", format!("status {}: {}", status, body)));
        }

        let message_id = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("id").and_then(|id| id.as_str().map(String::from)));
        Ok(SendResult { success: true, message_id })
    }
}

#[async_trait]
impl Notifier for TeamsNotifier {
    async fn send_message(&self, message: NotificationMessage) -> ApiResult<SendResult> {
        if let Some(url) = &message.webhook_url {
            return retry_with_backoff("teams", self.retry, || {
                self.post_webhook(url, &message.content)
            })
            .await;
        }

        if let (Some(team), Some(channel)) = (&message.team_id, &message.channel_id) {
            return retry_with_backoff("teams", self.retry, || {
                self.post_channel(team, channel, &message.content)
            })
            .await;
        }

        if self.config.default_webhook_url.is_empty() {
            return Err(ApiError::configuration("no notification target configured"));
        }
        retry_with_backoff("teams", self.retry, || {
            self.post_webhook(&self.config.default_webhook_url, &message.content)
        })
        .await
    }
}

fn severity_emoji(incident: &Incident) -> &'static str {
    match incident.severity {
        crate::models::Severity::Critical => "🔴",
        crate::models::Severity::High => "🟠",
        crate::models::Severity::Medium => "🟡",
        crate::models::Severity::Low => "🟢",
    }
}

fn render_pattern(pattern: &str, incident: &Incident, monitor: &MonitorConfig) -> String {
    pattern
        .replace("{id}", &incident.external_id)
        .replace("{query}", &urlencoding::encode(&monitor.queries.metric))
}

/// Build the MessageCard payload for a completed analysis.
pub fn build_incident_message(
    incident: &Incident,
    analysis: &Analysis,
    monitor: &MonitorConfig,
) -> NotificationMessage {
    let mut facts = vec![
        json!({ "name": "Service", "value": incident.service_name }),
        json!({ "name": "Metric", "value": incident.metric_name }),
        json!({ "name": "Current / Baseline", "value": format!("{:.2} / {:.2}", incident.metric_value, incident.baseline_value) }),
        json!({ "name": "Deviation", "value": format!("{:.1}%", incident.deviation_percentage) }),
        json!({ "name": "Tier", "value": incident.investigation_tier.as_str() }),
        json!({ "name": "Confidence", "value": format!("{:?}", analysis.payload.root_cause.confidence).to_lowercase() }),
    ];
    if analysis.is_fallback() {
        facts.push(json!({ "name": "Analysis", "value": "template fallback (LLM unavailable)" }));
    }

    let mut sections = vec![
        json!({
            "activityTitle": format!("{} {} — {}", severity_emoji(incident), incident.external_id, monitor.name),
            "facts": facts,
            "text": analysis.payload.summary,
        }),
        json!({
            "title": "Root cause",
            "text": analysis.payload.root_cause.hypothesis,
        }),
    ];

    if !analysis.payload.recommended_actions.is_empty() {
        let actions: Vec<String> = analysis
            .payload
            .recommended_actions
            .iter()
            .take(3)
            .map(|a| format!("{}. {}", a.priority, a.action))
            .collect();
        sections.push(json!({ "title": "Recommended actions", "text": actions.join("\n") }));
    }

    if !monitor.teams_notification.mention_users.is_empty() {
        sections.push(json!({
            "title": "Attention",
            "text": monitor.teams_notification.mention_users.join(", "),
        }));
    }

    let mut actions = Vec::new();
    if let Some(patterns) = &monitor.teams_notification.url_patterns {
        for (name, pattern) in [
            ("View incident", &patterns.incident),
            ("Open metrics", &patterns.datadog),
            ("Open repository", &patterns.gitlab),
        ] {
            if let Some(pattern) = pattern {
                actions.push(json!({
                    "@type": "OpenUri",
                    "name": name,
                    "targets": [{ "os": "default", "uri": render_pattern(pattern, incident, monitor) }]
                }));
            }
        }
    }

    let content = json!({
        "@type": "MessageCard",
        "@context": "http://schema.org/extensions",
        "themeColor": if incident.severity == crate::models::Severity::Critical { "d93f0b" } else { "e8a317" },
        "summary": format!("Incident {} on {}", incident.external_id, incident.service_name),
        "sections": sections,
        "potentialAction": actions,
    });

    NotificationMessage {
        content,
        webhook_url: (!monitor.teams_notification.channel_webhook_url.is_empty())
            .then(|| monitor.teams_notification.channel_webhook_url.clone()),
        team_id: None,
        channel_id: None,
    }
}
