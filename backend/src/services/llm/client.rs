//! LLM adapter (OpenAI-compatible chat completions API).
//!
//! Returns parsed JSON content only: the raw completion is stripped of any
//! surrounding Markdown fences before parsing, and token usage is estimated
//! as ceil(len/4) on both sides of the exchange.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::models::TokenUsage;
use crate::utils::{ApiError, ApiResult};

use super::prompt::ANALYSIS_SYSTEM_PROMPT;

/// One LLM completion, already parsed.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: serde_json::Value,
    pub token_usage: TokenUsage,
    pub duration_ms: u64,
    pub model_used: String,
}

/// LLM adapter contract.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate_analysis(&self, prompt: &str) -> ApiResult<LlmResponse>;
}

#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout_secs: u64,
}

pub struct OpenAiCompatibleClient {
    http_client: Client,
    config: LlmClientConfig,
}

impl OpenAiCompatibleClient {
    pub fn new(config: LlmClientConfig) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self { http_client, config }
    }
}

/// Estimate token count as ceil(len / 4).
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Strip a surrounding Markdown code fence (```json ... ``` or ``` ... ```).
pub fn strip_markdown_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") up to the first newline.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleClient {
    async fn generate_analysis(&self, prompt: &str) -> ApiResult<LlmResponse> {
        let started = Instant::now();
        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));

        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": ANALYSIS_SYSTEM_PROMPT },
                { "role": "user", "content": prompt }
            ]
        });

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ApiError::external_api_unavailable("llm", format!("status {}", status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::external_api("llm", format!("status {}: {}", status, text)));
        }

        let completion: ChatCompletionResponse = response.json().await?;
        let raw_content = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ApiError::external_api("llm", "completion had no choices"))?;

        let cleaned = strip_markdown_fences(&raw_content);
        let content: serde_json::Value = serde_json::from_str(cleaned)
            .map_err(|e| ApiError::analysis(format!("LLM response is not valid JSON: {}", e)))?;

        let input = estimate_tokens(prompt);
        let output = estimate_tokens(&raw_content);

        Ok(LlmResponse {
            content,
            token_usage: TokenUsage { input, output, total: input + output },
            duration_ms: started.elapsed().as_millis() as u64,
            model_used: completion.model.unwrap_or_else(|| self.config.model.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences_with_language() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_markdown_fences(raw), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_fences_without_language() {
        let raw = "```\n{\"a\": 1}\n```";
        assert_eq!(strip_markdown_fences(raw), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_fences_noop_on_plain_json() {
        assert_eq!(strip_markdown_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
