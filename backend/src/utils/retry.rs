//! Shared retry helper for external adapters.
//!
//! Policy: 3 attempts, exponential backoff with full jitter, capped at 10s.
//! Only transient errors (timeouts, 5xx, rate limits) are retried; anything
//! else propagates immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::error::{ApiError, ApiResult};

/// Retry policy for adapter calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(500), max_delay: Duration::from_secs(10) }
    }
}

impl RetryPolicy {
    /// Backoff delay for a given zero-based attempt, with full jitter.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let capped = exp.min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Run `op` under the retry policy, retrying only transient failures.
///
/// `label` names the upstream service for log lines.
pub async fn retry_with_backoff<T, F, Fut>(label: &str, policy: RetryPolicy, mut op: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let mut last_err: Option<ApiError> = None;

    for attempt in 0..policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    "{} call failed (attempt {}/{}), retrying in {:?}: {}",
                    label,
                    attempt + 1,
                    policy.max_attempts,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                last_err = Some(err);
            },
            Err(err) => return Err(err),
        }
    }

    Err(last_err.unwrap_or_else(|| ApiError::internal_error(format!("{}: retry loop exhausted", label))))
}
