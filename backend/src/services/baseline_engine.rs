//! Baseline engine
//!
//! Computes and caches a per-monitor, per-hour-of-day baseline from
//! historical metric samples. Cache-aside with a 24h TTL; computation walks
//! the previous seven days and averages each day's hour window, tolerating
//! per-day fetch failures. All time handling is UTC.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

use crate::models::{Baseline, MonitorConfig};
use crate::services::cache::Cache;
use crate::services::datadog_client::MetricsProvider;

/// Days of history consulted for a baseline.
const BASELINE_DAYS: i64 = 7;

pub struct BaselineEngine {
    metrics: Arc<dyn MetricsProvider>,
    cache: Arc<dyn Cache>,
    ttl_secs: u64,
}

impl BaselineEngine {
    pub fn new(metrics: Arc<dyn MetricsProvider>, cache: Arc<dyn Cache>, ttl_secs: u64) -> Self {
        Self { metrics, cache, ttl_secs }
    }

    fn cache_key(monitor_id: &str, hour_of_day: u32) -> String {
        format!("baseline:{}:{}", monitor_id, hour_of_day)
    }

    /// Baseline for a monitor at a given UTC hour of day, computed relative
    /// to `now`. Cached results are served until their TTL lapses.
    pub async fn get_baseline(
        &self,
        monitor: &MonitorConfig,
        hour_of_day: u32,
        now: DateTime<Utc>,
    ) -> Baseline {
        let key = Self::cache_key(&monitor.id, hour_of_day);

        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_str::<Baseline>(&cached) {
                Ok(baseline) => return baseline,
                Err(e) => {
                    tracing::warn!("discarding unparseable cached baseline {}: {}", key, e);
                },
            }
        }

        let baseline = self.compute(monitor, hour_of_day, now).await;

        match serde_json::to_string(&baseline) {
            Ok(serialized) => self.cache.setex(&key, self.ttl_secs, &serialized).await,
            Err(e) => tracing::warn!("failed to serialize baseline {}: {}", key, e),
        }

        baseline
    }

    /// Walk the last seven days; each day contributes the arithmetic mean of
    /// its hour window. Days with no samples (or failed fetches) are skipped
    /// and simply not counted.
    async fn compute(&self, monitor: &MonitorConfig, hour_of_day: u32, now: DateTime<Utc>) -> Baseline {
        let mut daily_means: Vec<f64> = Vec::with_capacity(BASELINE_DAYS as usize);

        for days_back in 1..=BASELINE_DAYS {
            let day = (now - ChronoDuration::days(days_back)).date_naive();
            let Some(window_start) = day.and_hms_opt(hour_of_day, 0, 0) else {
                continue;
            };
            let from = Utc.from_utc_datetime(&window_start);
            let to = from + ChronoDuration::hours(1);

            match self.metrics.query_metrics(&monitor.queries.metric, from.timestamp(), to.timestamp()).await
            {
                Ok(samples) if !samples.is_empty() => {
                    let mean = samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64;
                    daily_means.push(mean);
                },
                Ok(_) => {},
                Err(e) => {
                    tracing::warn!(
                        "baseline fetch failed for monitor {} ({} days back): {}",
                        monitor.id,
                        days_back,
                        e
                    );
                },
            }
        }

        if daily_means.is_empty() {
            tracing::warn!(
                "no historical samples for monitor {} at hour {}, returning empty baseline",
                monitor.id,
                hour_of_day
            );
            return Baseline::empty(&monitor.id, hour_of_day);
        }

        let n = daily_means.len() as f64;
        let average = daily_means.iter().sum::<f64>() / n;
        let standard_deviation = if daily_means.len() > 1 {
            let variance =
                daily_means.iter().map(|v| (v - average).powi(2)).sum::<f64>() / (n - 1.0);
            variance.sqrt()
        } else {
            0.0
        };

        Baseline {
            monitor_id: monitor.id.clone(),
            hour_of_day,
            average_value: average,
            standard_deviation,
            sample_count: daily_means.len() as u32,
            computed_at: now,
        }
    }
}
