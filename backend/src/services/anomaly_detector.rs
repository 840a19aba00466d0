//! Anomaly detector
//!
//! Applies a monitor's threshold policy against a baseline. Three modes:
//! absolute (raw value vs thresholds), percentage (deviation from baseline),
//! and multiplier (ratio over baseline). Exceeding the warning threshold is
//! an anomaly of severity high; exceeding the critical threshold escalates
//! to critical. A zero baseline yields no anomaly except in absolute mode.

use crate::models::{AnomalyResult, Baseline, Incident, MonitorConfig, Severity, ThresholdType};

pub struct AnomalyDetector;

impl AnomalyDetector {
    /// Evaluate `current_value` against the monitor threshold. Returns `None`
    /// when behavior is within bounds.
    pub fn detect(
        monitor: &MonitorConfig,
        current_value: f64,
        baseline: &Baseline,
    ) -> Option<AnomalyResult> {
        let threshold = &monitor.threshold;
        let baseline_value = baseline.average_value;

        let (severity, threshold_value) = match threshold.threshold_type {
            ThresholdType::Absolute => {
                if current_value <= threshold.warning {
                    return None;
                }
                if current_value > threshold.critical {
                    (Severity::Critical, threshold.critical)
                } else {
                    (Severity::High, threshold.warning)
                }
            },
            ThresholdType::Percentage => {
                if baseline_value == 0.0 {
                    return None;
                }
                let deviation =
                    ((current_value - baseline_value) / baseline_value * 100.0).abs();
                if deviation <= threshold.warning {
                    return None;
                }
                let severity =
                    if deviation > threshold.critical { Severity::Critical } else { Severity::High };
                (severity, baseline_value * (1.0 + threshold.critical / 100.0))
            },
            ThresholdType::Multiplier => {
                if baseline_value == 0.0 {
                    return None;
                }
                let ratio = current_value / baseline_value;
                if ratio <= threshold.warning {
                    return None;
                }
                let severity =
                    if ratio > threshold.critical { Severity::Critical } else { Severity::High };
                (severity, baseline_value * threshold.critical)
            },
        };

        Some(AnomalyResult {
            severity,
            current_value,
            baseline_value,
            threshold_value,
            deviation_percentage: Incident::deviation_percentage(current_value, baseline_value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn monitor_with(threshold_type: &str, warning: f64, critical: f64) -> MonitorConfig {
        serde_json::from_value(serde_json::json!({
            "id": "m1",
            "name": "m1",
            "enabled": true,
            "queries": { "metric": "avg:latency" },
            "checkIntervalSeconds": 60,
            "threshold": { "type": threshold_type, "warning": warning, "critical": critical },
            "timeWindow": "5m",
            "teamsNotification": { "channelWebhookUrl": "https://example.test/hook" },
            "severity": "high"
        }))
        .unwrap()
    }

    fn baseline(avg: f64) -> Baseline {
        Baseline {
            monitor_id: "m1".to_string(),
            hour_of_day: 12,
            average_value: avg,
            standard_deviation: 5.0,
            sample_count: 7,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn test_absolute_critical() {
        // Scenario: warning=50, critical=100, baseline avg=20, current=150.
        let monitor = monitor_with("absolute", 50.0, 100.0);
        let result = AnomalyDetector::detect(&monitor, 150.0, &baseline(20.0)).unwrap();
        assert_eq!(result.severity, Severity::Critical);
        assert_eq!(result.threshold_value, 100.0);
        assert!((result.deviation_percentage - 650.0).abs() < 1e-9);
    }

    #[test]
    fn test_absolute_warning_band_is_high() {
        let monitor = monitor_with("absolute", 50.0, 100.0);
        let result = AnomalyDetector::detect(&monitor, 75.0, &baseline(20.0)).unwrap();
        assert_eq!(result.severity, Severity::High);
        assert_eq!(result.threshold_value, 50.0);
    }

    #[test]
    fn test_absolute_below_warning_is_quiet() {
        let monitor = monitor_with("absolute", 50.0, 100.0);
        assert!(AnomalyDetector::detect(&monitor, 49.0, &baseline(20.0)).is_none());
    }

    #[test]
    fn test_percentage_uses_absolute_deviation() {
        let monitor = monitor_with("percentage", 50.0, 100.0);
        // 8 from a baseline of 20 is -60%, beyond the 50% warning.
        let result = AnomalyDetector::detect(&monitor, 8.0, &baseline(20.0)).unwrap();
        assert_eq!(result.severity, Severity::High);
        assert!((result.threshold_value - 40.0).abs() < 1e-9);
        assert!((result.deviation_percentage + 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentage_critical() {
        let monitor = monitor_with("percentage", 50.0, 100.0);
        let result = AnomalyDetector::detect(&monitor, 45.0, &baseline(20.0)).unwrap();
        assert_eq!(result.severity, Severity::Critical);
    }

    #[test]
    fn test_multiplier_mode() {
        let monitor = monitor_with("multiplier", 2.0, 5.0);
        let result = AnomalyDetector::detect(&monitor, 60.0, &baseline(20.0)).unwrap();
        assert_eq!(result.severity, Severity::High);
        assert!((result.threshold_value - 100.0).abs() < 1e-9);

        let critical = AnomalyDetector::detect(&monitor, 120.0, &baseline(20.0)).unwrap();
        assert_eq!(critical.severity, Severity::Critical);
    }

    #[test]
    fn test_zero_baseline_only_fires_absolute() {
        let zero = baseline(0.0);
        assert!(AnomalyDetector::detect(&monitor_with("percentage", 50.0, 100.0), 150.0, &zero).is_none());
        assert!(AnomalyDetector::detect(&monitor_with("multiplier", 2.0, 5.0), 150.0, &zero).is_none());

        let result = AnomalyDetector::detect(&monitor_with("absolute", 50.0, 100.0), 150.0, &zero).unwrap();
        assert_eq!(result.severity, Severity::Critical);
        assert_eq!(result.deviation_percentage, 0.0);
    }
}
