//! Time-window parsing for monitor configurations.
//!
//! Accepts the `^(\d+)([mh])$` form only; anything else fails the whole
//! monitor at load time.

use once_cell::sync::Lazy;
use regex::Regex;

use super::error::{ApiError, ApiResult};

static TIME_WINDOW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)([mh])$").expect("time window regex"));

/// Parse a time window like "5m" or "1h" into seconds.
pub fn parse_time_window_secs(window: &str) -> ApiResult<u64> {
    let caps = TIME_WINDOW_RE.captures(window).ok_or_else(|| {
        ApiError::configuration(format!(
            "Invalid time window '{}': expected <number>m or <number>h",
            window
        ))
    })?;

    let amount: u64 = caps[1]
        .parse()
        .map_err(|_| ApiError::configuration(format!("Invalid time window amount '{}'", window)))?;

    if amount == 0 {
        return Err(ApiError::configuration(format!("Time window '{}' must be > 0", window)));
    }

    match &caps[2] {
        "m" => Ok(amount * 60),
        "h" => Ok(amount * 3600),
        unit => Err(ApiError::configuration(format!("Unsupported time window unit '{}'", unit))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minutes_and_hours() {
        assert_eq!(parse_time_window_secs("5m").unwrap(), 300);
        assert_eq!(parse_time_window_secs("1h").unwrap(), 3600);
        assert_eq!(parse_time_window_secs("90m").unwrap(), 5400);
    }

    #[test]
    fn test_rejects_malformed_windows() {
        for bad in ["", "5", "m", "5s", "5 m", "1.5h", "-5m", "5mm", "h5"] {
            assert!(parse_time_window_secs(bad).is_err(), "expected '{}' to fail", bad);
        }
    }

    #[test]
    fn test_rejects_zero_window() {
        assert!(parse_time_window_secs("0m").is_err());
    }
}
