//! Utility functions and helpers

pub mod time;

use anyhow::{bail, Context, Result};
use std::time::Duration;

/// Parse a sampling interval (e.g., "0.001", "500ms", "2s", "1m").
///
/// A bare number is taken as seconds and may be fractional.
pub fn parse_interval(s: &str) -> Result<Duration> {
    let s = s.trim();

    let secs: f64 = if let Some(num_str) = s.strip_suffix("ms") {
        num_str.trim().parse::<f64>()? / 1000.0
    } else if let Some(num_str) = s.strip_suffix('s') {
        num_str.trim().parse()?
    } else if let Some(num_str) = s.strip_suffix('m') {
        num_str.trim().parse::<f64>()? * 60.0
    } else {
        s.parse()?
    };

    if !secs.is_finite() || secs <= 0.0 {
        bail!("Interval must be a positive number of seconds: {}", s);
    }
    Duration::try_from_secs_f64(secs).with_context(|| format!("Interval out of range: {}", s))
}

/// Sampling frequency in Hz for a given interval
pub fn rate_hz(interval: Duration) -> f64 {
    let secs = interval.as_secs_f64();
    if secs == 0.0 {
        return 0.0;
    }
    1.0 / secs
}

/// Format a frequency for display ("1000 Hz", "0.5 Hz")
pub fn format_rate(interval: Duration) -> String {
    let hz = rate_hz(interval);
    if hz >= 1.0 && (hz - hz.round()).abs() < 1e-6 {
        format!("{} Hz", hz.round() as u64)
    } else {
        format!("{:.2} Hz", hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("1").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_interval("0.5").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_interval("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_interval("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_interval("1m").unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_interval_rejects_nonpositive() {
        assert!(parse_interval("0").is_err());
        assert!(parse_interval("-1").is_err());
        assert!(parse_interval("fast").is_err());
    }

    #[test]
    fn test_parse_interval_rejects_out_of_range() {
        assert!(parse_interval("1e300").is_err());
        assert!(parse_interval("1e300m").is_err());
        assert!(parse_interval("inf").is_err());
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(Duration::from_millis(1)), "1000 Hz");
        assert_eq!(format_rate(Duration::from_secs(1)), "1 Hz");
        assert_eq!(format_rate(Duration::from_secs(2)), "0.50 Hz");
    }
}
