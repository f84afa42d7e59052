//! Time-related utilities

use chrono::{DateTime, Local};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current system time in seconds since UNIX epoch
pub fn system_time_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Render a UNIX timestamp (seconds) in local time for reports
pub fn format_local(epoch_secs: f64) -> String {
    let nanos = (epoch_secs.fract() * 1e9) as u32;
    match DateTime::from_timestamp(epoch_secs.trunc() as i64, nanos) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => format!("{epoch_secs:.3}"),
    }
}
