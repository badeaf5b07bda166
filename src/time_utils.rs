// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting and an injectable clock.

use chrono::{DateTime, Duration, Local, SecondsFormat, Utc};
use std::sync::{Arc, Mutex};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Human-readable countdown status for the scheduler.
pub fn format_next_generation(deadline: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let local = deadline.with_timezone(&Local);
    format!(
        "Next generation at {} (in {})",
        local.format("%H:%M:%S"),
        format_remaining(deadline - now)
    )
}

/// Format a remaining duration as `1h 02m 03s`, clamping negatives to zero.
pub fn format_remaining(remaining: Duration) -> String {
    let total = remaining.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

/// Convert a fractional hour count to a duration with millisecond precision.
///
/// Returns `None` when the value is not finite or does not fit a duration.
pub fn hours_to_duration(hours: f64) -> Option<Duration> {
    let millis = (hours * 3_600_000.0).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(millis as i64)
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(Duration::seconds(5)), "5s");
        assert_eq!(format_remaining(Duration::seconds(65)), "1m 05s");
        assert_eq!(format_remaining(Duration::seconds(3723)), "1h 02m 03s");
        assert_eq!(format_remaining(Duration::seconds(-10)), "0s");
    }

    #[test]
    fn test_hours_to_duration() {
        assert_eq!(hours_to_duration(1.0), Some(Duration::minutes(60)));
        assert_eq!(hours_to_duration(0.5), Some(Duration::minutes(30)));
        assert_eq!(hours_to_duration(1e20), None);
        assert_eq!(hours_to_duration(f64::NAN), None);
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), start + Duration::seconds(90));
    }

    #[test]
    fn test_status_prefix() {
        let now = Utc::now();
        let text = format_next_generation(now + Duration::minutes(10), now);
        assert!(text.starts_with("Next generation at "));
        assert!(text.ends_with("(in 10m 00s)"));
    }
}
