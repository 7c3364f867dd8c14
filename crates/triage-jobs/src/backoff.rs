//! Per-capture retry backoff.

use std::time::Duration;

use chrono::{DateTime, Utc};

use triage_core::{defaults, Capture};

/// Exponential backoff: `min(base * 2^n, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(defaults::BACKOFF_BASE_MS),
            cap: Duration::from_millis(defaults::BACKOFF_CAP_MS),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay after `retry_count` previous retries.
    pub fn delay(&self, retry_count: i32) -> Duration {
        let exponent = retry_count.max(0) as u32;
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Earliest time `capture` may be attempted again, if it has failed before.
    pub fn next_attempt_at(&self, capture: &Capture) -> Option<DateTime<Utc>> {
        if capture.retry_count == 0 {
            return None;
        }
        let last = capture.last_attempt_at?;
        let wait = chrono::Duration::from_std(self.delay(capture.retry_count - 1))
            .unwrap_or_else(|_| chrono::Duration::zero());
        Some(last + wait)
    }

    /// Whether the capture's backoff window has elapsed at `now`.
    pub fn is_due(&self, capture: &Capture, now: DateTime<Utc>) -> bool {
        self.next_attempt_at(capture).map_or(true, |at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = BackoffPolicy::default();
        let secs: Vec<u64> = (0..5).map(|n| policy.delay(n).as_secs()).collect();
        assert_eq!(secs, vec![5, 10, 20, 40, 60]);
    }

    #[test]
    fn test_delay_never_overflows() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(64), policy.cap);
        assert_eq!(policy.delay(-3), policy.base);
    }

    #[test]
    fn test_fresh_capture_is_due() {
        let policy = BackoffPolicy::default();
        assert!(policy.is_due(&Capture::new("x"), Utc::now()));
    }

    #[test]
    fn test_failed_capture_waits_for_its_window() {
        let policy = BackoffPolicy::default();
        let now = Utc::now();
        let capture = Capture {
            retry_count: 2,
            last_attempt_at: Some(now),
            ..Capture::new("x")
        };

        // Second failure waits 10s
        assert!(!policy.is_due(&capture, now + chrono::Duration::seconds(9)));
        assert!(policy.is_due(&capture, now + chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_missing_attempt_time_is_due() {
        let policy = BackoffPolicy::default();
        let capture = Capture {
            retry_count: 3,
            ..Capture::new("x")
        };
        assert!(policy.is_due(&capture, Utc::now()));
    }
}
