//! Retry backoff policy
//!
//! The same policy drives the standalone dispatcher's `next_run_at`, the
//! brokers' delayed redelivery and the store's advisory `next_run_at` in
//! distributed mode, so every part of the system agrees on when a failed job
//! runs again.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default base delay between retries, in milliseconds.
pub const DEFAULT_BACKOFF_MS: u64 = 5_000;

/// Upper bound on a single computed delay.
const MAX_DELAY_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// Delay schedule applied between failed attempts.
///
/// Serialized as `{"type": "exponential", "delay": 5000}`, the shape a broker
/// message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackoffPolicy {
    /// Same delay before every retry
    Fixed {
        /// Delay in milliseconds
        delay: u64,
    },
    /// `delay * 2^attempts` before each retry
    Exponential {
        /// Base delay in milliseconds
        delay: u64,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(DEFAULT_BACKOFF_MS)
    }
}

impl BackoffPolicy {
    /// Create an exponential policy with the given base delay
    pub fn exponential(base_delay_ms: u64) -> Self {
        Self::Exponential {
            delay: base_delay_ms,
        }
    }

    /// Create a fixed-interval policy
    pub fn fixed(delay_ms: u64) -> Self {
        Self::Fixed { delay: delay_ms }
    }

    /// Delay before the next run of a job that has now failed `attempts` times.
    ///
    /// Keyed off the attempt count *after* the failure, so the first retry of
    /// an exponential policy waits `2 * base`.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let millis = match self {
            BackoffPolicy::Fixed { delay } => *delay,
            BackoffPolicy::Exponential { delay } => {
                let factor = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
                delay.saturating_mul(factor)
            }
        };
        Duration::milliseconds(millis.min(MAX_DELAY_MS) as i64)
    }

    /// When a job that has failed `attempts` times may run again.
    pub fn next_run_at(&self, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.delay_for(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_calculation() {
        let policy = BackoffPolicy::exponential(5_000);

        assert_eq!(policy.delay_for(0).num_milliseconds(), 5_000);
        assert_eq!(policy.delay_for(1).num_milliseconds(), 10_000);
        assert_eq!(policy.delay_for(2).num_milliseconds(), 20_000);
        assert_eq!(policy.delay_for(3).num_milliseconds(), 40_000);
    }

    #[test]
    fn test_exponential_backoff_is_strictly_increasing() {
        let policy = BackoffPolicy::default();
        let delays: Vec<i64> = (1..8).map(|n| policy.delay_for(n).num_milliseconds()).collect();
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = BackoffPolicy::exponential(5_000);
        assert_eq!(
            policy.delay_for(200).num_milliseconds(),
            MAX_DELAY_MS as i64
        );
    }

    #[test]
    fn test_fixed_backoff_calculation() {
        let policy = BackoffPolicy::fixed(250);
        assert_eq!(policy.delay_for(1).num_milliseconds(), 250);
        assert_eq!(policy.delay_for(5).num_milliseconds(), 250);
    }

    #[test]
    fn test_next_run_at() {
        let now = Utc::now();
        let policy = BackoffPolicy::exponential(100);
        assert_eq!(policy.next_run_at(2, now), now + Duration::milliseconds(400));
    }

    #[test]
    fn test_backoff_wire_format() {
        let json = serde_json::to_value(BackoffPolicy::exponential(5_000)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "exponential", "delay": 5000}));

        let parsed: BackoffPolicy =
            serde_json::from_value(serde_json::json!({"type": "fixed", "delay": 10})).unwrap();
        assert_eq!(parsed, BackoffPolicy::fixed(10));
    }
}
