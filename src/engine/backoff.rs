//! Contention retry policy for dispatch.

use std::time::Duration;

use rand::Rng;

use crate::config::Config;

/// Bounds the retries a single dispatch call spends on a held driver lock or
/// a stale availability flag.
///
/// These retries are separate from a ride's `assignment_attempts`: they are
/// never persisted and never consume the ride's business attempt budget.
#[derive(Debug, Clone)]
pub struct ContentionPolicy {
    /// Retries allowed per dispatch call before giving up with the ride left pending.
    pub max_retries: u32,

    /// Backoff before the first retry.
    pub base_delay: Duration,

    /// Upper bound on any single backoff.
    pub max_delay: Duration,
}

impl Default for ContentionPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl ContentionPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.contention_retry_limit,
            base_delay: Duration::from_millis(config.contention_backoff_ms),
            max_delay: Duration::from_millis(config.contention_backoff_max_ms),
        }
    }

    /// Exponential ceiling for retry `retry` (1-indexed): `base * 2^(retry-1)`, capped.
    pub fn ceiling(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Full jitter: uniform in `[0, ceiling(retry)]`.
    pub fn jittered_delay(&self, retry: u32) -> Duration {
        let ceiling_ms = u64::try_from(self.ceiling(retry).as_millis()).unwrap_or(u64::MAX);
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
    }
}
