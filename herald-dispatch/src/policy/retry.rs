//! Retry policy for provider sends.
//!
//! Retryable failures (`transport`, `rate-limited`) are re-queued with an
//! exponential backoff; rate-limited failures wait longer, or as long as the
//! provider asked if that is longer still.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Provider calls made for one message before it is failed as exhausted.
    ///
    /// Default: 5
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff (in seconds).
    ///
    /// The delay before attempt `n + 1` is `base * 2^(n - 1)`.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::base_retry_delay_secs")]
    pub base_retry_delay_secs: u64,

    /// Maximum retry delay (in seconds).
    ///
    /// Default: 3600 seconds (1 hour)
    #[serde(default = "defaults::max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,

    /// Delays are randomized within ±`retry_jitter_factor`.
    ///
    /// Default: 0.1 (±10%)
    #[serde(default = "defaults::retry_jitter_factor")]
    pub retry_jitter_factor: f64,

    /// Backoff multiplier applied when the provider throttled us.
    ///
    /// Default: 4
    #[serde(default = "defaults::rate_limit_backoff_multiplier")]
    pub rate_limit_backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_retry_delay_secs: defaults::base_retry_delay_secs(),
            max_retry_delay_secs: defaults::max_retry_delay_secs(),
            retry_jitter_factor: defaults::retry_jitter_factor(),
            rate_limit_backoff_multiplier: defaults::rate_limit_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Whether a message that has been attempted `attempt_count` times may be
    /// attempted again.
    #[must_use]
    pub const fn should_retry(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_attempts
    }

    #[must_use]
    pub const fn remaining_attempts(&self, attempt_count: u32) -> u32 {
        self.max_attempts.saturating_sub(attempt_count)
    }

    /// Delay before the next attempt of a message that has been attempted
    /// `attempt_count` times.
    ///
    /// With `rate_limited` the backoff is multiplied by
    /// `rate_limit_backoff_multiplier`, and `retry_after` wins when larger.
    #[must_use]
    pub fn next_delay(
        &self,
        attempt_count: u32,
        rate_limited: bool,
        retry_after: Option<Duration>,
    ) -> Duration {
        let delay = backoff(
            attempt_count.max(1),
            self.base_retry_delay_secs,
            self.max_retry_delay_secs,
            self.retry_jitter_factor,
        );

        if !rate_limited {
            return delay;
        }

        let extended = delay.saturating_mul(self.rate_limit_backoff_multiplier.max(1));
        retry_after.map_or(extended, |requested| requested.max(extended))
    }
}

/// Exponential backoff with jitter.
///
/// `delay = min(base * 2^(attempt - 1), max) * (1 ± jitter)`
fn backoff(
    attempt: u32,
    base_delay_secs: u64,
    max_delay_secs: u64,
    jitter_factor: f64,
) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let delay_secs = if exponent >= 63 {
        max_delay_secs
    } else {
        base_delay_secs
            .saturating_mul(1u64 << exponent)
            .min(max_delay_secs)
    };

    if jitter_factor <= 0.0 || delay_secs == 0 {
        return Duration::from_secs(delay_secs);
    }

    #[allow(clippy::cast_precision_loss)]
    let delay = delay_secs as f64;
    let jitter_range = delay * jitter_factor;
    let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);

    Duration::from_secs_f64((delay + jitter).max(0.0))
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        5
    }

    pub const fn base_retry_delay_secs() -> u64 {
        30
    }

    pub const fn max_retry_delay_secs() -> u64 {
        3600
    }

    pub const fn retry_jitter_factor() -> f64 {
        0.1
    }

    pub const fn rate_limit_backoff_multiplier() -> u32 {
        4
    }
}
