//! Engine configuration.

use herald_provider::ProviderConfig;
use serde::{Deserialize, Serialize};

use crate::{
    pacing::PacingConfig,
    policy::{AuthBreakerConfig, RetryPolicy},
};

const fn default_scheduler_interval() -> u64 {
    5
}

const fn default_poll_interval() -> u64 {
    60
}

const fn default_poll_max_age() -> u64 {
    72 * 60 * 60
}

const fn default_attempt_log_capacity() -> usize {
    1000
}

const fn default_shutdown_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub auth_breaker: AuthBreakerConfig,

    /// How often scheduled campaigns are checked for their start time (in
    /// seconds)
    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval_secs: u64,

    /// How often delivery status is polled from providers that support it
    /// (in seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Messages sent longer ago than this are no longer polled (in seconds)
    #[serde(default = "default_poll_max_age")]
    pub poll_max_age_secs: u64,

    /// Provider attempts kept for inspection
    #[serde(default = "default_attempt_log_capacity")]
    pub attempt_log_capacity: usize,

    /// How long shutdown waits for in-flight provider calls (in seconds)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            auth_breaker: AuthBreakerConfig::default(),
            scheduler_interval_secs: default_scheduler_interval(),
            poll_interval_secs: default_poll_interval(),
            poll_max_age_secs: default_poll_max_age(),
            attempt_log_capacity: default_attempt_log_capacity(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

/// Providers and pacing of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Providers in failover order
    pub providers: Vec<ProviderConfig>,

    #[serde(default)]
    pub pacing: PacingConfig,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: DispatchConfig = ron::from_str(
            r"(
                retry: (max_attempts: 3),
                poll_interval_secs: 15,
            )",
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_retry_delay_secs, 30);
        assert_eq!(config.poll_interval_secs, 15);
        assert_eq!(config.scheduler_interval_secs, 5);
        assert_eq!(config.auth_breaker.failure_threshold, 3);
        assert_eq!(config.attempt_log_capacity, 1000);
        assert_eq!(config.poll_max_age_secs, 72 * 60 * 60);
    }
}
