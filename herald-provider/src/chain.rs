//! Ordered failover across the providers of one channel.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use herald_common::{Channel, Variables};
use thiserror::Error;

use crate::{
    ChannelProvider, ConfigError, ErrorKind, OutboundContent, ProviderError, Receipt, SendOptions,
};

/// How a single provider try ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Retryable(ErrorKind),
    Terminal(ErrorKind),
}

impl AttemptOutcome {
    const fn from_error(error: &ProviderError) -> Self {
        if error.kind.is_retryable() {
            Self::Retryable(error.kind)
        } else {
            Self::Terminal(error.kind)
        }
    }
}

/// One provider try made while sending a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAttempt {
    pub provider: String,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// A provider rejected the message or its credentials; no further
    /// providers were tried.
    #[error(transparent)]
    Terminal(ProviderError),

    /// Every provider failed with a retryable error.
    #[error("all {providers} providers failed, last: {last}")]
    Exhausted {
        providers: usize,
        last: ProviderError,
        /// Whether any provider signalled throttling
        rate_limited: bool,
        /// Largest wait any provider asked for
        retry_after: Option<Duration>,
    },
}

impl ChainError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Terminal(error) => error.kind,
            Self::Exhausted {
                rate_limited: true, ..
            } => ErrorKind::RateLimited,
            Self::Exhausted { .. } => ErrorKind::Transport,
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Terminal(error) => error.retry_after,
            Self::Exhausted { retry_after, .. } => *retry_after,
        }
    }

    /// The provider whose error decided the outcome.
    #[must_use]
    pub fn provider(&self) -> &str {
        match self {
            Self::Terminal(error) | Self::Exhausted { last: error, .. } => &error.provider,
        }
    }
}

/// The result of one logical send together with every provider try it took.
#[derive(Debug)]
pub struct ChainResult {
    pub result: Result<Receipt, ChainError>,
    pub attempts: Vec<ProviderAttempt>,
}

/// Providers of a single channel in priority order.
///
/// The chain is immutable. Reconfiguring a channel builds a new chain and
/// swaps the `Arc` holding it.
#[derive(Debug, Clone)]
pub struct FailoverChain {
    channel: Channel,
    providers: Vec<Arc<dyn ChannelProvider>>,
}

impl FailoverChain {
    /// # Errors
    ///
    /// Fails when `providers` is empty or one of them serves another channel.
    pub fn new(
        channel: Channel,
        providers: Vec<Arc<dyn ChannelProvider>>,
    ) -> Result<Self, ConfigError> {
        if providers.is_empty() {
            return Err(ConfigError::NoProviders(channel));
        }

        if let Some(provider) = providers.iter().find(|p| p.channel() != channel) {
            return Err(ConfigError::ChannelMismatch {
                provider: provider.name().to_string(),
                expected: channel,
                actual: provider.channel(),
            });
        }

        Ok(Self { channel, providers })
    }

    pub const fn channel(&self) -> Channel {
        self.channel
    }

    pub fn providers(&self) -> &[Arc<dyn ChannelProvider>] {
        &self.providers
    }

    pub fn provider(&self, name: &str) -> Option<&Arc<dyn ChannelProvider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Whether any provider in the chain accepts `address`.
    pub fn validate_recipient(&self, address: &str) -> bool {
        self.providers.iter().any(|p| p.validate_recipient(address))
    }

    /// Render with the primary provider.
    pub fn preview(&self, template: &str, variables: &Variables) -> String {
        self.providers
            .first()
            .map_or_else(String::new, |p| p.preview(template, variables))
    }

    /// Try providers in order until one accepts the message.
    ///
    /// Stops on the first success and on any `Auth` or `Validation` failure.
    pub async fn send(
        &self,
        recipient: &str,
        content: &OutboundContent,
        options: &SendOptions,
    ) -> ChainResult {
        let mut attempts = Vec::with_capacity(self.providers.len());
        let mut last: Option<ProviderError> = None;
        let mut rate_limited = false;
        let mut retry_after: Option<Duration> = None;

        for provider in &self.providers {
            let started = Instant::now();
            let at = Utc::now();

            let outcome = if provider.validate_recipient(recipient) {
                provider.send(recipient, content, options).await
            } else {
                Err(ProviderError::validation(
                    provider.name(),
                    format!("invalid recipient address {recipient:?}"),
                ))
            };

            let latency = started.elapsed();

            match outcome {
                Ok(receipt) => {
                    attempts.push(ProviderAttempt {
                        provider: provider.name().to_string(),
                        outcome: AttemptOutcome::Success,
                        latency,
                        at,
                    });
                    return ChainResult {
                        result: Ok(receipt),
                        attempts,
                    };
                }
                Err(error) => {
                    attempts.push(ProviderAttempt {
                        provider: provider.name().to_string(),
                        outcome: AttemptOutcome::from_error(&error),
                        latency,
                        at,
                    });

                    if !error.is_retryable() {
                        tracing::debug!(
                            provider = provider.name(),
                            kind = %error.kind,
                            "Provider failed terminally, not trying alternates"
                        );
                        return ChainResult {
                            result: Err(ChainError::Terminal(error)),
                            attempts,
                        };
                    }

                    tracing::debug!(
                        provider = provider.name(),
                        kind = %error.kind,
                        error = %error.detail,
                        "Provider failed, trying next in chain"
                    );

                    if error.kind == ErrorKind::RateLimited {
                        rate_limited = true;
                    }
                    retry_after = retry_after.max(error.retry_after);
                    last = Some(error);
                }
            }
        }

        let last = last.unwrap_or_else(|| {
            ProviderError::transport(self.channel.as_str(), "no providers available")
        });

        ChainResult {
            result: Err(ChainError::Exhausted {
                providers: self.providers.len(),
                last,
                rate_limited,
                retry_after,
            }),
            attempts,
        }
    }
}
