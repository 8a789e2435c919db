//! Typed error handling for provider calls.
//!
//! Every failure coming out of an adapter is classified so the failover chain
//! and the dispatch loop can decide what to do without looking at vendor
//! specific payloads:
//! - `Transport` - connection refused, timeout, 5xx, missing endpoint; retry,
//!   try the next endpoint variant or provider
//! - `RateLimited` - 429 or a vendor throttle signal; retry after a longer wait
//! - `Auth` - rejected credentials; stops the whole campaign on this provider
//! - `Validation` - bad recipient or content; this message is never retried

use core::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    RateLimited,
    Auth,
    Validation,
}

impl ErrorKind {
    /// Whether the same send may succeed if tried again later or elsewhere.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transport | Self::RateLimited)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::RateLimited => "rate-limited",
            Self::Auth => "auth",
            Self::Validation => "validation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure reported by a provider adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} error from {provider}: {detail}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub provider: String,
    pub detail: String,
    /// Wait requested by the provider (e.g. `Retry-After`)
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    #[must_use]
    pub fn new(kind: ErrorKind, provider: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            provider: provider.into(),
            detail: detail.into(),
            retry_after: None,
        }
    }

    #[must_use]
    pub fn transport(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, provider, detail)
    }

    #[must_use]
    pub fn rate_limited(
        provider: impl Into<String>,
        detail: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        Self {
            retry_after,
            ..Self::new(ErrorKind::RateLimited, provider, detail)
        }
    }

    #[must_use]
    pub fn auth(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, provider, detail)
    }

    #[must_use]
    pub fn validation(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, provider, detail)
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Errors raised while building providers from configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Provider {provider}: missing or empty field `{field}`")]
    MissingField {
        provider: String,
        field: &'static str,
    },

    #[error("Provider {provider}: invalid base URL {url}")]
    InvalidUrl { provider: String, url: String },

    #[error("Provider {provider} serves {actual}, cannot be used for channel {expected}")]
    ChannelMismatch {
        provider: String,
        expected: herald_common::Channel,
        actual: herald_common::Channel,
    },

    #[error("No providers configured for channel {0}")]
    NoProviders(herald_common::Channel),

    #[error("Failed to build HTTP client for {provider}: {source}")]
    HttpClient {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ErrorKind::Transport.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::Auth.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let error = ProviderError::rate_limited("twilio", "429 Too Many Requests", None);
        assert_eq!(
            error.to_string(),
            "rate-limited error from twilio: 429 Too Many Requests"
        );
        assert!(error.is_retryable());

        let error = ProviderError::validation("zenvia", "invalid number");
        assert!(!error.is_retryable());
    }
}
