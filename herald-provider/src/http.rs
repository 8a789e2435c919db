//! HTTP plumbing shared by the adapters.

use std::time::Duration;

use reqwest::{StatusCode, header::HeaderMap};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use ulid::Ulid;

use crate::{ConfigError, ErrorKind, ProviderError};

const MAX_DETAIL_LEN: usize = 300;

/// Prefix of the ids recorded for sends a provider accepted without naming
/// the id it assigned. No status event or poll can match one.
pub const UNCONFIRMED_ID_PREFIX: &str = "unconfirmed:";

/// Whether `provider_message_id` was made up locally for an accepted send.
#[must_use]
pub fn is_unconfirmed(provider_message_id: &str) -> bool {
    provider_message_id.starts_with(UNCONFIRMED_ID_PREFIX)
}

/// Timeouts applied to every call a provider makes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Bound on the whole request, response body included
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

pub(crate) fn build_client(
    provider: &str,
    settings: &HttpSettings,
) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .user_agent(concat!("herald/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|source| ConfigError::HttpClient {
            provider: provider.to_string(),
            source,
        })
}

/// Normalise a configured base URL (no trailing slash).
pub(crate) fn base_url(provider: &str, url: &str) -> Result<String, ConfigError> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.to_string())
    } else {
        Err(ConfigError::InvalidUrl {
            provider: provider.to_string(),
            url: url.to_string(),
        })
    }
}

pub(crate) fn require(
    provider: &str,
    field: &'static str,
    value: &str,
) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::MissingField {
            provider: provider.to_string(),
            field,
        })
    } else {
        Ok(())
    }
}

/// A failed request never reached a usable response: always `Transport`.
pub(crate) fn from_reqwest(provider: &str, error: &reqwest::Error) -> ProviderError {
    let detail = if error.is_timeout() {
        format!("request timed out: {error}")
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else if error.is_decode() {
        format!("unreadable response body: {error}")
    } else {
        format!("request failed: {error}")
    };
    ProviderError::transport(provider, detail)
}

/// Decode the body of a 2xx send response.
///
/// The provider has taken the message by now, so an unreadable body is
/// logged and yields `None` instead of an error that would send it again.
pub(crate) async fn accepted_body<T: DeserializeOwned>(
    provider: &str,
    response: reqwest::Response,
) -> Option<T> {
    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(error) => {
            tracing::warn!(provider, %status, error = %error, "Accepted send with unreadable body");
            return None;
        }
    };

    serde_json::from_str(&body)
        .inspect_err(|error| {
            tracing::warn!(
                provider,
                %status,
                error = %error,
                body = %truncate(body.trim()),
                "Accepted send with undecodable body"
            );
        })
        .ok()
}

/// The provider's id for an accepted send, or an unconfirmed one when the
/// response did not carry it.
pub(crate) fn accepted_id(provider: &str, id: Option<String>) -> String {
    match id.filter(|id| !id.trim().is_empty()) {
        Some(id) => id,
        None => {
            let id = format!("{UNCONFIRMED_ID_PREFIX}{provider}:{}", Ulid::new());
            tracing::warn!(
                provider,
                provider_message_id = id.as_str(),
                "Provider accepted the send without a message id, status updates cannot be matched"
            );
            id
        }
    }
}

/// Seconds from a `Retry-After` header, when given as a number.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Classification of a non-success HTTP status.
pub(crate) const fn kind_for_status(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        401 | 403 => ErrorKind::Auth,
        429 => ErrorKind::RateLimited,
        // Wrong path or payload shape for this gateway version
        404 | 405 | 415 | 501 => ErrorKind::Transport,
        400..=499 => ErrorKind::Validation,
        _ => ErrorKind::Transport,
    }
}

pub(crate) fn truncate(body: &str) -> String {
    if body.len() <= MAX_DETAIL_LEN {
        return body.to_string();
    }
    let mut end = MAX_DETAIL_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

pub(crate) fn classify_status(
    provider: &str,
    status: StatusCode,
    retry_after: Option<std::time::Duration>,
    body: &str,
) -> ProviderError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", truncate(body.trim()))
    };

    match kind_for_status(status) {
        ErrorKind::RateLimited => ProviderError::rate_limited(provider, detail, retry_after),
        kind => ProviderError::new(kind, provider, detail),
    }
}

/// Drain a non-success response into a classified error.
pub(crate) async fn error_from_response(
    provider: &str,
    response: reqwest::Response,
) -> ProviderError {
    let status = response.status();
    let retry_after = retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    classify_status(provider, status, retry_after, &body)
}
