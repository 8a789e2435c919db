//! Webhook server configuration

use serde::Deserialize;

/// Configuration for the webhook and probe listener
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookConfig {
    /// When disabled the server is not started and delivery status is only
    /// learned by polling.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Address to bind, e.g. `[::]:8080` or `127.0.0.1:8080`
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Requests taking longer than this are answered with 408
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Largest accepted webhook body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

const fn default_enabled() -> bool {
    true
}

fn default_listen_address() -> String {
    "[::]:8080".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    5
}

const fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            listen_address: default_listen_address(),
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}
