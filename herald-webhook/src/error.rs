use thiserror::Error;

/// Errors that can occur running the webhook server
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Failed to bind webhook server to {address}: {source}")]
    BindError {
        address: String,
        source: std::io::Error,
    },

    #[error("Webhook server error: {0}")]
    ServerError(String),
}
