use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{Channel, MessageStatus, Variables, recipient::MediaKind};

use crate::{ProviderError, template};

/// Media content as handed over by the artifact store.
#[derive(Clone, PartialEq, Eq)]
pub enum MediaPayload {
    /// Publicly fetchable URL
    Url(String),
    /// Raw bytes with their MIME type
    Bytes { data: Arc<[u8]>, mime_type: String },
}

impl fmt::Debug for MediaPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Self::Bytes { data, mime_type } => f
                .debug_struct("Bytes")
                .field("len", &data.len())
                .field("mime_type", mime_type)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    pub file_name: String,
    pub payload: MediaPayload,
}

/// Fully rendered content for a single recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundContent {
    pub body: String,
    /// Subject line (email)
    pub subject: Option<String>,
    pub media: Option<MediaAttachment>,
}

impl OutboundContent {
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }
}

/// Per-send options that are not part of the content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Opaque reference echoed back by providers that support it (the
    /// message id, so webhook payloads can be traced)
    pub reference: Option<String>,
    /// "Typing" delay a chat gateway shows before delivering
    pub presence_delay_ms: Option<u64>,
}

/// A provider accepted the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub provider: String,
    pub provider_message_id: String,
}

/// A delivery status reported asynchronously by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub provider_message_id: String,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
    /// Failure reason, for `Failed` reports
    pub error: Option<String>,
}

impl DeliveryReport {
    #[must_use]
    pub fn new(
        provider_message_id: impl Into<String>,
        status: MessageStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            provider_message_id: provider_message_id.into(),
            status,
            timestamp,
            error: None,
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }
}

/// Capability every channel/provider adapter implements.
///
/// Adapters are immutable once built: a configuration change builds a new
/// adapter instead of mutating a shared one.
#[async_trait]
pub trait ChannelProvider: Send + Sync + fmt::Debug {
    /// Unique name of this provider instance (used in logs and webhook routes)
    fn name(&self) -> &str;

    fn channel(&self) -> Channel;

    /// Whether `address` is something this provider can deliver to.
    fn validate_recipient(&self, address: &str) -> bool;

    /// Render content without sending it.
    fn preview(&self, template: &str, variables: &Variables) -> String {
        template::render(template, variables)
    }

    /// Send one message. Failures are classified, see [`crate::ErrorKind`].
    async fn send(
        &self,
        recipient: &str,
        content: &OutboundContent,
        options: &SendOptions,
    ) -> Result<Receipt, ProviderError>;

    /// Parse a delivery webhook pushed by this provider.
    fn parse_webhook(&self, _body: &[u8]) -> Result<Vec<DeliveryReport>, ProviderError> {
        Ok(Vec::new())
    }

    /// Whether [`ChannelProvider::poll_status`] queries the provider.
    fn supports_polling(&self) -> bool {
        false
    }

    /// Furthest status this provider ever reports. A message that reached it
    /// is settled and not polled again.
    fn final_status(&self) -> MessageStatus {
        MessageStatus::Read
    }

    /// Ask the provider for the current status of a message.
    async fn poll_status(
        &self,
        _provider_message_id: &str,
    ) -> Result<Option<DeliveryReport>, ProviderError> {
        Ok(None)
    }
}
