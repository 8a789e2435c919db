//! Shared types for the Herald campaign dispatcher.
//!
//! Everything the dispatch engine, the providers and the store agree on lives
//! here: campaign and message rows, channels, recipients and the logging
//! setup used by the binary.

pub mod campaign;
pub mod channel;
pub mod logging;
pub mod message;
pub mod recipient;

pub use campaign::{Campaign, CampaignId, CampaignStats, CampaignStatus, Counter, TargetSelector};
pub use channel::{Channel, ParseChannelError};
pub use logging::LoggingConfig;
pub use message::{Message, MessageId, MessageStatus};
pub use recipient::{MediaRef, Recipient, Variables};
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
