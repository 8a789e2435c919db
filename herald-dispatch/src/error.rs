//! Typed error handling for campaign control and dispatch.
//!
//! Message-level send failures never surface here: they are recorded on the
//! message row. These types cover operator requests that cannot be honoured
//! and failures of the engine's collaborators.

use herald_common::{CampaignId, CampaignStatus, Channel};
use herald_provider::ConfigError;
use herald_store::StoreError;
use thiserror::Error;

use crate::{media::MediaError, resolver::ResolveError};

/// Top-level dispatch error type.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A control operation is not allowed in the campaign's current state.
    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A channel's provider configuration could not be built.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// No provider chain is configured for the channel.
    #[error("No providers configured for channel {0}")]
    ChannelUnavailable(Channel),

    #[error("Recipient resolution failed: {0}")]
    Resolution(#[from] ResolveError),

    #[error("Media resolution failed: {0}")]
    Media(#[from] MediaError),
}

/// Rejected campaign control requests.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Cannot {operation} campaign {campaign} while it is {status}")]
    InvalidTransition {
        campaign: CampaignId,
        operation: &'static str,
        status: CampaignStatus,
    },

    /// The campaign's target resolved to nobody.
    #[error("Campaign {0} has no recipients")]
    NoRecipients(CampaignId),

    /// Scheduling needs a send time in the future.
    #[error("Campaign {campaign} cannot be scheduled: {reason}")]
    NotSchedulable {
        campaign: CampaignId,
        reason: &'static str,
    },
}

impl DispatchError {
    /// Whether the request was refused because of campaign state, as opposed
    /// to an engine failure.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Control(_))
    }
}
