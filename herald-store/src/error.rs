//! Error types for the herald-store crate.

use herald_common::{CampaignId, CampaignStatus, MessageId, MessageStatus};
use thiserror::Error;

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Campaign not found: {0}")]
    CampaignNotFound(CampaignId),

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Campaign already exists: {0}")]
    CampaignExists(CampaignId),

    /// Messages are snapshotted once, when the campaign first leaves `draft`.
    #[error("Messages for campaign {0} have already been created")]
    AlreadySnapshotted(CampaignId),

    /// A campaign status compare-and-swap lost against a concurrent writer.
    #[error("Campaign {campaign} is {actual}, expected one of {expected:?}")]
    StatusConflict {
        campaign: CampaignId,
        expected: Vec<CampaignStatus>,
        actual: CampaignStatus,
    },

    /// The requested message status change is not allowed.
    #[error("Message {message} cannot move from {from} to {to}")]
    InvalidTransition {
        message: MessageId,
        from: MessageStatus,
        to: MessageStatus,
    },

    /// Applying the counter would break `read <= delivered <= sent <= target`.
    #[error("Counter update for campaign {0} would violate aggregate invariants")]
    CounterInvariant(CampaignId),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_conflict_display() {
        let campaign = CampaignId::generate();
        let err = StoreError::StatusConflict {
            campaign,
            expected: vec![CampaignStatus::Running],
            actual: CampaignStatus::Paused,
        };
        assert_eq!(
            err.to_string(),
            format!("Campaign {campaign} is paused, expected one of [Running]")
        );
    }
}
