//! Per-recipient message rows.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CampaignId, Recipient};

/// Identifier for a single message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(ulid::Ulid);

impl MessageId {
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl core::str::FromStr for MessageId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(Self)
    }
}

/// Delivery state of a single message.
///
/// The success path is strictly ordered:
/// `pending -> sending -> sent -> delivered -> read`. `failed` can only be
/// entered from `pending`, `sending` or `sent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Position along the success path. `Failed` has no rank.
    #[must_use]
    pub const fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Sending => Some(1),
            Self::Sent => Some(2),
            Self::Delivered => Some(3),
            Self::Read => Some(4),
            Self::Failed => None,
        }
    }

    /// A message no longer needs work from the dispatch loop.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(
            self,
            Self::Sent | Self::Delivered | Self::Read | Self::Failed
        )
    }

    /// Whether moving from `self` to `next` is allowed.
    ///
    /// `sending -> pending` is the one backwards step: an attempt that must be
    /// retried hands the message back to the queue.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Sending, Self::Pending) => true,
            (Self::Pending | Self::Sending | Self::Sent, Self::Failed) => true,
            (_, Self::Failed) | (Self::Failed, _) => false,
            (current, next) => match (current.rank(), next.rank()) {
                (Some(current), Some(next)) => next > current,
                _ => false,
            },
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown message status: {other}")),
        }
    }
}

/// One message per recipient per campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub campaign_id: CampaignId,
    /// Position in the campaign's recipient snapshot
    pub sequence: u32,
    pub recipient: Recipient,
    /// Rendered body, filled in when the message is first attempted
    #[serde(default)]
    pub content: Option<String>,
    pub status: MessageStatus,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Number of provider attempts made so far
    #[serde(default)]
    pub attempts: u32,
    /// Earliest time the next attempt may be made (backoff)
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a pending message for a recipient snapshot entry.
    #[must_use]
    pub fn pending(campaign_id: CampaignId, sequence: u32, recipient: Recipient) -> Self {
        Self {
            id: MessageId::generate(),
            campaign_id,
            sequence,
            recipient,
            content: None,
            status: MessageStatus::Pending,
            provider: None,
            provider_message_id: None,
            error: None,
            attempts: 0,
            next_attempt_at: None,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            failed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_path_is_monotonic() {
        use MessageStatus::{Delivered, Pending, Read, Sending, Sent};

        assert!(Pending.can_transition_to(Sending));
        assert!(Sending.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Delivered));
        assert!(Delivered.can_transition_to(Read));
        assert!(Sent.can_transition_to(Read));

        assert!(!Delivered.can_transition_to(Sent));
        assert!(!Read.can_transition_to(Delivered));
        assert!(!Sent.can_transition_to(Sent));
    }

    #[test]
    fn test_failed_reachability() {
        use MessageStatus::{Delivered, Failed, Pending, Read, Sending, Sent};

        assert!(Pending.can_transition_to(Failed));
        assert!(Sending.can_transition_to(Failed));
        assert!(Sent.can_transition_to(Failed));
        assert!(!Delivered.can_transition_to(Failed));
        assert!(!Read.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Sent));
    }

    #[test]
    fn test_retry_hands_back_to_pending() {
        assert!(MessageStatus::Sending.can_transition_to(MessageStatus::Pending));
        assert!(!MessageStatus::Sent.can_transition_to(MessageStatus::Pending));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&MessageStatus::Delivered).ok().as_deref(),
            Some("\"delivered\"")
        );
        assert_eq!("READ".parse::<MessageStatus>(), Ok(MessageStatus::Read));
    }
}
