//! Campaign rows and their lifecycle.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Channel, MediaRef};

/// Identifier for a campaign (ULID, sortable by creation time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(ulid::Ulid);

impl CampaignId {
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.0
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl core::str::FromStr for CampaignId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(Self)
    }
}

/// Campaign lifecycle state.
///
/// ```text
/// draft ──> scheduled ──> running <──> paused
///   │                       │
///   └───────────────────────┴──> completed | failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Completed,
    Failed,
}

impl CampaignStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a campaign is sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetSelector {
    /// Every contact of a segment
    Segment(String),
    /// A single test recipient: the explicit address when given, otherwise
    /// the first contact of the segment.
    Test {
        #[serde(default)]
        address: Option<String>,
        #[serde(default)]
        segment: Option<String>,
    },
}

impl TargetSelector {
    #[must_use]
    pub const fn is_test(&self) -> bool {
        matches!(self, Self::Test { .. })
    }
}

/// Aggregate counters kept on the campaign row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub target: u64,
    pub sent: u64,
    pub delivered: u64,
    pub read: u64,
    pub failed: u64,
    /// Accepted by the provider, later reported as undeliverable
    #[serde(default)]
    pub bounced: u64,
}

impl CampaignStats {
    /// `sent <= target`, `delivered <= sent`, `read <= delivered` and
    /// `sent + failed <= target`.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.sent <= self.target
            && self.delivered <= self.sent
            && self.read <= self.delivered
            && self.sent + self.failed <= self.target
            && self.bounced <= self.sent
    }

    /// Messages that have reached a final synchronous outcome.
    #[must_use]
    pub const fn settled(&self) -> u64 {
        self.sent + self.failed
    }

    pub const fn increment(&mut self, counter: Counter) {
        match counter {
            Counter::Sent => self.sent += 1,
            Counter::Delivered => self.delivered += 1,
            Counter::Read => self.read += 1,
            Counter::Failed => self.failed += 1,
            Counter::Bounced => self.bounced += 1,
        }
    }
}

/// A single aggregate counter, incremented atomically by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    Sent,
    Delivered,
    Read,
    Failed,
    Bounced,
}

/// A stored campaign definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub channel: Channel,
    /// Message body with `{{variable}}` placeholders
    pub template: String,
    /// Subject line template (email only)
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub media: Option<MediaRef>,
    pub target: TargetSelector,
    /// `None` means send immediately
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: CampaignStatus,
    #[serde(default)]
    pub stats: CampaignStats,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    /// Create a new draft campaign.
    #[must_use]
    pub fn draft(
        name: impl Into<String>,
        channel: Channel,
        template: impl Into<String>,
        target: TargetSelector,
    ) -> Self {
        Self {
            id: CampaignId::generate(),
            name: name.into(),
            channel,
            template: template.into(),
            subject: None,
            media: None,
            target,
            scheduled_at: None,
            status: CampaignStatus::Draft,
            stats: CampaignStats::default(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media = Some(media);
        self
    }

    #[must_use]
    pub const fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Whether the schedule time has been reached (or there is none).
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_none_or(|at| at <= now)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_stats_consistency() {
        let mut stats = CampaignStats {
            target: 3,
            ..Default::default()
        };
        assert!(stats.is_consistent());

        stats.increment(Counter::Sent);
        stats.increment(Counter::Delivered);
        stats.increment(Counter::Read);
        stats.increment(Counter::Failed);
        assert!(stats.is_consistent());
        assert_eq!(stats.settled(), 2);

        stats.increment(Counter::Read);
        assert!(!stats.is_consistent(), "read cannot exceed delivered");
    }

    #[test]
    fn test_campaign_is_due() {
        let now = Utc::now();
        let campaign = Campaign::draft(
            "launch",
            Channel::Sms,
            "Hi {{name}}",
            TargetSelector::Segment("all".into()),
        );
        assert!(campaign.is_due(now));

        let later = campaign.clone().scheduled_for(now + Duration::hours(1));
        assert!(!later.is_due(now));
        assert!(later.is_due(now + Duration::hours(2)));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(CampaignStatus::Completed.is_terminal());
        assert!(CampaignStatus::Failed.is_terminal());
        assert!(!CampaignStatus::Paused.is_terminal());
        assert!(!CampaignStatus::Running.is_terminal());
    }

    #[test]
    fn test_target_selector_from_ron() {
        let selector: TargetSelector =
            ron::from_str(r#"Test(address: Some("+5511999990000"))"#).unwrap();
        assert_eq!(
            selector,
            TargetSelector::Test {
                address: Some("+5511999990000".into()),
                segment: None,
            }
        );
        assert!(selector.is_test());
    }
}
