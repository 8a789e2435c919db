use async_trait::async_trait;
use herald_common::{
    Campaign, CampaignId, CampaignStats, CampaignStatus, Counter, Message, MessageId,
    MessageStatus,
};

use crate::Result;

/// Durable storage for campaign and message rows.
///
/// Implementations must make [`Store::transition_campaign`],
/// [`Store::swap_message`] and [`Store::increment`] atomic per row; those are
/// the only mutation paths the engine uses after a campaign is snapshotted.
#[async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
    /// Insert a new campaign row.
    async fn insert_campaign(&self, campaign: Campaign) -> Result<()>;

    async fn campaign(&self, id: CampaignId) -> Result<Campaign>;

    /// List campaigns, optionally only those in `status`.
    async fn list_campaigns(&self, status: Option<CampaignStatus>) -> Result<Vec<Campaign>>;

    /// Move a campaign to `next` if its current status is one of `expected`.
    ///
    /// Returns the updated row, or [`crate::StoreError::StatusConflict`].
    async fn transition_campaign(
        &self,
        id: CampaignId,
        expected: &[CampaignStatus],
        next: CampaignStatus,
    ) -> Result<Campaign>;

    /// Atomically increment one aggregate counter and return the new totals.
    async fn increment(&self, id: CampaignId, counter: Counter) -> Result<CampaignStats>;

    /// Create the message rows for a campaign and set its `target` counter.
    ///
    /// May only happen once per campaign.
    async fn snapshot_messages(&self, id: CampaignId, messages: Vec<Message>) -> Result<u64>;

    /// Whether the campaign's recipients have been snapshotted.
    async fn has_messages(&self, id: CampaignId) -> Result<bool>;

    async fn message(&self, id: MessageId) -> Result<Message>;

    /// Messages of a campaign in snapshot order, optionally filtered by status.
    async fn list_messages(
        &self,
        campaign: CampaignId,
        status: Option<MessageStatus>,
    ) -> Result<Vec<Message>>;

    /// Messages across all campaigns currently in one of `statuses`.
    async fn messages_with_status(&self, statuses: &[MessageStatus]) -> Result<Vec<Message>>;

    /// Replace a message row if its stored status still equals `expected`.
    ///
    /// Returns `Ok(false)` when another writer got there first. The move from
    /// `expected` to `message.status` must be a legal transition.
    async fn swap_message(&self, expected: MessageStatus, message: Message) -> Result<bool>;

    /// Look up the message a provider knows by `provider_message_id`.
    async fn find_by_provider_message_id(&self, provider_message_id: &str)
    -> Result<Option<MessageId>>;
}
