//! Read-side service trait for campaign state.
//!
//! Control surfaces (the webhook server's probes, an admin API) depend on
//! this trait instead of the concrete [`Dispatcher`].

use async_trait::async_trait;
use herald_common::{
    Campaign, CampaignId, CampaignStats, Channel, Message, MessageStatus, Variables,
};

use crate::{Dispatcher, attempts::AttemptRecord, error::DispatchError, pacing::PacingStats};

#[async_trait]
pub trait CampaignQueryService: Send + Sync {
    async fn campaign(&self, id: CampaignId) -> Result<Campaign, DispatchError>;

    /// Aggregate counters of a campaign.
    async fn campaign_stats(&self, id: CampaignId) -> Result<CampaignStats, DispatchError>;

    /// Messages of a campaign in snapshot order, optionally only those in
    /// `status`.
    async fn list_messages(
        &self,
        id: CampaignId,
        status: Option<MessageStatus>,
    ) -> Result<Vec<Message>, DispatchError>;

    /// Render `template` for `variables` the way the channel's primary
    /// provider would send it.
    fn preview_message(
        &self,
        channel: Channel,
        template: &str,
        variables: &Variables,
    ) -> Result<String, DispatchError>;

    /// Most recent provider attempts, newest first.
    fn recent_attempts(&self, limit: usize) -> Vec<AttemptRecord>;

    fn pacing_stats(&self, channel: Channel) -> Option<PacingStats>;
}

#[async_trait]
impl CampaignQueryService for Dispatcher {
    async fn campaign(&self, id: CampaignId) -> Result<Campaign, DispatchError> {
        Ok(self.store().campaign(id).await?)
    }

    async fn campaign_stats(&self, id: CampaignId) -> Result<CampaignStats, DispatchError> {
        Ok(self.store().campaign(id).await?.stats)
    }

    async fn list_messages(
        &self,
        id: CampaignId,
        status: Option<MessageStatus>,
    ) -> Result<Vec<Message>, DispatchError> {
        Ok(self.store().list_messages(id, status).await?)
    }

    fn preview_message(
        &self,
        channel: Channel,
        template: &str,
        variables: &Variables,
    ) -> Result<String, DispatchError> {
        self.chain(channel)
            .map(|chain| chain.preview(template, variables))
            .ok_or(DispatchError::ChannelUnavailable(channel))
    }

    fn recent_attempts(&self, limit: usize) -> Vec<AttemptRecord> {
        self.inner().attempts.recent(limit)
    }

    fn pacing_stats(&self, channel: Channel) -> Option<PacingStats> {
        self.pacing(channel).map(|pacing| pacing.stats())
    }
}
