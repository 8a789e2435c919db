use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use herald_common::{
    Campaign, CampaignId, CampaignStats, CampaignStatus, Counter, Message, MessageId,
    MessageStatus,
};

use crate::{Result, StoreError, r#trait::Store};

/// In-memory store.
///
/// Rows live in `DashMap`s, so each row is guarded by its shard lock and the
/// compare-and-swap operations are atomic per row. Used by tests and by
/// deployments that do not need campaigns to survive a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    campaigns: Arc<DashMap<CampaignId, Campaign>>,
    messages: Arc<DashMap<MessageId, Message>>,
    /// Message ids per campaign, in snapshot order
    by_campaign: Arc<DashMap<CampaignId, Vec<MessageId>>>,
    by_provider_id: Arc<DashMap<String, MessageId>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn campaign_count(&self) -> usize {
        self.campaigns.len()
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_campaign(&self, campaign: Campaign) -> Result<()> {
        match self.campaigns.entry(campaign.id) {
            Entry::Occupied(_) => Err(StoreError::CampaignExists(campaign.id)),
            Entry::Vacant(entry) => {
                entry.insert(campaign);
                Ok(())
            }
        }
    }

    async fn campaign(&self, id: CampaignId) -> Result<Campaign> {
        self.campaigns
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::CampaignNotFound(id))
    }

    async fn list_campaigns(&self, status: Option<CampaignStatus>) -> Result<Vec<Campaign>> {
        let mut campaigns: Vec<_> = self
            .campaigns
            .iter()
            .filter(|entry| status.is_none_or(|status| entry.status == status))
            .map(|entry| entry.value().clone())
            .collect();

        campaigns.sort_by_key(|campaign| campaign.id);
        Ok(campaigns)
    }

    async fn transition_campaign(
        &self,
        id: CampaignId,
        expected: &[CampaignStatus],
        next: CampaignStatus,
    ) -> Result<Campaign> {
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or(StoreError::CampaignNotFound(id))?;

        if !expected.contains(&entry.status) {
            return Err(StoreError::StatusConflict {
                campaign: id,
                expected: expected.to_vec(),
                actual: entry.status,
            });
        }

        entry.status = next;
        Ok(entry.value().clone())
    }

    async fn increment(&self, id: CampaignId, counter: Counter) -> Result<CampaignStats> {
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or(StoreError::CampaignNotFound(id))?;

        let mut stats = entry.stats;
        stats.increment(counter);
        if !stats.is_consistent() {
            tracing::error!(
                campaign = %id,
                ?counter,
                ?stats,
                "Refusing counter update that breaks campaign aggregates"
            );
            return Err(StoreError::CounterInvariant(id));
        }

        entry.stats = stats;
        Ok(stats)
    }

    async fn snapshot_messages(&self, id: CampaignId, messages: Vec<Message>) -> Result<u64> {
        let mut campaign = self
            .campaigns
            .get_mut(&id)
            .ok_or(StoreError::CampaignNotFound(id))?;

        let Entry::Vacant(slot) = self.by_campaign.entry(id) else {
            return Err(StoreError::AlreadySnapshotted(id));
        };

        let target = messages.len() as u64;
        let mut ids = Vec::with_capacity(messages.len());
        for message in messages {
            ids.push(message.id);
            self.messages.insert(message.id, message);
        }
        slot.insert(ids);

        campaign.stats.target = target;
        Ok(target)
    }

    async fn has_messages(&self, id: CampaignId) -> Result<bool> {
        Ok(self.by_campaign.contains_key(&id))
    }

    async fn message(&self, id: MessageId) -> Result<Message> {
        self.messages
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::MessageNotFound(id))
    }

    async fn list_messages(
        &self,
        campaign: CampaignId,
        status: Option<MessageStatus>,
    ) -> Result<Vec<Message>> {
        if !self.campaigns.contains_key(&campaign) {
            return Err(StoreError::CampaignNotFound(campaign));
        }

        let ids = self
            .by_campaign
            .get(&campaign)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        Ok(ids
            .iter()
            .filter_map(|id| self.messages.get(id).map(|entry| entry.value().clone()))
            .filter(|message| status.is_none_or(|status| message.status == status))
            .collect())
    }

    async fn messages_with_status(&self, statuses: &[MessageStatus]) -> Result<Vec<Message>> {
        let mut messages: Vec<_> = self
            .messages
            .iter()
            .filter(|entry| statuses.contains(&entry.status))
            .map(|entry| entry.value().clone())
            .collect();

        messages.sort_by_key(|message| (message.campaign_id, message.sequence));
        Ok(messages)
    }

    async fn swap_message(&self, expected: MessageStatus, message: Message) -> Result<bool> {
        let mut entry = self
            .messages
            .get_mut(&message.id)
            .ok_or(StoreError::MessageNotFound(message.id))?;

        if entry.status != expected {
            return Ok(false);
        }

        if !expected.can_transition_to(message.status) {
            return Err(StoreError::InvalidTransition {
                message: message.id,
                from: expected,
                to: message.status,
            });
        }

        if let Some(provider_message_id) = &message.provider_message_id
            && entry.provider_message_id.as_ref() != Some(provider_message_id)
        {
            self.by_provider_id
                .insert(provider_message_id.clone(), message.id);
        }

        *entry = message;
        Ok(true)
    }

    async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<MessageId>> {
        Ok(self
            .by_provider_id
            .get(provider_message_id)
            .map(|entry| *entry.value()))
    }
}
