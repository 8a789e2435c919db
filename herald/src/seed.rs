use chrono::{DateTime, Utc};
use herald_common::{Campaign, Channel, MediaRef, TargetSelector};
use herald_dispatch::{DispatchError, Dispatcher};
use serde::Deserialize;

/// A campaign declared in the configuration file and submitted at startup.
///
/// ```ron
/// (
///     name: "spring sale",
///     channel: Sms,
///     template: "Hi {{name}}, 20% off today",
///     target: Segment("customers"),
///     start: true,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CampaignSeed {
    pub name: String,
    pub channel: Channel,
    pub template: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub media: Option<MediaRef>,
    pub target: TargetSelector,
    /// Schedule instead of starting immediately
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Start right away; ignored when `scheduled_at` is set
    #[serde(default)]
    pub start: bool,
}

impl CampaignSeed {
    pub fn campaign(&self) -> Campaign {
        let mut campaign = Campaign::draft(
            self.name.clone(),
            self.channel,
            self.template.clone(),
            self.target.clone(),
        );
        campaign.subject.clone_from(&self.subject);
        campaign.media.clone_from(&self.media);
        campaign.scheduled_at = self.scheduled_at;
        campaign
    }

    /// Create the campaign, then schedule or start it as requested.
    pub async fn submit(&self, dispatcher: &Dispatcher) -> Result<Campaign, DispatchError> {
        let created = dispatcher.create_campaign(self.campaign()).await?;

        if self.scheduled_at.is_some() {
            dispatcher.schedule_campaign(created.id).await
        } else if self.start {
            dispatcher.start_campaign(created.id).await
        } else {
            Ok(created)
        }
    }
}
