//! Provider configuration as it appears in the configuration file.

use std::sync::Arc;

use herald_common::Channel;
use serde::{Deserialize, Serialize};

use crate::{
    ChannelProvider, ConfigError, FailoverChain,
    adapters::{
        CloudConfig, CloudGateway, EvolutionConfig, EvolutionGateway, MailgunConfig, MailgunEmail,
        ResendConfig, ResendEmail, SendGridConfig, SendGridEmail, TwilioConfig, TwilioSms,
        VonageConfig, VonageSms, ZenviaConfig, ZenviaSms,
    },
};

/// One entry of a channel's ordered provider list.
///
/// ```ron
/// Twilio((
///     account_sid: "AC...",
///     auth_token: "...",
///     from: "+15005550006",
/// ))
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderConfig {
    Evolution(EvolutionConfig),
    Cloud(CloudConfig),
    Twilio(TwilioConfig),
    Zenvia(ZenviaConfig),
    Vonage(VonageConfig),
    SendGrid(SendGridConfig),
    Mailgun(MailgunConfig),
    Resend(ResendConfig),
}

impl ProviderConfig {
    /// The channel this provider serves.
    pub const fn channel(&self) -> Channel {
        match self {
            Self::Evolution(_) | Self::Cloud(_) => Channel::WhatsApp,
            Self::Twilio(_) | Self::Zenvia(_) | Self::Vonage(_) => Channel::Sms,
            Self::SendGrid(_) | Self::Mailgun(_) | Self::Resend(_) => Channel::Email,
        }
    }

    /// Build the adapter this entry describes.
    pub fn build(&self) -> Result<Arc<dyn ChannelProvider>, ConfigError> {
        Ok(match self {
            Self::Evolution(config) => Arc::new(EvolutionGateway::new(config)?),
            Self::Cloud(config) => Arc::new(CloudGateway::new(config)?),
            Self::Twilio(config) => Arc::new(TwilioSms::new(config)?),
            Self::Zenvia(config) => Arc::new(ZenviaSms::new(config)?),
            Self::Vonage(config) => Arc::new(VonageSms::new(config)?),
            Self::SendGrid(config) => Arc::new(SendGridEmail::new(config)?),
            Self::Mailgun(config) => Arc::new(MailgunEmail::new(config)?),
            Self::Resend(config) => Arc::new(ResendEmail::new(config)?),
        })
    }
}

/// Build the failover chain for `channel` from its configured providers, in
/// the order given.
pub fn build_chain(
    channel: Channel,
    providers: &[ProviderConfig],
) -> Result<FailoverChain, ConfigError> {
    let providers = providers
        .iter()
        .map(ProviderConfig::build)
        .collect::<Result<Vec<_>, _>>()?;

    FailoverChain::new(channel, providers)
}
