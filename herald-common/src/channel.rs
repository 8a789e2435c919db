use core::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outbound medium a campaign is delivered over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Chat-messaging gateway
    WhatsApp,
    Sms,
    Email,
}

impl Channel {
    pub const ALL: [Self; 3] = [Self::WhatsApp, Self::Sms, Self::Email];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WhatsApp => "whatsapp",
            Self::Sms => "sms",
            Self::Email => "email",
        }
    }

    /// Whether recipients on this channel are addressed by phone number.
    #[must_use]
    pub const fn uses_phone_numbers(self) -> bool {
        matches!(self, Self::WhatsApp | Self::Sms)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown channel: {0}")]
pub struct ParseChannelError(pub String);

impl FromStr for Channel {
    type Err = ParseChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "whatsapp" => Ok(Self::WhatsApp),
            "sms" => Ok(Self::Sms),
            "email" => Ok(Self::Email),
            other => Err(ParseChannelError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_round_trips_through_str() {
        for channel in Channel::ALL {
            assert_eq!(channel.as_str().parse::<Channel>(), Ok(channel));
        }
        assert_eq!("SMS".parse::<Channel>(), Ok(Channel::Sms));
        assert!("fax".parse::<Channel>().is_err());
    }

    #[test]
    fn test_channel_addressing() {
        assert!(Channel::WhatsApp.uses_phone_numbers());
        assert!(Channel::Sms.uses_phone_numbers());
        assert!(!Channel::Email.uses_phone_numbers());
    }
}
