use serde::{Deserialize, Serialize};

/// Template variables for a single recipient.
pub type Variables = ahash::AHashMap<String, String>;

/// A resolved recipient: the channel address plus the variables used to
/// render its copy of the campaign template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Phone number or email address, depending on the channel
    pub address: String,
    #[serde(default)]
    pub variables: Variables,
}

impl Recipient {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            variables: Variables::default(),
        }
    }

    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Address normalised for de-duplication (trimmed, lowercased).
    #[must_use]
    pub fn dedup_key(&self) -> String {
        self.address.trim().to_ascii_lowercase()
    }
}

/// Kind of pre-rendered artifact attached to a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

/// Reference into the media/audio artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub reference: String,
}
