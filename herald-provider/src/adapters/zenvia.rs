//! Zenvia SMS channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{Channel, MessageStatus};
use serde::{Deserialize, Serialize};

use crate::{
    ChannelProvider, ConfigError, DeliveryReport, OutboundContent, ProviderError, Receipt,
    SendOptions,
    http::{self, HttpSettings},
    validate,
};

const DEFAULT_NAME: &str = "zenvia";

fn default_base_url() -> String {
    "https://api.zenvia.com".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZenviaConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_token: String,
    /// Sender id registered with the account
    pub from: String,
    #[serde(default)]
    pub http: HttpSettings,
}

#[derive(Debug, Serialize)]
struct TextContent<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    contents: [TextContent<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    external_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    message_status: Option<MessageStatusBody>,
}

#[derive(Debug, Deserialize)]
struct MessageStatusBody {
    code: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    description: Option<String>,
}

fn status_from_code(code: &str) -> Option<MessageStatus> {
    match code {
        "SENT" => Some(MessageStatus::Sent),
        "DELIVERED" => Some(MessageStatus::Delivered),
        "READ" => Some(MessageStatus::Read),
        "NOT_DELIVERED" | "REJECTED" => Some(MessageStatus::Failed),
        _ => None,
    }
}

#[derive(Debug)]
pub struct ZenviaSms {
    name: String,
    base_url: String,
    api_token: String,
    from: String,
    client: reqwest::Client,
}

impl ZenviaSms {
    pub fn new(config: &ZenviaConfig) -> Result<Self, ConfigError> {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_NAME.to_string());

        http::require(&name, "api_token", &config.api_token)?;
        http::require(&name, "from", &config.from)?;

        Ok(Self {
            base_url: http::base_url(&name, &config.base_url)?,
            client: http::build_client(&name, &config.http)?,
            api_token: config.api_token.clone(),
            from: config.from.clone(),
            name,
        })
    }
}

#[async_trait]
impl ChannelProvider for ZenviaSms {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn validate_recipient(&self, address: &str) -> bool {
        validate::is_phone_number(address)
    }

    async fn send(
        &self,
        recipient: &str,
        content: &OutboundContent,
        options: &SendOptions,
    ) -> Result<Receipt, ProviderError> {
        if content.media.is_some() {
            return Err(ProviderError::validation(
                &self.name,
                "SMS channel does not carry media",
            ));
        }

        let to = validate::phone_digits(recipient);
        let request = SendRequest {
            from: &self.from,
            to: &to,
            contents: [TextContent {
                kind: "text",
                text: &content.body,
            }],
            external_id: options.reference.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/v2/channels/sms/messages", self.base_url))
            .header("X-API-TOKEN", &self.api_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| http::from_reqwest(&self.name, &e))?;

        if !response.status().is_success() {
            return Err(http::error_from_response(&self.name, response).await);
        }

        let id = http::accepted_body::<SendResponse>(&self.name, response)
            .await
            .map(|parsed| parsed.id);

        Ok(Receipt {
            provider: self.name.clone(),
            provider_message_id: http::accepted_id(&self.name, id),
        })
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<Vec<DeliveryReport>, ProviderError> {
        let event: StatusEvent = serde_json::from_slice(body).map_err(|e| {
            ProviderError::validation(&self.name, format!("malformed webhook payload: {e}"))
        })?;

        if event.kind != "MESSAGE_STATUS" {
            return Ok(Vec::new());
        }

        let (Some(id), Some(status)) = (event.message_id, event.message_status) else {
            return Ok(Vec::new());
        };

        Ok(status_from_code(&status.code)
            .map(|next| {
                DeliveryReport::new(id, next, status.timestamp.unwrap_or_else(Utc::now))
                    .with_error(status.description.filter(|_| next == MessageStatus::Failed))
            })
            .into_iter()
            .collect())
    }
}
