//! Mailgun messages API.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use herald_common::{Channel, MessageStatus};
use serde::{Deserialize, Serialize};

use crate::{
    ChannelProvider, ConfigError, DeliveryReport, OutboundContent, ProviderError, Receipt,
    SendOptions,
    http::{self, HttpSettings},
    validate,
};

const DEFAULT_NAME: &str = "mailgun";

fn default_base_url() -> String {
    "https://api.mailgun.net".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailgunConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// Regional endpoint, `https://api.eu.mailgun.net` for EU domains
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_key: String,
    pub domain: String,
    /// `From` header, e.g. `Herald <news@example.com>`
    pub from: String,
    #[serde(default)]
    pub http: HttpSettings,
}

#[derive(Debug, Serialize)]
struct SendForm<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
    #[serde(rename = "v:reference", skip_serializing_if = "Option::is_none")]
    reference: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Webhook {
    #[serde(rename = "event-data")]
    event_data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    event: String,
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    severity: Option<String>,
    message: EventMessage,
    #[serde(default, rename = "delivery-status")]
    delivery_status: Option<DeliveryStatus>,
}

#[derive(Debug, Deserialize)]
struct EventMessage {
    headers: EventHeaders,
}

#[derive(Debug, Deserialize)]
struct EventHeaders {
    #[serde(rename = "message-id")]
    message_id: String,
}

#[derive(Debug, Deserialize)]
struct DeliveryStatus {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Mailgun returns `<id@domain>`, events carry `id@domain`.
fn normalize_id(id: &str) -> String {
    id.trim().trim_start_matches('<').trim_end_matches('>').to_string()
}

#[derive(Debug)]
pub struct MailgunEmail {
    name: String,
    base_url: String,
    api_key: String,
    domain: String,
    from: String,
    client: reqwest::Client,
}

impl MailgunEmail {
    pub fn new(config: &MailgunConfig) -> Result<Self, ConfigError> {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_NAME.to_string());

        http::require(&name, "api_key", &config.api_key)?;
        http::require(&name, "domain", &config.domain)?;
        http::require(&name, "from", &config.from)?;

        Ok(Self {
            base_url: http::base_url(&name, &config.base_url)?,
            client: http::build_client(&name, &config.http)?,
            api_key: config.api_key.clone(),
            domain: config.domain.clone(),
            from: config.from.clone(),
            name,
        })
    }
}

#[async_trait]
impl ChannelProvider for MailgunEmail {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn validate_recipient(&self, address: &str) -> bool {
        validate::is_email(address)
    }

    async fn send(
        &self,
        recipient: &str,
        content: &OutboundContent,
        options: &SendOptions,
    ) -> Result<Receipt, ProviderError> {
        // Attachments need a multipart upload, which this adapter does not do
        if content.media.is_some() {
            return Err(ProviderError::validation(
                &self.name,
                "attachments are not supported by this provider",
            ));
        }

        let html = content.body.trim_start().starts_with('<');
        let form = SendForm {
            from: &self.from,
            to: recipient.trim(),
            subject: content.subject.as_deref().unwrap_or_default(),
            text: (!html).then_some(content.body.as_str()),
            html: html.then_some(content.body.as_str()),
            reference: options.reference.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/v3/{}/messages", self.base_url, self.domain))
            .basic_auth("api", Some(&self.api_key))
            .form(&form)
            .send()
            .await
            .map_err(|e| http::from_reqwest(&self.name, &e))?;

        if !response.status().is_success() {
            return Err(http::error_from_response(&self.name, response).await);
        }

        let id = http::accepted_body::<SendResponse>(&self.name, response)
            .await
            .map(|parsed| normalize_id(&parsed.id));

        Ok(Receipt {
            provider: self.name.clone(),
            provider_message_id: http::accepted_id(&self.name, id),
        })
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<Vec<DeliveryReport>, ProviderError> {
        let webhook: Webhook = serde_json::from_slice(body).map_err(|e| {
            ProviderError::validation(&self.name, format!("malformed webhook payload: {e}"))
        })?;
        let event = webhook.event_data;

        let status = match event.event.as_str() {
            "accepted" => MessageStatus::Sent,
            "delivered" => MessageStatus::Delivered,
            "opened" => MessageStatus::Read,
            // Temporary failures are retried by Mailgun itself
            "failed" if event.severity.as_deref() != Some("temporary") => MessageStatus::Failed,
            _ => return Ok(Vec::new()),
        };

        #[allow(clippy::cast_possible_truncation)]
        let timestamp = event
            .timestamp
            .and_then(|secs| Utc.timestamp_opt(secs.trunc() as i64, 0).single())
            .unwrap_or_else(Utc::now);

        let error = event
            .delivery_status
            .and_then(|s| s.description.filter(|d| !d.is_empty()).or(s.message))
            .filter(|_| status == MessageStatus::Failed);

        Ok(vec![
            DeliveryReport::new(
                normalize_id(&event.message.headers.message_id),
                status,
                timestamp,
            )
            .with_error(error),
        ])
    }
}
