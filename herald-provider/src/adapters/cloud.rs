//! WhatsApp Cloud (Graph) API.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use herald_common::{Channel, MessageStatus, recipient::MediaKind};
use serde::{Deserialize, Serialize};

use crate::{
    ChannelProvider, ConfigError, DeliveryReport, ErrorKind, MediaPayload, OutboundContent,
    ProviderError, Receipt, SendOptions,
    http::{self, HttpSettings},
    validate,
};

const DEFAULT_NAME: &str = "whatsapp-cloud";

fn default_base_url() -> String {
    "https://graph.facebook.com/v19.0".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub access_token: String,
    pub phone_number_id: String,
    #[serde(default)]
    pub http: HttpSettings,
}

#[derive(Debug, Serialize)]
struct Text<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct Link<'a> {
    link: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    messaging_product: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<Text<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<Link<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<Link<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video: Option<Link<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    document: Option<Link<'a>>,
}

impl<'a> SendRequest<'a> {
    const fn new(to: &'a str, kind: &'static str) -> Self {
        Self {
            messaging_product: "whatsapp",
            to,
            kind,
            text: None,
            image: None,
            audio: None,
            video: None,
            document: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct Webhook {
    #[serde(default)]
    entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
struct WebhookEntry {
    #[serde(default)]
    changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
struct WebhookChange {
    value: WebhookValue,
}

#[derive(Debug, Deserialize)]
struct WebhookValue {
    #[serde(default)]
    statuses: Vec<WebhookStatus>,
}

#[derive(Debug, Deserialize)]
struct WebhookStatus {
    id: String,
    status: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    errors: Vec<GraphError>,
}

/// Graph error codes that do not follow the HTTP status.
const fn kind_for_code(code: i64) -> Option<ErrorKind> {
    match code {
        190 => Some(ErrorKind::Auth),
        4 | 80007 | 130_429 | 131_048 | 131_056 => Some(ErrorKind::RateLimited),
        100 | 131_026 | 131_051 => Some(ErrorKind::Validation),
        _ => None,
    }
}

#[derive(Debug)]
pub struct CloudGateway {
    name: String,
    base_url: String,
    access_token: String,
    phone_number_id: String,
    client: reqwest::Client,
}

impl CloudGateway {
    pub fn new(config: &CloudConfig) -> Result<Self, ConfigError> {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_NAME.to_string());

        http::require(&name, "access_token", &config.access_token)?;
        http::require(&name, "phone_number_id", &config.phone_number_id)?;

        Ok(Self {
            base_url: http::base_url(&name, &config.base_url)?,
            client: http::build_client(&name, &config.http)?,
            access_token: config.access_token.clone(),
            phone_number_id: config.phone_number_id.clone(),
            name,
        })
    }

    fn classify(
        &self,
        status: reqwest::StatusCode,
        retry_after: Option<std::time::Duration>,
        body: &str,
    ) -> ProviderError {
        let Ok(ErrorEnvelope { error }) = serde_json::from_str::<ErrorEnvelope>(body) else {
            return http::classify_status(&self.name, status, retry_after, body);
        };

        let detail = format!("{status}: ({}) {}", error.code, error.message);
        match kind_for_code(error.code) {
            Some(ErrorKind::RateLimited) => {
                ProviderError::rate_limited(&self.name, detail, retry_after)
            }
            Some(kind) => ProviderError::new(kind, &self.name, detail),
            None => match http::kind_for_status(status) {
                ErrorKind::RateLimited => {
                    ProviderError::rate_limited(&self.name, detail, retry_after)
                }
                kind => ProviderError::new(kind, &self.name, detail),
            },
        }
    }
}

fn status_from_graph(status: &str) -> Option<MessageStatus> {
    match status {
        "sent" => Some(MessageStatus::Sent),
        "delivered" => Some(MessageStatus::Delivered),
        "read" => Some(MessageStatus::Read),
        "failed" => Some(MessageStatus::Failed),
        _ => None,
    }
}

fn unix_timestamp(value: Option<&str>) -> DateTime<Utc> {
    value
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl ChannelProvider for CloudGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel(&self) -> Channel {
        Channel::WhatsApp
    }

    fn validate_recipient(&self, address: &str) -> bool {
        validate::is_phone_number(address)
    }

    async fn send(
        &self,
        recipient: &str,
        content: &OutboundContent,
        _options: &SendOptions,
    ) -> Result<Receipt, ProviderError> {
        let to = validate::phone_digits(recipient);

        let request = match &content.media {
            None => SendRequest {
                text: Some(Text {
                    body: &content.body,
                }),
                ..SendRequest::new(&to, "text")
            },
            Some(media) => {
                let MediaPayload::Url(link) = &media.payload else {
                    return Err(ProviderError::validation(
                        &self.name,
                        "media must be a public URL for the cloud API",
                    ));
                };
                let caption = Some(content.body.as_str()).filter(|c| !c.trim().is_empty());
                match media.kind {
                    MediaKind::Image => SendRequest {
                        image: Some(Link {
                            link,
                            caption,
                            filename: None,
                        }),
                        ..SendRequest::new(&to, "image")
                    },
                    MediaKind::Video => SendRequest {
                        video: Some(Link {
                            link,
                            caption,
                            filename: None,
                        }),
                        ..SendRequest::new(&to, "video")
                    },
                    MediaKind::Audio => SendRequest {
                        audio: Some(Link {
                            link,
                            caption: None,
                            filename: None,
                        }),
                        ..SendRequest::new(&to, "audio")
                    },
                    MediaKind::Document => SendRequest {
                        document: Some(Link {
                            link,
                            caption,
                            filename: Some(&media.file_name),
                        }),
                        ..SendRequest::new(&to, "document")
                    },
                }
            }
        };

        let response = self
            .client
            .post(format!("{}/{}/messages", self.base_url, self.phone_number_id))
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| http::from_reqwest(&self.name, &e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = http::retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(self.classify(status, retry_after, &body));
        }

        let id = http::accepted_body::<SendResponse>(&self.name, response)
            .await
            .and_then(|parsed| parsed.messages.into_iter().next())
            .map(|m| m.id);
        let provider_message_id = http::accepted_id(&self.name, id);

        Ok(Receipt {
            provider: self.name.clone(),
            provider_message_id,
        })
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<Vec<DeliveryReport>, ProviderError> {
        let webhook: Webhook = serde_json::from_slice(body).map_err(|e| {
            ProviderError::validation(&self.name, format!("malformed webhook payload: {e}"))
        })?;

        Ok(webhook
            .entry
            .into_iter()
            .flat_map(|entry| entry.changes)
            .flat_map(|change| change.value.statuses)
            .filter_map(|status| {
                let next = status_from_graph(&status.status)?;
                let error = status
                    .errors
                    .first()
                    .map(|e| format!("({}) {}", e.code, e.message));
                Some(
                    DeliveryReport::new(
                        status.id,
                        next,
                        unix_timestamp(status.timestamp.as_deref()),
                    )
                    .with_error(error),
                )
            })
            .collect())
    }
}
