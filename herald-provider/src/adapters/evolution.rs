//! Self-hosted WhatsApp gateway.
//!
//! Gateway releases disagree on paths and payload layout, so every operation
//! is described as a list of [`EndpointVariant`]s tried in order: the current
//! API first, then the 1.x layout, then the legacy single endpoint.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use herald_common::{Channel, MessageStatus, recipient::MediaKind};
use serde::{Deserialize, Serialize};

use crate::{
    ChannelProvider, ConfigError, DeliveryReport, EndpointVariant, MediaAttachment, MediaPayload,
    OutboundContent, ProviderError, Receipt, SendOptions, attempt_variants, expand_path,
    http::{self, HttpSettings},
    validate,
};

const DEFAULT_NAME: &str = "evolution";

/// Phrases a gateway uses when the payload does not match its schema.
const SCHEMA_MISMATCH: [&str; 4] = [
    "requires property",
    "is not allowed",
    "additional properties",
    "instance requires",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvolutionConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub base_url: String,
    pub api_key: String,
    pub instance: String,
    /// "Typing" delay when a send does not ask for one
    #[serde(default)]
    pub presence_delay_ms: Option<u64>,
    #[serde(default)]
    pub http: HttpSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextShape {
    V2,
    V1,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaShape {
    V2,
    V1,
}

const TEXT_VARIANTS: [EndpointVariant<TextShape>; 3] = [
    EndpointVariant::new("/message/sendText/{instance}", TextShape::V2),
    EndpointVariant::new("/message/sendText/{instance}", TextShape::V1),
    EndpointVariant::new("/api/{instance}/send-message", TextShape::Legacy),
];

const MEDIA_VARIANTS: [EndpointVariant<MediaShape>; 2] = [
    EndpointVariant::new("/message/sendMedia/{instance}", MediaShape::V2),
    EndpointVariant::new("/message/sendMedia/{instance}", MediaShape::V1),
];

const AUDIO_VARIANTS: [EndpointVariant<MediaShape>; 2] = [
    EndpointVariant::new("/message/sendWhatsAppAudio/{instance}", MediaShape::V2),
    EndpointVariant::new("/message/sendWhatsAppAudio/{instance}", MediaShape::V1),
];

#[derive(Debug, Serialize)]
struct DelayOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    delay: Option<u64>,
}

#[derive(Debug, Serialize)]
struct TextMessage<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum TextRequest<'a> {
    V2 {
        number: &'a str,
        text: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        delay: Option<u64>,
    },
    V1 {
        number: &'a str,
        #[serde(rename = "textMessage")]
        text_message: TextMessage<'a>,
        options: DelayOptions,
    },
    Legacy {
        phone: &'a str,
        message: &'a str,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaBody<'a> {
    mediatype: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mimetype: Option<&'a str>,
    #[serde(skip_serializing_if = "str::is_empty")]
    caption: &'a str,
    media: &'a str,
    file_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MediaRequest<'a> {
    V2 {
        number: &'a str,
        #[serde(flatten)]
        body: MediaBody<'a>,
        #[serde(skip_serializing_if = "Option::is_none")]
        delay: Option<u64>,
    },
    V1 {
        number: &'a str,
        #[serde(rename = "mediaMessage")]
        media_message: MediaBody<'a>,
        options: DelayOptions,
    },
}

#[derive(Debug, Serialize)]
struct AudioMessage<'a> {
    audio: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AudioRequest<'a> {
    V2 {
        number: &'a str,
        audio: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        delay: Option<u64>,
    },
    V1 {
        number: &'a str,
        #[serde(rename = "audioMessage")]
        audio_message: AudioMessage<'a>,
        options: DelayOptions,
    },
}

#[derive(Debug, Deserialize)]
struct MessageKey {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    key: Option<MessageKey>,
    #[serde(default, rename = "messageId")]
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    #[serde(default)]
    date_time: Option<DateTime<Utc>>,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WebhookData {
    Many(Vec<StatusUpdate>),
    One(StatusUpdate),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusUpdate {
    #[serde(default)]
    key_id: Option<String>,
    #[serde(default)]
    key: Option<MessageKey>,
    #[serde(default)]
    status: Option<String>,
}

/// A WhatsApp number attached to a self-hosted gateway instance.
#[derive(Debug)]
pub struct EvolutionGateway {
    name: String,
    base_url: String,
    api_key: String,
    instance: String,
    presence_delay_ms: Option<u64>,
    client: reqwest::Client,
}

impl EvolutionGateway {
    pub fn new(config: &EvolutionConfig) -> Result<Self, ConfigError> {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_NAME.to_string());

        http::require(&name, "api_key", &config.api_key)?;
        http::require(&name, "instance", &config.instance)?;

        Ok(Self {
            base_url: http::base_url(&name, &config.base_url)?,
            client: http::build_client(&name, &config.http)?,
            api_key: config.api_key.clone(),
            instance: config.instance.clone(),
            presence_delay_ms: config.presence_delay_ms,
            name,
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.base_url,
            expand_path(path, &[("instance", &self.instance)])
        )
    }

    async fn post<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(self.url(path))
            .header("apikey", &self.api_key)
            .json(body)
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
            .and_then(|parsed| parsed.key.map(|key| key.id).or(parsed.message_id));
        Ok(http::accepted_id(&self.name, id))
    }

    fn classify(
        &self,
        status: reqwest::StatusCode,
        retry_after: Option<std::time::Duration>,
        body: &str,
    ) -> ProviderError {
        if status == reqwest::StatusCode::BAD_REQUEST {
            let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
            if compact.contains("\"exists\":false") {
                return ProviderError::validation(&self.name, "number is not on WhatsApp");
            }

            let lowered = body.to_ascii_lowercase();
            if SCHEMA_MISMATCH.iter().any(|phrase| lowered.contains(phrase)) {
                return ProviderError::transport(
                    &self.name,
                    format!("payload shape rejected: {}", http::truncate(body.trim())),
                );
            }
        }

        http::classify_status(&self.name, status, retry_after, body)
    }

    async fn send_text(
        &self,
        number: &str,
        text: &str,
        delay: Option<u64>,
    ) -> Result<String, ProviderError> {
        attempt_variants(&self.name, &TEXT_VARIANTS, |variant| async move {
            let body = match variant.shape {
                TextShape::V2 => TextRequest::V2 {
                    number,
                    text,
                    delay,
                },
                TextShape::V1 => TextRequest::V1 {
                    number,
                    text_message: TextMessage { text },
                    options: DelayOptions { delay },
                },
                TextShape::Legacy => TextRequest::Legacy {
                    phone: number,
                    message: text,
                },
            };
            self.post(variant.path, &body).await
        })
        .await
    }

    async fn send_media(
        &self,
        number: &str,
        caption: &str,
        media: &MediaAttachment,
        delay: Option<u64>,
    ) -> Result<String, ProviderError> {
        let (encoded, mimetype) = match &media.payload {
            MediaPayload::Url(url) => (url.clone(), None),
            MediaPayload::Bytes { data, mime_type } => {
                (STANDARD.encode(data), Some(mime_type.as_str()))
            }
        };
        let encoded = encoded.as_str();

        if media.kind == MediaKind::Audio {
            let id = attempt_variants(&self.name, &AUDIO_VARIANTS, |variant| async move {
                let body = match variant.shape {
                    MediaShape::V2 => AudioRequest::V2 {
                        number,
                        audio: encoded,
                        delay,
                    },
                    MediaShape::V1 => AudioRequest::V1 {
                        number,
                        audio_message: AudioMessage { audio: encoded },
                        options: DelayOptions { delay },
                    },
                };
                self.post(variant.path, &body).await
            })
            .await?;

            // Voice notes carry no caption, the text follows separately. The
            // note is delivered already, so a failed caption must not fail
            // the send.
            if !caption.trim().is_empty()
                && let Err(error) = self.send_text(number, caption, None).await
            {
                tracing::warn!(
                    provider = self.name.as_str(),
                    provider_message_id = id.as_str(),
                    error = %error,
                    "Voice note sent, its caption was not"
                );
            }
            return Ok(id);
        }

        let mediatype = match media.kind {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio | MediaKind::Document => "document",
        };
        let file_name = media.file_name.as_str();

        attempt_variants(&self.name, &MEDIA_VARIANTS, |variant| async move {
            let body = MediaBody {
                mediatype,
                mimetype,
                caption,
                media: encoded,
                file_name,
            };
            let request = match variant.shape {
                MediaShape::V2 => MediaRequest::V2 {
                    number,
                    body,
                    delay,
                },
                MediaShape::V1 => MediaRequest::V1 {
                    number,
                    media_message: body,
                    options: DelayOptions { delay },
                },
            };
            self.post(variant.path, &request).await
        })
        .await
    }
}

fn status_from_ack(status: &str) -> Option<MessageStatus> {
    match status.to_ascii_uppercase().as_str() {
        "SERVER_ACK" | "SENT" => Some(MessageStatus::Sent),
        "DELIVERY_ACK" | "DELIVERED" => Some(MessageStatus::Delivered),
        "READ" | "PLAYED" => Some(MessageStatus::Read),
        "ERROR" | "FAILED" => Some(MessageStatus::Failed),
        _ => None,
    }
}

#[async_trait]
impl ChannelProvider for EvolutionGateway {
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
        options: &SendOptions,
    ) -> Result<Receipt, ProviderError> {
        let number = validate::phone_digits(recipient);
        let delay = options.presence_delay_ms.or(self.presence_delay_ms);

        let provider_message_id = match &content.media {
            Some(media) => self.send_media(&number, &content.body, media, delay).await?,
            None => self.send_text(&number, &content.body, delay).await?,
        };

        Ok(Receipt {
            provider: self.name.clone(),
            provider_message_id,
        })
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<Vec<DeliveryReport>, ProviderError> {
        let event: WebhookEvent = serde_json::from_slice(body).map_err(|e| {
            ProviderError::validation(&self.name, format!("malformed webhook payload: {e}"))
        })?;

        if !event.event.eq_ignore_ascii_case("messages.update") {
            return Ok(Vec::new());
        }

        let timestamp = event.date_time.unwrap_or_else(Utc::now);
        let updates = match event.data {
            WebhookData::Many(updates) => updates,
            WebhookData::One(update) => vec![update],
        };

        Ok(updates
            .into_iter()
            .filter_map(|update| {
                let id = update.key_id.or_else(|| update.key.map(|key| key.id))?;
                let status = status_from_ack(update.status.as_deref()?)?;
                Some(DeliveryReport::new(id, status, timestamp))
            })
            .collect())
    }
}
