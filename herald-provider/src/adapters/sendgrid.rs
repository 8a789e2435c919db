//! SendGrid v3 mail send.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{TimeZone, Utc};
use herald_common::{Channel, MessageStatus};
use serde::{Deserialize, Serialize};

use crate::{
    ChannelProvider, ConfigError, DeliveryReport, MediaPayload, OutboundContent, ProviderError,
    Receipt, SendOptions,
    http::{self, HttpSettings},
    validate,
};

const DEFAULT_NAME: &str = "sendgrid";

fn default_base_url() -> String {
    "https://api.sendgrid.com".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendGridConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_key: String,
    pub from_email: String,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default)]
    pub http: HttpSettings,
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: [Address<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_args: Option<CustomArgs<'a>>,
}

#[derive(Debug, Serialize)]
struct CustomArgs<'a> {
    reference: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct Attachment<'a> {
    content: String,
    #[serde(rename = "type")]
    mime_type: &'a str,
    filename: &'a str,
}

#[derive(Debug, Serialize)]
struct MailRequest<'a> {
    personalizations: [Personalization<'a>; 1],
    from: Address<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<Attachment<'a>>,
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(default)]
    sg_message_id: Option<String>,
    event: String,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    reason: Option<String>,
}

fn status_from_event(event: &str) -> Option<MessageStatus> {
    match event {
        "processed" => Some(MessageStatus::Sent),
        "delivered" => Some(MessageStatus::Delivered),
        "open" => Some(MessageStatus::Read),
        "bounce" | "dropped" => Some(MessageStatus::Failed),
        _ => None,
    }
}

/// Whether the body looks like HTML rather than plain text.
fn is_html(body: &str) -> bool {
    let trimmed = body.trim_start();
    trimmed.starts_with('<') && trimmed.contains("</")
}

#[derive(Debug)]
pub struct SendGridEmail {
    name: String,
    base_url: String,
    api_key: String,
    from_email: String,
    from_name: Option<String>,
    client: reqwest::Client,
}

impl SendGridEmail {
    pub fn new(config: &SendGridConfig) -> Result<Self, ConfigError> {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_NAME.to_string());

        http::require(&name, "api_key", &config.api_key)?;
        http::require(&name, "from_email", &config.from_email)?;

        Ok(Self {
            base_url: http::base_url(&name, &config.base_url)?,
            client: http::build_client(&name, &config.http)?,
            api_key: config.api_key.clone(),
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
            name,
        })
    }
}

#[async_trait]
impl ChannelProvider for SendGridEmail {
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
        let attachments = match &content.media {
            None => Vec::new(),
            Some(media) => match &media.payload {
                MediaPayload::Bytes { data, mime_type } => vec![Attachment {
                    content: STANDARD.encode(data),
                    mime_type,
                    filename: &media.file_name,
                }],
                MediaPayload::Url(_) => {
                    return Err(ProviderError::validation(
                        &self.name,
                        "attachments must be supplied as bytes",
                    ));
                }
            },
        };

        let kind = if is_html(&content.body) {
            "text/html"
        } else {
            "text/plain"
        };

        let request = MailRequest {
            personalizations: [Personalization {
                to: [Address {
                    email: recipient.trim(),
                    name: None,
                }],
                custom_args: options
                    .reference
                    .as_deref()
                    .map(|reference| CustomArgs { reference }),
            }],
            from: Address {
                email: &self.from_email,
                name: self.from_name.as_deref(),
            },
            subject: content.subject.as_deref().unwrap_or_default(),
            content: vec![Content {
                kind,
                value: &content.body,
            }],
            attachments,
        };

        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| http::from_reqwest(&self.name, &e))?;

        if !response.status().is_success() {
            return Err(http::error_from_response(&self.name, response).await);
        }

        let id = response
            .headers()
            .get("x-message-id")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let provider_message_id = http::accepted_id(&self.name, id);

        Ok(Receipt {
            provider: self.name.clone(),
            provider_message_id,
        })
    }

    /// Event webhook: a JSON array of events. `sg_message_id` extends the
    /// id returned at send time with a `.filter...` suffix.
    fn parse_webhook(&self, body: &[u8]) -> Result<Vec<DeliveryReport>, ProviderError> {
        let events: Vec<Event> = serde_json::from_slice(body).map_err(|e| {
            ProviderError::validation(&self.name, format!("malformed event payload: {e}"))
        })?;

        Ok(events
            .into_iter()
            .filter_map(|event| {
                let status = status_from_event(&event.event)?;
                let full_id = event.sg_message_id?;
                let id = full_id.split('.').next().unwrap_or(&full_id).to_string();
                let timestamp = event
                    .timestamp
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                    .unwrap_or_else(Utc::now);
                Some(
                    DeliveryReport::new(id, status, timestamp)
                        .with_error(event.reason.filter(|_| status == MessageStatus::Failed)),
                )
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use herald_common::recipient::MediaKind;
    use pretty_assertions::assert_eq;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    use super::*;
    use crate::{ErrorKind, MediaAttachment};

    fn email(base_url: &str) -> SendGridEmail {
        SendGridEmail::new(&SendGridConfig {
            name: None,
            base_url: base_url.to_string(),
            api_key: "SG.key".to_string(),
            from_email: "news@example.com".to_string(),
            from_name: Some("Herald".to_string()),
            http: HttpSettings::default(),
        })
        .unwrap()
    }

    fn content() -> OutboundContent {
        OutboundContent {
            body: "<p>Hello</p>".to_string(),
            subject: Some("Spring sale".to_string()),
            media: None,
        }
    }

    #[tokio::test]
    async fn test_send_reads_message_id_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/mail/send"))
            .and(header("authorization", "Bearer SG.key"))
            .and(body_partial_json(serde_json::json!({
                "personalizations": [{ "to": [{ "email": "ana@example.com" }] }],
                "from": { "email": "news@example.com", "name": "Herald" },
                "subject": "Spring sale",
                "content": [{ "type": "text/html", "value": "<p>Hello</p>" }]
            })))
            .respond_with(ResponseTemplate::new(202).insert_header("X-Message-Id", "sg-abc"))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = email(&server.uri())
            .send("ana@example.com", &content(), &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(receipt.provider_message_id, "sg-abc");
    }

    #[tokio::test]
    async fn test_bytes_attachment_is_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "attachments": [{
                    "content": STANDARD.encode(b"%PDF"),
                    "type": "application/pdf",
                    "filename": "catalog.pdf"
                }]
            })))
            .respond_with(ResponseTemplate::new(202).insert_header("X-Message-Id", "sg-pdf"))
            .mount(&server)
            .await;

        let mut content = content();
        content.media = Some(MediaAttachment {
            kind: MediaKind::Document,
            file_name: "catalog.pdf".to_string(),
            payload: MediaPayload::Bytes {
                data: Arc::from(&b"%PDF"[..]),
                mime_type: "application/pdf".to_string(),
            },
        });

        let receipt = email(&server.uri())
            .send("ana@example.com", &content, &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(receipt.provider_message_id, "sg-pdf");
    }

    #[tokio::test]
    async fn test_forbidden_is_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "errors": [{ "message": "access forbidden" }]
            })))
            .mount(&server)
            .await;

        let error = email(&server.uri())
            .send("ana@example.com", &content(), &SendOptions::default())
            .await
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::Auth);
    }

    #[test]
    fn test_parse_event_webhook() {
        let body = serde_json::json!([
            { "email": "ana@example.com", "event": "delivered", "timestamp": 1_767_225_600,
              "sg_message_id": "sg-abc.filterdrecv-1.0" },
            { "email": "ana@example.com", "event": "deferred", "timestamp": 1_767_225_601,
              "sg_message_id": "sg-abc.filterdrecv-1.1" },
            { "email": "bo@example.com", "event": "bounce", "timestamp": 1_767_225_602,
              "sg_message_id": "sg-def.filterdrecv-1.0", "reason": "550 mailbox unavailable" }
        ]);

        let reports = email("http://localhost")
            .parse_webhook(&serde_json::to_vec(&body).unwrap())
            .unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].provider_message_id, "sg-abc");
        assert_eq!(reports[0].status, MessageStatus::Delivered);
        assert_eq!(reports[1].provider_message_id, "sg-def");
        assert_eq!(reports[1].status, MessageStatus::Failed);
        assert_eq!(reports[1].error.as_deref(), Some("550 mailbox unavailable"));
    }
}
