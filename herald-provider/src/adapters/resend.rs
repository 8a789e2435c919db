//! Resend email API.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use herald_common::{Channel, MessageStatus};
use serde::{Deserialize, Serialize};

use crate::{
    ChannelProvider, ConfigError, DeliveryReport, MediaPayload, OutboundContent, ProviderError,
    Receipt, SendOptions,
    http::{self, HttpSettings},
    validate,
};

const DEFAULT_NAME: &str = "resend";

fn default_base_url() -> String {
    "https://api.resend.com".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResendConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_key: String,
    pub from: String,
    #[serde(default)]
    pub http: HttpSettings,
}

#[derive(Debug, Serialize)]
struct Attachment<'a> {
    filename: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Tag<'a> {
    name: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<Attachment<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<Tag<'a>>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct EmailResource {
    id: String,
    #[serde(default)]
    last_event: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    email_id: String,
    #[serde(default)]
    bounce: Option<Bounce>,
}

#[derive(Debug, Deserialize)]
struct Bounce {
    #[serde(default)]
    message: Option<String>,
}

fn status_from_event(event: &str) -> Option<MessageStatus> {
    match event {
        "sent" => Some(MessageStatus::Sent),
        "delivered" => Some(MessageStatus::Delivered),
        "opened" | "clicked" => Some(MessageStatus::Read),
        "bounced" | "complained" | "failed" => Some(MessageStatus::Failed),
        _ => None,
    }
}

#[derive(Debug)]
pub struct ResendEmail {
    name: String,
    base_url: String,
    api_key: String,
    from: String,
    client: reqwest::Client,
}

impl ResendEmail {
    pub fn new(config: &ResendConfig) -> Result<Self, ConfigError> {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_NAME.to_string());

        http::require(&name, "api_key", &config.api_key)?;
        http::require(&name, "from", &config.from)?;

        Ok(Self {
            base_url: http::base_url(&name, &config.base_url)?,
            client: http::build_client(&name, &config.http)?,
            api_key: config.api_key.clone(),
            from: config.from.clone(),
            name,
        })
    }
}

#[async_trait]
impl ChannelProvider for ResendEmail {
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
        let attachments = content
            .media
            .iter()
            .map(|media| match &media.payload {
                MediaPayload::Url(url) => Attachment {
                    filename: &media.file_name,
                    content: None,
                    path: Some(url.as_str()),
                },
                MediaPayload::Bytes { data, .. } => Attachment {
                    filename: &media.file_name,
                    content: Some(STANDARD.encode(data)),
                    path: None,
                },
            })
            .collect();

        let html = content.body.trim_start().starts_with('<');
        let request = EmailRequest {
            from: &self.from,
            to: [recipient.trim()],
            subject: content.subject.as_deref().unwrap_or_default(),
            html: html.then_some(content.body.as_str()),
            text: (!html).then_some(content.body.as_str()),
            attachments,
            tags: options
                .reference
                .as_deref()
                .map(|value| Tag {
                    name: "reference",
                    value,
                })
                .into_iter()
                .collect(),
        };

        let response = self
            .client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(&self.api_key)
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
        let event: WebhookEvent = serde_json::from_slice(body).map_err(|e| {
            ProviderError::validation(&self.name, format!("malformed webhook payload: {e}"))
        })?;

        let Some(status) = event
            .kind
            .strip_prefix("email.")
            .and_then(status_from_event)
        else {
            return Ok(Vec::new());
        };

        let error = event
            .data
            .bounce
            .and_then(|bounce| bounce.message)
            .or_else(|| (status == MessageStatus::Failed).then(|| event.kind.clone()));

        Ok(vec![
            DeliveryReport::new(
                event.data.email_id,
                status,
                event.created_at.unwrap_or_else(Utc::now),
            )
            .with_error(error),
        ])
    }

    fn supports_polling(&self) -> bool {
        true
    }

    async fn poll_status(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<DeliveryReport>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/emails/{provider_message_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| http::from_reqwest(&self.name, &e))?;

        if !response.status().is_success() {
            return Err(http::error_from_response(&self.name, response).await);
        }

        let email: EmailResource = response
            .json()
            .await
            .map_err(|e| http::from_reqwest(&self.name, &e))?;

        Ok(email
            .last_event
            .as_deref()
            .and_then(status_from_event)
            .map(|status| DeliveryReport::new(email.id, status, Utc::now())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use herald_common::recipient::MediaKind;
    use pretty_assertions::assert_eq;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    use super::*;
    use crate::{ErrorKind, MediaAttachment};

    fn email(base_url: &str) -> ResendEmail {
        ResendEmail::new(&ResendConfig {
            name: None,
            base_url: base_url.to_string(),
            api_key: "re_123".to_string(),
            from: "news@example.com".to_string(),
            http: HttpSettings::default(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_send_with_url_attachment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(header("authorization", "Bearer re_123"))
            .and(body_partial_json(serde_json::json!({
                "from": "news@example.com",
                "to": ["ana@example.com"],
                "subject": "Hi",
                "text": "Hello",
                "attachments": [{ "filename": "menu.pdf", "path": "https://cdn.example.com/menu.pdf" }]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "re-1" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let content = OutboundContent {
            body: "Hello".to_string(),
            subject: Some("Hi".to_string()),
            media: Some(MediaAttachment {
                kind: MediaKind::Document,
                file_name: "menu.pdf".to_string(),
                payload: MediaPayload::Url("https://cdn.example.com/menu.pdf".to_string()),
            }),
        };

        let receipt = email(&server.uri())
            .send("ana@example.com", &content, &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(receipt.provider_message_id, "re-1");
    }

    #[tokio::test]
    async fn test_unprocessable_is_validation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "statusCode": 422,
                "name": "validation_error",
                "message": "Invalid `to` field."
            })))
            .mount(&server)
            .await;

        let error = email(&server.uri())
            .send(
                "ana@example.com",
                &OutboundContent::text("Hello"),
                &SendOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_poll_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/emails/re-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "object": "email",
                "id": "re-1",
                "last_event": "opened"
            })))
            .mount(&server)
            .await;

        let report = email(&server.uri())
            .poll_status("re-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.status, MessageStatus::Read);
    }

    #[test]
    fn test_parse_bounce_webhook() {
        let body = serde_json::json!({
            "type": "email.bounced",
            "created_at": "2026-03-01T10:00:00Z",
            "data": {
                "email_id": "re-1",
                "to": ["ana@example.com"],
                "bounce": { "message": "Mailbox full" }
            }
        });

        let reports = email("http://localhost")
            .parse_webhook(&serde_json::to_vec(&body).unwrap())
            .unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, MessageStatus::Failed);
        assert_eq!(reports[0].error.as_deref(), Some("Mailbox full"));
    }

    #[test]
    fn test_unrelated_event_is_ignored() {
        let body = br#"{"type":"contact.created","data":{"email_id":"x"}}"#;
        assert!(email("http://localhost").parse_webhook(body).unwrap().is_empty());
    }
}
