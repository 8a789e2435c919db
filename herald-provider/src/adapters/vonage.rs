//! Vonage SMS API.
//!
//! The legacy SMS endpoint answers `200 OK` for nearly everything and reports
//! throttling and credential problems per message inside the body, so the
//! body status is classified rather than the HTTP status.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use herald_common::{Channel, MessageStatus};
use serde::{Deserialize, Serialize};

use crate::{
    ChannelProvider, ConfigError, DeliveryReport, ErrorKind, OutboundContent, ProviderError,
    Receipt, SendOptions,
    http::{self, HttpSettings},
    validate,
};

const DEFAULT_NAME: &str = "vonage";

fn default_base_url() -> String {
    "https://rest.nexmo.com".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VonageConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub from: String,
    #[serde(default)]
    pub http: HttpSettings,
}

#[derive(Debug, Serialize)]
struct SendForm<'a> {
    api_key: &'a str,
    api_secret: &'a str,
    from: &'a str,
    to: &'a str,
    text: &'a str,
    #[serde(rename = "client-ref", skip_serializing_if = "Option::is_none")]
    client_ref: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<MessageResult>,
}

#[derive(Debug, Deserialize)]
struct MessageResult {
    status: String,
    #[serde(default, rename = "message-id")]
    message_id: Option<String>,
    #[serde(default, rename = "error-text")]
    error_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeliveryReceipt {
    #[serde(rename = "messageId")]
    message_id: String,
    status: String,
    #[serde(default, rename = "err-code")]
    err_code: Option<String>,
    #[serde(default, rename = "message-timestamp")]
    message_timestamp: Option<String>,
}

/// Classification of the per-message `status` field.
fn kind_for_body_status(status: &str) -> Option<ErrorKind> {
    match status {
        "0" => None,
        "1" | "9" => Some(ErrorKind::RateLimited),
        "2" | "3" | "6" | "15" | "29" => Some(ErrorKind::Validation),
        "4" | "8" => Some(ErrorKind::Auth),
        _ => Some(ErrorKind::Transport),
    }
}

fn status_from_receipt(status: &str) -> Option<MessageStatus> {
    match status {
        "accepted" | "buffered" => Some(MessageStatus::Sent),
        "delivered" => Some(MessageStatus::Delivered),
        "failed" | "rejected" | "expired" => Some(MessageStatus::Failed),
        _ => None,
    }
}

#[derive(Debug)]
pub struct VonageSms {
    name: String,
    base_url: String,
    api_key: String,
    api_secret: String,
    from: String,
    client: reqwest::Client,
}

impl VonageSms {
    pub fn new(config: &VonageConfig) -> Result<Self, ConfigError> {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_NAME.to_string());

        http::require(&name, "api_key", &config.api_key)?;
        http::require(&name, "api_secret", &config.api_secret)?;
        http::require(&name, "from", &config.from)?;

        Ok(Self {
            base_url: http::base_url(&name, &config.base_url)?,
            client: http::build_client(&name, &config.http)?,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            from: config.from.clone(),
            name,
        })
    }
}

#[async_trait]
impl ChannelProvider for VonageSms {
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
        let form = SendForm {
            api_key: &self.api_key,
            api_secret: &self.api_secret,
            from: &self.from,
            to: &to,
            text: &content.body,
            client_ref: options.reference.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/sms/json", self.base_url))
            .form(&form)
            .send()
            .await
            .map_err(|e| http::from_reqwest(&self.name, &e))?;

        if !response.status().is_success() {
            return Err(http::error_from_response(&self.name, response).await);
        }

        let result = http::accepted_body::<SendResponse>(&self.name, response)
            .await
            .and_then(|parsed| parsed.messages.into_iter().next());

        // A readable result can still report a rejection in its body
        if let Some(result) = &result
            && let Some(kind) = kind_for_body_status(&result.status)
        {
            let detail = format!(
                "status {}: {}",
                result.status,
                result.error_text.as_deref().unwrap_or("unknown error")
            );
            return Err(match kind {
                ErrorKind::RateLimited => ProviderError::rate_limited(&self.name, detail, None),
                kind => ProviderError::new(kind, &self.name, detail),
            });
        }

        let provider_message_id =
            http::accepted_id(&self.name, result.and_then(|result| result.message_id));

        Ok(Receipt {
            provider: self.name.clone(),
            provider_message_id,
        })
    }

    /// Receipts arrive either as JSON or as a form body depending on the
    /// account's webhook settings.
    fn parse_webhook(&self, body: &[u8]) -> Result<Vec<DeliveryReport>, ProviderError> {
        let receipt: DeliveryReceipt = serde_json::from_slice(body)
            .or_else(|_| serde_urlencoded::from_bytes(body))
            .map_err(|e| {
                ProviderError::validation(&self.name, format!("malformed delivery receipt: {e}"))
            })?;

        let timestamp = receipt
            .message_timestamp
            .as_deref()
            .and_then(|ts| NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S").ok())
            .map_or_else(Utc::now, |ts| ts.and_utc());

        Ok(status_from_receipt(&receipt.status)
            .map(|next| {
                let error = receipt
                    .err_code
                    .filter(|code| code != "0" && next == MessageStatus::Failed)
                    .map(|code| format!("error code {code}"));
                DeliveryReport::new(receipt.message_id, next, timestamp).with_error(error)
            })
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, method, path},
    };

    use super::*;

    fn sms(base_url: &str) -> VonageSms {
        VonageSms::new(&VonageConfig {
            name: None,
            base_url: base_url.to_string(),
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            from: "Herald".to_string(),
            http: HttpSettings::default(),
        })
        .unwrap()
    }

    async fn respond_with(body: serde_json::Value) -> Result<Receipt, ProviderError> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sms/json"))
            .and(body_string_contains("api_key=key"))
            .and(body_string_contains("to=5511999990000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;

        sms(&server.uri())
            .send(
                "+5511999990000",
                &OutboundContent::text("Promo"),
                &SendOptions::default(),
            )
            .await
    }

    #[tokio::test]
    async fn test_send_success() {
        let receipt = respond_with(serde_json::json!({
            "message-count": "1",
            "messages": [{ "to": "5511999990000", "message-id": "0A00", "status": "0" }]
        }))
        .await
        .unwrap();

        assert_eq!(receipt.provider_message_id, "0A00");
    }

    #[tokio::test]
    async fn test_throttled_in_ok_body() {
        let error = respond_with(serde_json::json!({
            "message-count": "1",
            "messages": [{ "status": "1", "error-text": "Throttled" }]
        }))
        .await
        .unwrap_err();

        assert_eq!(error.kind, ErrorKind::RateLimited);
        assert_eq!(error.detail, "status 1: Throttled");
    }

    #[tokio::test]
    async fn test_bad_credentials_in_ok_body() {
        let error = respond_with(serde_json::json!({
            "messages": [{ "status": "4", "error-text": "Bad Credentials" }]
        }))
        .await
        .unwrap_err();

        assert_eq!(error.kind, ErrorKind::Auth);
    }

    #[tokio::test]
    async fn test_invalid_destination_in_ok_body() {
        let error = respond_with(serde_json::json!({
            "messages": [{ "status": "3", "error-text": "Invalid to parameter" }]
        }))
        .await
        .unwrap_err();

        assert_eq!(error.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_parse_json_receipt() {
        let body = serde_json::json!({
            "msisdn": "5511999990000",
            "messageId": "0A00",
            "status": "delivered",
            "err-code": "0",
            "message-timestamp": "2026-01-01 00:00:00"
        });

        let reports = sms("http://localhost")
            .parse_webhook(&serde_json::to_vec(&body).unwrap())
            .unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, MessageStatus::Delivered);
        assert_eq!(reports[0].error, None);
        assert_eq!(reports[0].timestamp.timestamp(), 1_767_225_600);
    }

    #[test]
    fn test_parse_form_receipt() {
        let reports = sms("http://localhost")
            .parse_webhook(b"messageId=0A00&status=failed&err-code=6")
            .unwrap();

        assert_eq!(reports[0].status, MessageStatus::Failed);
        assert_eq!(reports[0].error.as_deref(), Some("error code 6"));
    }
}
