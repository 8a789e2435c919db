//! Twilio programmable messaging (SMS).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{Channel, MessageStatus};
use serde::{Deserialize, Serialize};

use crate::{
    ChannelProvider, ConfigError, DeliveryReport, ErrorKind, MediaPayload, OutboundContent,
    ProviderError, Receipt, SendOptions,
    http::{self, HttpSettings},
    validate,
};

const DEFAULT_NAME: &str = "twilio";

fn default_base_url() -> String {
    "https://api.twilio.com".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwilioConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number; either this or `messaging_service_sid` is required
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub messaging_service_sid: Option<String>,
    /// URL Twilio posts status changes to
    #[serde(default)]
    pub status_callback: Option<String>,
    #[serde(default)]
    pub http: HttpSettings,
}

#[derive(Debug, Clone)]
enum Sender {
    Number(String),
    Service(String),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendForm<'a> {
    to: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    messaging_service_sid: Option<&'a str>,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_callback: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    date_updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatusCallback {
    message_sid: String,
    message_status: String,
    #[serde(default)]
    error_code: Option<String>,
}

const fn kind_for_code(code: i64) -> Option<ErrorKind> {
    match code {
        // Invalid "To", unreachable destination, unsubscribed recipient
        21211 | 21614 | 21610 | 21408 => Some(ErrorKind::Validation),
        20003 => Some(ErrorKind::Auth),
        20429 | 14107 => Some(ErrorKind::RateLimited),
        _ => None,
    }
}

fn status_from_twilio(status: &str) -> Option<MessageStatus> {
    match status {
        "sent" => Some(MessageStatus::Sent),
        "delivered" => Some(MessageStatus::Delivered),
        "read" => Some(MessageStatus::Read),
        "failed" | "undelivered" => Some(MessageStatus::Failed),
        _ => None,
    }
}

#[derive(Debug)]
pub struct TwilioSms {
    name: String,
    base_url: String,
    account_sid: String,
    auth_token: String,
    sender: Sender,
    status_callback: Option<String>,
    client: reqwest::Client,
}

impl TwilioSms {
    pub fn new(config: &TwilioConfig) -> Result<Self, ConfigError> {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| DEFAULT_NAME.to_string());

        http::require(&name, "account_sid", &config.account_sid)?;
        http::require(&name, "auth_token", &config.auth_token)?;

        let sender = match (&config.messaging_service_sid, &config.from) {
            (Some(service), _) if !service.trim().is_empty() => Sender::Service(service.clone()),
            (_, Some(from)) if !from.trim().is_empty() => Sender::Number(from.clone()),
            _ => {
                return Err(ConfigError::MissingField {
                    provider: name,
                    field: "from",
                });
            }
        };

        Ok(Self {
            base_url: http::base_url(&name, &config.base_url)?,
            client: http::build_client(&name, &config.http)?,
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            status_callback: config.status_callback.clone(),
            sender,
            name,
        })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages",
            self.base_url, self.account_sid
        )
    }

    fn classify(
        &self,
        status: reqwest::StatusCode,
        retry_after: Option<std::time::Duration>,
        body: &str,
    ) -> ProviderError {
        let Ok(error) = serde_json::from_str::<ApiError>(body) else {
            return http::classify_status(&self.name, status, retry_after, body);
        };

        let code = error.code.unwrap_or_default();
        let detail = format!("{status}: ({code}) {}", error.message);
        let kind = kind_for_code(code).unwrap_or_else(|| http::kind_for_status(status));

        match kind {
            ErrorKind::RateLimited => ProviderError::rate_limited(&self.name, detail, retry_after),
            kind => ProviderError::new(kind, &self.name, detail),
        }
    }
}

#[async_trait]
impl ChannelProvider for TwilioSms {
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
        _options: &SendOptions,
    ) -> Result<Receipt, ProviderError> {
        let media_url = match content.media.as_ref().map(|m| &m.payload) {
            None => None,
            Some(MediaPayload::Url(url)) => Some(url.as_str()),
            Some(MediaPayload::Bytes { .. }) => {
                return Err(ProviderError::validation(
                    &self.name,
                    "MMS media must be a public URL",
                ));
            }
        };

        let to = format!("+{}", validate::phone_digits(recipient));
        let (from, messaging_service_sid) = match &self.sender {
            Sender::Number(number) => (Some(number.as_str()), None),
            Sender::Service(sid) => (None, Some(sid.as_str())),
        };

        let form = SendForm {
            to: &to,
            from,
            messaging_service_sid,
            body: &content.body,
            media_url,
            status_callback: self.status_callback.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}.json", self.messages_url()))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| http::from_reqwest(&self.name, &e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = http::retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(self.classify(status, retry_after, &body));
        }

        let sid = http::accepted_body::<MessageResource>(&self.name, response)
            .await
            .map(|message| message.sid);

        Ok(Receipt {
            provider: self.name.clone(),
            provider_message_id: http::accepted_id(&self.name, sid),
        })
    }

    fn parse_webhook(&self, body: &[u8]) -> Result<Vec<DeliveryReport>, ProviderError> {
        let callback: StatusCallback = serde_urlencoded::from_bytes(body).map_err(|e| {
            ProviderError::validation(&self.name, format!("malformed status callback: {e}"))
        })?;

        Ok(status_from_twilio(&callback.message_status)
            .map(|status| {
                let error = callback
                    .error_code
                    .filter(|code| !code.is_empty())
                    .map(|code| format!("error code {code}"));
                DeliveryReport::new(callback.message_sid, status, Utc::now()).with_error(error)
            })
            .into_iter()
            .collect())
    }

    fn supports_polling(&self) -> bool {
        true
    }

    /// Handsets do not send read receipts for SMS.
    fn final_status(&self) -> MessageStatus {
        MessageStatus::Delivered
    }

    async fn poll_status(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<DeliveryReport>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/{provider_message_id}.json", self.messages_url()))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| http::from_reqwest(&self.name, &e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = http::retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(self.classify(status, retry_after, &body));
        }

        let message: MessageResource = response
            .json()
            .await
            .map_err(|e| http::from_reqwest(&self.name, &e))?;

        let Some(next) = message.status.as_deref().and_then(status_from_twilio) else {
            return Ok(None);
        };

        let timestamp = message
            .date_updated
            .as_deref()
            .and_then(|date| DateTime::parse_from_rfc2822(date).ok())
            .map_or_else(Utc::now, |date| date.with_timezone(&Utc));

        let error = message.error_code.map(|code| {
            format!(
                "({code}) {}",
                message.error_message.as_deref().unwrap_or_default()
            )
        });

        Ok(Some(
            DeliveryReport::new(message.sid, next, timestamp).with_error(error),
        ))
    }
}
