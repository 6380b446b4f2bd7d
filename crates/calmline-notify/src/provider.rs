//! SMS and email delivery providers.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::NotifyError;

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub cc: Vec<String>,
    pub subject: String,
    pub html_body: String,
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), NotifyError>;
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, message: &EmailMessage) -> Result<(), NotifyError>;
}

fn default_sms_base_url() -> String {
    "https://api.twilio.com".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SmsProviderConfig {
    #[serde(default = "default_sms_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub account_sid: String,
    #[serde(default, skip_serializing)]
    pub auth_token: String,
    /// Sending number.
    #[serde(default)]
    pub from: String,
}

impl Default for SmsProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_sms_base_url(),
            account_sid: String::new(),
            auth_token: String::new(),
            from: String::new(),
        }
    }
}

impl fmt::Debug for SmsProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmsProviderConfig")
            .field("base_url", &self.base_url)
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("from", &self.from)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct EmailProviderConfig {
    /// Endpoint accepting a JSON message.
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default)]
    pub from: String,
}

impl fmt::Debug for EmailProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailProviderConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("from", &self.from)
            .finish()
    }
}

fn http_client() -> Result<reqwest::Client, NotifyError> {
    reqwest::Client::builder()
        .timeout(PROVIDER_TIMEOUT)
        .build()
        .map_err(|e| NotifyError::Delivery {
            channel: "http",
            message: format!("failed to build HTTP client: {}", e),
        })
}

async fn check_status(channel: &'static str, response: reqwest::Response) -> Result<(), NotifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(NotifyError::Delivery {
        channel,
        message: format!("status {}: {}", status, text),
    })
}

/// Sends SMS through a Twilio-style form API.
pub struct TwilioSmsSender {
    client: reqwest::Client,
    config: SmsProviderConfig,
}

impl TwilioSmsSender {
    pub fn new(config: SmsProviderConfig) -> Result<Self, NotifyError> {
        Ok(Self {
            client: http_client()?,
            config,
        })
    }
}

#[async_trait]
impl SmsSender for TwilioSmsSender {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), NotifyError> {
        if self.config.account_sid.is_empty() || self.config.from.is_empty() {
            return Err(NotifyError::NotConfigured("sms"));
        }
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.base_url.trim_end_matches('/'),
            self.config.account_sid
        );
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[("To", to), ("From", self.config.from.as_str()), ("Body", body)])
            .send()
            .await
            .map_err(|e| NotifyError::Delivery {
                channel: "sms",
                message: e.to_string(),
            })?;
        check_status("sms", response).await
    }
}

#[derive(Serialize)]
struct EmailPayload<'a> {
    from: &'a str,
    to: &'a str,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    cc: &'a [String],
    subject: &'a str,
    html: &'a str,
}

/// Sends email as a JSON POST with bearer authentication.
pub struct HttpEmailSender {
    client: reqwest::Client,
    config: EmailProviderConfig,
}

impl HttpEmailSender {
    pub fn new(config: EmailProviderConfig) -> Result<Self, NotifyError> {
        Ok(Self {
            client: http_client()?,
            config,
        })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send_email(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        if self.config.url.is_empty() {
            return Err(NotifyError::NotConfigured("email"));
        }
        if message.to.trim().is_empty() {
            return Err(NotifyError::Delivery {
                channel: "email",
                message: "no recipient address".to_string(),
            });
        }
        let payload = EmailPayload {
            from: &self.config.from,
            to: &message.to,
            cc: &message.cc,
            subject: &message.subject,
            html: &message.html_body,
        };
        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery {
                channel: "email",
                message: e.to_string(),
            })?;
        check_status("email", response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_providers_fail_without_network() {
        let sms = TwilioSmsSender::new(SmsProviderConfig::default()).expect("client");
        assert!(matches!(
            sms.send_sms("+15550000000", "hi").await,
            Err(NotifyError::NotConfigured("sms"))
        ));

        let email = HttpEmailSender::new(EmailProviderConfig::default()).expect("client");
        let message = EmailMessage {
            to: "desk@practice.test".into(),
            cc: Vec::new(),
            subject: "s".into(),
            html_body: "b".into(),
        };
        assert!(matches!(
            email.send_email(&message).await,
            Err(NotifyError::NotConfigured("email"))
        ));
    }

    #[test]
    fn debug_hides_secrets() {
        let config = SmsProviderConfig {
            auth_token: "tok-secret".into(),
            ..SmsProviderConfig::default()
        };
        assert!(!format!("{:?}", config).contains("tok-secret"));
    }
}
