//! Outbound supplier email via the Resend HTTP API, behind a trait so the
//! tool layer and tests never touch the network directly.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use scout_core::config::EmailConfig;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("email request failed with status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("email transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError>;

    /// Fetch the text body of a received email by provider id. Used by the
    /// inbound webhook when the event payload arrives without content.
    async fn fetch_received_body(&self, email_id: &str) -> Result<Option<String>, MailError>;
}

pub struct ResendMailer {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    from_address: String,
}

impl ResendMailer {
    /// `None` when no API key is configured; outreach tools degrade to an
    /// explanatory error instead of failing at startup.
    pub fn from_config(config: &EmailConfig) -> Option<Self> {
        if !config.is_configured() {
            return None;
        }
        let api_key = config.api_key.clone()?;

        Some(Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            from_address: config.from_address.clone(),
        })
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        let response = self
            .http
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&SendRequest {
                from: &self.from_address,
                to: [email.to.as_str()],
                subject: &email.subject,
                text: &email.body,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| String::new());
            return Err(MailError::Api { status: status.as_u16(), message });
        }

        Ok(())
    }

    async fn fetch_received_body(&self, email_id: &str) -> Result<Option<String>, MailError> {
        let response = self
            .http
            .get(format!("{}/emails/receiving/{email_id}", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| String::new());
            return Err(MailError::Api { status: status.as_u16(), message });
        }

        let payload: Value = response.json().await?;
        let body = ["text", "html"]
            .iter()
            .find_map(|key| payload.get(key).and_then(Value::as_str))
            .map(str::to_string)
            .filter(|value| !value.trim().is_empty());

        Ok(body)
    }
}
