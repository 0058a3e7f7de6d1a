//! Resend HTTP API mailer.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PlangateError, Result, UpstreamService};
use crate::traits::mailer::{Email, Mailer};

const DEFAULT_ENDPOINT: &str = "https://api.resend.com/emails";

/// Sends email through Resend's REST API.
pub struct ResendMailer {
    http: reqwest::Client,
    api_key: SecretString,
    endpoint: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

impl ResendMailer {
    pub fn new(api_key: SecretString) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| PlangateError::internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        })
    }

    /// Override the API endpoint, e.g. for a local mock.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, email: &Email) -> Result<String> {
        email.validate()?;

        let body = SendRequest {
            from: &email.from,
            to: &email.to,
            subject: &email.subject,
            html: email.html.as_deref(),
            text: email.text.as_deref(),
            reply_to: email.reply_to.as_deref(),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| PlangateError::upstream(UpstreamService::EmailSender, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PlangateError::upstream(
                UpstreamService::EmailSender,
                format!("HTTP {}: {}", status.as_u16(), detail),
            ));
        }

        let sent: SendResponse = response
            .json()
            .await
            .map_err(|e| PlangateError::upstream(UpstreamService::EmailSender, e.to_string()))?;

        tracing::debug!(target: "plangate::email", message_id = %sent.id, "Email sent");
        Ok(sent.id)
    }
}
