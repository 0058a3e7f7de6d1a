//! Mailer trait for sending emails
//!
//! Abstracts the email backend so provisioning can send welcome emails through
//! a transactional email API in production and the console in development.

use crate::error::{PlangateError, Result};
use async_trait::async_trait;

/// An email message to be sent
#[derive(Clone)]
pub struct Email {
    /// Sender, e.g. `Seisei <noreply@seisei.me>`
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    /// Plain text body (optional if html is provided)
    pub text: Option<String>,
    /// HTML body (optional if text is provided)
    pub html: Option<String>,
    pub reply_to: Option<String>,
}

impl std::fmt::Debug for Email {
    // Bodies can carry credentials
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Email")
            .field("from", &self.from)
            .field("to", &self.to.len())
            .field("subject", &self.subject)
            .field("text", &self.text.as_ref().map(|_| "[REDACTED]"))
            .field("html", &self.html.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Email {
    /// Create a new email with the required fields
    pub fn new(from: impl Into<String>, to: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: vec![to.into()],
            subject: subject.into(),
            text: None,
            html: None,
            reply_to: None,
        }
    }

    /// Add a recipient
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.to.push(recipient.into());
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text = Some(body.into());
        self
    }

    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html = Some(body.into());
        self
    }

    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    /// Validate the email has required fields
    pub fn validate(&self) -> Result<()> {
        if self.from.is_empty() {
            return Err(PlangateError::bad_request("Email 'from' is required"));
        }
        if self.to.is_empty() || self.to.iter().any(|t| t.trim().is_empty()) {
            return Err(PlangateError::bad_request("Email 'to' is required"));
        }
        if self.subject.is_empty() {
            return Err(PlangateError::bad_request("Email 'subject' is required"));
        }
        if self.text.is_none() && self.html.is_none() {
            return Err(PlangateError::bad_request(
                "Email must have either 'text' or 'html' body",
            ));
        }
        Ok(())
    }
}

/// Outbound email backend.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send an email and return the backend's message id.
    async fn send(&self, email: &Email) -> Result<String>;
}
