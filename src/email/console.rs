//! Console mailer for development
//!
//! Logs emails instead of sending them. Bodies are redacted by default since
//! welcome emails carry a temporary credential.

use crate::error::Result;
use crate::traits::mailer::{Email, Mailer};
use async_trait::async_trait;
use uuid::Uuid;

/// A mailer that logs emails instead of sending them
///
/// **FOR DEVELOPMENT USE ONLY.** With full output enabled the body, including
/// any credential, ends up in the logs.
#[derive(Debug, Clone, Default)]
pub struct ConsoleMailer {
    show_full_content: bool,
}

impl ConsoleMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log full bodies. Default: `false`.
    pub fn with_full_output(mut self, enabled: bool) -> Self {
        if enabled {
            tracing::warn!(
                target: "plangate::email",
                "ConsoleMailer: full output enabled - email content will be visible in logs. \
                 Do not use in production!"
            );
        }
        self.show_full_content = enabled;
        self
    }
}

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, email: &Email) -> Result<String> {
        email.validate()?;
        let id = format!("console-{}", Uuid::new_v4());

        if self.show_full_content {
            tracing::info!(
                target: "plangate::email",
                message_id = %id,
                from = %email.from,
                to = ?email.to,
                subject = %email.subject,
                text = email.text.as_deref().unwrap_or(""),
                html = email.html.as_deref().unwrap_or(""),
                "Email (console)"
            );
        } else {
            tracing::info!(
                target: "plangate::email",
                message_id = %id,
                from = %email.from,
                recipients = email.to.len(),
                subject = %email.subject,
                text_bytes = email.text.as_ref().map_or(0, String::len),
                html_bytes = email.html.as_ref().map_or(0, String::len),
                "Email (console, body redacted)"
            );
        }

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_console_mailer_sends_without_error() {
        let mailer = ConsoleMailer::new();
        let email = Email::new("from@test.com", "to@test.com", "Test Subject").text("Test body");
        let id = mailer.send(&email).await.unwrap();
        assert!(id.starts_with("console-"));
    }

    #[tokio::test]
    async fn test_console_mailer_validates_email() {
        let mailer = ConsoleMailer::new();
        let email = Email::new("from@test.com", "to@test.com", "Test Subject");
        assert!(mailer.send(&email).await.is_err());
    }
}
