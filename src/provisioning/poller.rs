//! Bounded client-side polling of a checkout session.
//!
//! After the hosted checkout redirects back, the client polls until the
//! account is ready, the session errors, or the attempts run out.

use async_trait::async_trait;
use std::time::Duration;

use super::reconciler::{Reconciler, SessionPollStatus};
use crate::config::ProvisioningConfig;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Anything that can report the status of a checkout session.
#[async_trait]
pub trait SessionStatusSource: Send + Sync {
    async fn status(&self, session_id: &str) -> SessionPollStatus;
}

#[async_trait]
impl SessionStatusSource for Reconciler {
    async fn status(&self, session_id: &str) -> SessionPollStatus {
        match self.poll_status(session_id).await {
            Ok(status) => status,
            Err(err) => SessionPollStatus::Error {
                message: err.to_response_body().error,
            },
        }
    }
}

/// How a polling run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The terminal `ready` or `error` status.
    Finished(SessionPollStatus),
    /// Still pending or processing after every attempt.
    TimedOut { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct SessionPoller<S> {
    source: S,
    max_attempts: u32,
    interval: Duration,
}

impl<S: SessionStatusSource> SessionPoller<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Bounds taken from the `provisioning` config section.
    pub fn from_config(source: S, config: &ProvisioningConfig) -> Self {
        Self::new(source)
            .max_attempts(config.poll_max_attempts)
            .interval(config.poll_interval())
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn poll(&self, session_id: &str) -> PollOutcome {
        for attempt in 1..=self.max_attempts {
            match self.source.status(session_id).await {
                status @ (SessionPollStatus::Ready { .. } | SessionPollStatus::Error { .. }) => {
                    tracing::debug!(
                        target: "plangate::provisioning",
                        session_id = %session_id,
                        attempt,
                        "Session polling finished"
                    );
                    return PollOutcome::Finished(status);
                }
                SessionPollStatus::Pending | SessionPollStatus::Processing => {
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.interval).await;
                    }
                }
            }
        }

        tracing::warn!(
            target: "plangate::provisioning",
            session_id = %session_id,
            attempts = self.max_attempts,
            "Session polling timed out"
        );
        PollOutcome::TimedOut {
            attempts: self.max_attempts,
        }
    }
}

#[cfg(feature = "client")]
pub use http::HttpSessionStatus;

#[cfg(feature = "client")]
mod http {
    use super::*;
    use serde::Deserialize;

    /// Polls `GET {base}/api/stripe/session?session_id=...` on a running server.
    #[derive(Debug, Clone)]
    pub struct HttpSessionStatus {
        http: reqwest::Client,
        base_url: String,
    }

    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }

    impl HttpSessionStatus {
        pub fn new(base_url: impl Into<String>) -> Self {
            Self {
                http: reqwest::Client::new(),
                base_url: base_url.into().trim_end_matches('/').to_string(),
            }
        }

        async fn fetch(&self, session_id: &str) -> std::result::Result<SessionPollStatus, String> {
            let response = self
                .http
                .get(format!("{}/api/stripe/session", self.base_url))
                .query(&[("session_id", session_id)])
                .send()
                .await
                .map_err(|e| e.to_string())?;

            if response.status().is_success() {
                response.json().await.map_err(|e| e.to_string())
            } else {
                let status = response.status();
                match response.json::<ErrorBody>().await {
                    Ok(body) => Err(body.error),
                    Err(_) => Err(format!("HTTP {}", status.as_u16())),
                }
            }
        }
    }

    #[async_trait]
    impl SessionStatusSource for HttpSessionStatus {
        async fn status(&self, session_id: &str) -> SessionPollStatus {
            self.fetch(session_id)
                .await
                .unwrap_or_else(|message| SessionPollStatus::Error { message })
        }
    }
}
