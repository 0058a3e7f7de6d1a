//! Payment processor webhook handling.
//!
//! Verifies the `t=...,v1=...` signature header, deduplicates events by id,
//! and routes the few event types the billing core cares about:
//!
//! - `checkout.session.completed`: signup sessions are provisioned, upgrade
//!   sessions are applied.
//! - `customer.subscription.updated`: a trial that turns into a paid
//!   subscription moves the account from free to starter.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::error::BillingError;
use super::plans::PlanTier;
use super::processor::CheckoutSessionSnapshot;
use super::upgrade::UpgradeManager;
use crate::clock::Clock;
use crate::error::Result;
use crate::provisioning::{ProvisionOutcome, Reconciler};
use crate::storage::{AccountStore, ProcessedEventStore};

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Maximum age of a signed webhook.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

/// Verifies and dispatches processor webhooks.
///
/// The webhook secret is held as a [`SecretString`] so it never shows up in
/// debug output.
pub struct WebhookHandler {
    secret: SecretString,
    tolerance_secs: i64,
    events: Arc<dyn ProcessedEventStore>,
    accounts: Arc<dyn AccountStore>,
    reconciler: Reconciler,
    upgrades: UpgradeManager,
    clock: Arc<dyn Clock>,
}

impl WebhookHandler {
    #[must_use]
    pub fn new(
        secret: SecretString,
        events: Arc<dyn ProcessedEventStore>,
        accounts: Arc<dyn AccountStore>,
        reconciler: Reconciler,
        upgrades: UpgradeManager,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            secret,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
            events,
            accounts,
            reconciler,
            upgrades,
            clock,
        }
    }

    #[must_use]
    pub fn with_tolerance(mut self, seconds: i64) -> Self {
        self.tolerance_secs = seconds;
        self
    }

    /// Verify the signature header against the raw body and parse the event.
    pub fn verify_signature(&self, payload: &[u8], header: &str) -> Result<WebhookEvent> {
        let parts = parse_signature_header(header)?;

        let age = (self.clock.now().timestamp() - parts.timestamp).abs();
        if age > self.tolerance_secs {
            return Err(BillingError::WebhookTimestampExpired { age_seconds: age }.into());
        }

        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| BillingError::Internal {
                message: "invalid webhook secret".to_string(),
            })?;
        mac.update(parts.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        let matched = parts
            .signatures
            .iter()
            .filter_map(|sig| hex::decode(sig).ok())
            .any(|provided| bool::from(expected.as_slice().ct_eq(&provided)));
        if !matched {
            tracing::warn!(target: "plangate::billing", "Webhook signature mismatch");
            return Err(BillingError::InvalidWebhookSignature.into());
        }

        let event: WebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(
                target: "plangate::billing",
                error = %e,
                "Failed to parse webhook payload"
            );
            BillingError::InvalidWebhookPayload {
                message: "malformed JSON payload".to_string(),
            }
        })?;

        Ok(event)
    }

    /// Process a verified event at most once.
    pub async fn handle_event(&self, event: WebhookEvent) -> Result<WebhookOutcome> {
        if self.events.is_event_processed(&event.id).await? {
            tracing::debug!(target: "plangate::billing", event_id = %event.id, "Duplicate webhook");
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let outcome = match event.event_type.as_str() {
            "checkout.session.completed" => self.handle_checkout_completed(&event).await?,
            "customer.subscription.updated" => self.handle_subscription_updated(&event).await?,
            _ => WebhookOutcome::Ignored,
        };

        // Ignored events stay unmarked so a later handler version can act on them
        if outcome == WebhookOutcome::Processed {
            self.events.mark_event_processed(&event.id).await?;
        }

        tracing::info!(
            target: "plangate::billing",
            event_id = %event.id,
            event_type = %event.event_type,
            outcome = ?outcome,
            "Webhook handled"
        );
        Ok(outcome)
    }

    async fn handle_checkout_completed(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let session: CheckoutSessionSnapshot = event.data.parse_object()?;

        if !session.is_paid() {
            tracing::debug!(
                target: "plangate::billing",
                session_id = %session.id,
                upgrade = session.is_plan_upgrade(),
                "Completed session not paid yet"
            );
            return Ok(WebhookOutcome::Ignored);
        }

        if session.is_plan_upgrade() {
            self.upgrades.apply_paid_upgrade(&session).await?;
            return Ok(WebhookOutcome::Processed);
        }

        match self.reconciler.provision_snapshot(&session).await? {
            ProvisionOutcome::Ready(_) => Ok(WebhookOutcome::Processed),
            ProvisionOutcome::InProgress => {
                tracing::debug!(
                    target: "plangate::billing",
                    session_id = %session.id,
                    "Provisioning in flight elsewhere, deferring"
                );
                Ok(WebhookOutcome::Deferred)
            }
        }
    }

    async fn handle_subscription_updated(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        let subscription: SubscriptionSnapshot = event.data.parse_object()?;
        if !subscription.converted_from_trial(event.data.previous_attributes.as_ref()) {
            return Ok(WebhookOutcome::Ignored);
        }

        let Some(profile) = self
            .accounts
            .find_profile_by_customer(&subscription.customer)
            .await?
        else {
            tracing::warn!(
                target: "plangate::billing",
                subscription_id = %subscription.id,
                "No profile for converted trial subscription"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        let changed = self
            .accounts
            .set_plan_if(
                &profile.account_id,
                PlanTier::Free,
                PlanTier::Starter,
                self.clock.now(),
            )
            .await?;
        tracing::info!(
            target: "plangate::billing",
            account_id = %profile.account_id,
            subscription_id = %subscription.id,
            changed,
            "Trial converted to paid subscription"
        );
        Ok(WebhookOutcome::Processed)
    }
}

/// Parsed webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    /// Event type (e.g. "checkout.session.completed").
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
    #[serde(default)]
    pub created: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    /// The object that triggered the event.
    pub object: serde_json::Value,
    /// Fields that changed, with their previous values (update events only).
    #[serde(default)]
    pub previous_attributes: Option<serde_json::Value>,
}

impl WebhookEventData {
    fn parse_object<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.object.clone()).map_err(|e| {
            BillingError::InvalidWebhookPayload {
                message: e.to_string(),
            }
            .into()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    /// Not relevant; left unmarked.
    Ignored,
    /// Another trigger is mid-way through the same work. Left unmarked and
    /// answered with a retryable status so the processor redelivers.
    Deferred,
    AlreadyProcessed,
}

#[derive(Debug, Deserialize)]
struct SubscriptionSnapshot {
    id: String,
    customer: String,
    status: String,
    #[serde(default)]
    trial_end: Option<i64>,
}

impl SubscriptionSnapshot {
    /// Active with no trial, where the previous state was a trial.
    fn converted_from_trial(&self, previous: Option<&serde_json::Value>) -> bool {
        if self.status != "active" || self.trial_end.is_some() {
            return false;
        }
        let Some(previous) = previous.and_then(|p| p.as_object()) else {
            return false;
        };
        previous.contains_key("trial_end")
            || previous.get("status").and_then(|s| s.as_str()) == Some("trialing")
    }
}

struct SignatureParts {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> std::result::Result<SignatureParts, BillingError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part
            .split_once('=')
            .ok_or(BillingError::InvalidWebhookSignature)?;
        match key.trim() {
            "t" => timestamp = value.trim().parse().ok(),
            "v1" => signatures.push(value.trim().to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(BillingError::InvalidWebhookSignature)?;
    if signatures.is_empty() {
        return Err(BillingError::InvalidWebhookSignature);
    }
    Ok(SignatureParts {
        timestamp,
        signatures,
    })
}

/// Build a signature header for `payload`, as the processor would.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| BillingError::Internal {
        message: "invalid webhook secret".to_string(),
    })?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}
