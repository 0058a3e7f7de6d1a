//! Billing errors.
//!
//! Raised by plan parsing, upgrades, checkout snapshots, webhooks and the
//! processor client. They convert into [`PlangateError`] for responses;
//! processor failures are reported as upstream errors with the detail kept
//! server-side.

use thiserror::Error;

use crate::error::{PlangateError, UpstreamService};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    #[error("Invalid plan: {plan_id}")]
    PlanNotFound { plan_id: String },

    #[error("Invalid billing interval '{value}': expected 'month' or 'year'")]
    InvalidBillingInterval { value: String },

    /// The target tier does not rank strictly above the current one.
    #[error("Cannot change from '{current}' to '{target}': only upgrades are allowed")]
    NotAnUpgrade { current: String, target: String },

    #[error("No customer email found for session '{session_id}'")]
    MissingCustomerEmail { session_id: String },

    #[error("Checkout session '{session_id}' is not paid")]
    SessionNotPaid { session_id: String },

    /// A plan upgrade session offered where a signup was expected.
    #[error("Checkout session '{session_id}' is a plan upgrade, not a signup")]
    UpgradeSession { session_id: String },

    /// A redirect could not be built from the configured base URL.
    #[error("Invalid redirect URL '{url}': {reason}")]
    InvalidRedirectUrl { url: String, reason: String },

    #[error("Invalid webhook signature")]
    InvalidWebhookSignature,

    #[error("Webhook timestamp outside tolerance ({age_seconds} seconds old)")]
    WebhookTimestampExpired { age_seconds: i64 },

    #[error("Invalid webhook payload: {message}")]
    InvalidWebhookPayload { message: String },

    #[error("Payment processor error during '{operation}': {message}{}", describe(.code, .http_status))]
    ProcessorApiError {
        operation: String,
        message: String,
        code: Option<String>,
        http_status: Option<u16>,
    },

    #[error("Payment processor call '{operation}' failed after retries")]
    RetryLimitExceeded { operation: String },

    #[error("Internal billing error: {message}")]
    Internal { message: String },
}

fn describe(code: &Option<String>, http_status: &Option<u16>) -> String {
    let mut out = String::new();
    if let Some(code) = code {
        out.push_str(&format!(" (code: {code})"));
    }
    if let Some(status) = http_status {
        out.push_str(&format!(" [HTTP {status}]"));
    }
    out
}

impl From<BillingError> for PlangateError {
    fn from(err: BillingError) -> Self {
        use BillingError::*;

        match err {
            PlanNotFound { .. }
            | InvalidBillingInterval { .. }
            | NotAnUpgrade { .. }
            | MissingCustomerEmail { .. }
            | SessionNotPaid { .. }
            | UpgradeSession { .. }
            | InvalidWebhookSignature
            | WebhookTimestampExpired { .. }
            | InvalidWebhookPayload { .. } => PlangateError::BadRequest(err.to_string()),
            ProcessorApiError { .. } | RetryLimitExceeded { .. } => {
                PlangateError::upstream(UpstreamService::PaymentProcessor, err.to_string())
            }
            InvalidRedirectUrl { .. } | Internal { .. } => PlangateError::Internal(err.to_string()),
        }
    }
}
