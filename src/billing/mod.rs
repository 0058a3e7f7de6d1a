//! Plans, entitlements, metered usage and payment processor integration.
//!
//! # Overview
//!
//! - [`PlanTier`] is the fixed, totally ordered set of plans with their prices.
//! - [`EntitlementTable`] maps a tier to its capabilities and monthly quotas.
//! - [`UsageCounter`] counts generations in the current UTC calendar month.
//! - [`quote_upgrade`] prices a mid-cycle upgrade.
//! - [`CheckoutManager`] and [`UpgradeManager`] start hosted checkout sessions.
//! - [`WebhookHandler`] verifies processor webhooks and routes them.
//!
//! # Example
//!
//! ```rust,ignore
//! use plangate::billing::{EntitlementTable, GenerationKind, PlanTier};
//!
//! let table = EntitlementTable::default();
//! let quota = table.quota(PlanTier::Starter, GenerationKind::Image);
//! if !quota.check(used).is_allowed() {
//!     return Err(PlangateError::quota_exceeded("Monthly image generation limit reached"));
//! }
//! ```

pub mod checkout;
pub mod entitlements;
pub mod error;
#[cfg(feature = "live-processor")]
pub mod live_client;
pub mod plans;
pub mod processor;
pub mod proration;
pub mod upgrade;
pub mod usage;
pub mod webhook;

// Plan exports
pub use plans::{BillingInterval, PlanDefinition, PlanTier};

// Entitlement and usage exports
pub use entitlements::{Capabilities, EntitlementTable, LimitCheckResult, Quota};
pub use usage::{KindUsage, UsageCounter, UsageReport};

// Proration exports
pub use proration::{ProrationQuote, prorated_upgrade, quote_upgrade};

// Processor exports
pub use processor::{
    CheckoutMode, CheckoutRedirect, CheckoutSessionSnapshot, CreateCheckoutSession, LineItem,
    PaymentProcessor, PaymentStatus, SessionStatus, metadata, onboarding_metadata,
};
#[cfg(feature = "live-processor")]
pub use live_client::{LiveProcessorClient, LiveProcessorConfig};

// Checkout and upgrade exports
pub use checkout::{CheckoutConfig, CheckoutManager, CheckoutRequest, CheckoutStart};
pub use upgrade::{
    AppliedUpgrade, PlanSummary, UpgradeManager, UpgradeOutcome, UpgradePreview,
    UpgradeVerification,
};

// Webhook exports
pub use webhook::{WebhookEvent, WebhookEventData, WebhookHandler, WebhookOutcome, sign_payload};

// Error exports
pub use error::BillingError;

pub use crate::generation::GenerationKind;
