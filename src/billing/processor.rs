//! Payment processor contract.
//!
//! Only the two operations the billing core needs: create a hosted checkout
//! session and read one back. The wire shapes follow the processor's
//! checkout session object so webhook payloads and API responses share one
//! parser.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::BillingError;
use super::plans::{BillingInterval, PlanTier};
use crate::error::Result;
use crate::storage::OnboardingDetails;

/// Metadata keys written on checkout sessions.
pub mod metadata {
    pub const TYPE: &str = "type";
    pub const TYPE_PLAN_UPGRADE: &str = "plan_upgrade";
    pub const PLAN_ID: &str = "planId";
    pub const BILLING_INTERVAL: &str = "billingInterval";
    pub const IS_FREE_TRIAL_PLAN: &str = "isFreeTrialPlan";
    pub const USER_ID: &str = "userId";
    pub const CURRENT_PLAN_ID: &str = "currentPlanId";
    pub const TARGET_PLAN_ID: &str = "targetPlanId";
    pub const PRORATED_AMOUNT: &str = "proratedAmount";
    pub const DAYS_REMAINING: &str = "daysRemaining";
    pub const TOTAL_DAYS: &str = "totalDays";
    pub const BRAND_NAME: &str = "brandName";
    pub const BRAND_WEBSITE: &str = "brandWebsite";
    pub const BRAND_DESCRIPTION: &str = "brandDescription";
    pub const CATEGORIES: &str = "categories";
    pub const TARGET_AUDIENCE: &str = "targetAudience";
    pub const PRICE_RANGE: &str = "priceRange";
    pub const MONTHLY_VOLUME: &str = "monthlyVolume";
    pub const STYLES: &str = "styles";
    pub const PLATFORMS: &str = "platforms";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutMode {
    Subscription,
    Payment,
}

impl CheckoutMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscription => "subscription",
            Self::Payment => "payment",
        }
    }
}

/// A single ad-hoc priced line item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    pub name: String,
    pub description: Option<String>,
    /// Amount in minor units.
    pub unit_amount: i64,
    pub currency: String,
    /// Recurring interval for subscription mode.
    pub recurring: Option<BillingInterval>,
}

/// Request to create a hosted checkout session.
#[derive(Debug, Clone)]
pub struct CreateCheckoutSession {
    pub mode: CheckoutMode,
    pub line_item: LineItem,
    pub customer_email: Option<String>,
    pub customer_id: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: BTreeMap<String, String>,
    pub trial_period_days: Option<u32>,
}

/// Where to send the customer to pay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRedirect {
    pub session_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Complete,
    Expired,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CustomerDetails {
    email: Option<String>,
}

/// Checkout session object as returned by the processor API and embedded in
/// webhook events.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionSnapshot {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    customer_email: Option<String>,
    #[serde(default)]
    customer_details: Option<CustomerDetails>,
    /// Processor customer id.
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CheckoutSessionSnapshot {
    #[must_use]
    pub fn new(id: impl Into<String>, payment_status: PaymentStatus) -> Self {
        Self {
            id: id.into(),
            url: None,
            payment_status,
            status: None,
            customer_email: None,
            customer_details: None,
            customer: None,
            subscription: None,
            amount_total: None,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.customer_details = Some(CustomerDetails {
            email: Some(email.into()),
        });
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer = Some(customer_id.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Payer email, preferring the details collected on the hosted page.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.email.as_deref())
            .or(self.customer_email.as_deref())
            .filter(|e| !e.trim().is_empty())
    }

    /// Paid, or completed without needing payment (trials).
    #[must_use]
    pub fn is_paid(&self) -> bool {
        match self.payment_status {
            PaymentStatus::Paid => true,
            PaymentStatus::NoPaymentRequired => self.status == Some(SessionStatus::Complete),
            PaymentStatus::Unpaid => false,
        }
    }

    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Whether this session pays for a plan upgrade rather than a signup.
    #[must_use]
    pub fn is_plan_upgrade(&self) -> bool {
        self.metadata_value(metadata::TYPE) == Some(metadata::TYPE_PLAN_UPGRADE)
    }

    /// Plan purchased at signup. Missing means starter; unknown values are rejected.
    pub fn signup_plan(&self) -> std::result::Result<PlanTier, BillingError> {
        self.metadata_value(metadata::PLAN_ID)
            .map(str::parse)
            .unwrap_or(Ok(PlanTier::Starter))
    }

    /// Billing interval chosen at checkout, defaulting to monthly.
    pub fn billing_interval(&self) -> std::result::Result<BillingInterval, BillingError> {
        self.metadata_value(metadata::BILLING_INTERVAL)
            .map(str::parse)
            .unwrap_or(Ok(BillingInterval::Month))
    }

    /// Onboarding answers carried in metadata. List fields are JSON arrays;
    /// malformed lists are treated as empty.
    #[must_use]
    pub fn onboarding(&self) -> OnboardingDetails {
        let text = |key: &str| self.metadata_value(key).map(str::to_string);
        let list = |key: &str| {
            self.metadata_value(key)
                .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
                .unwrap_or_default()
        };

        OnboardingDetails {
            brand_name: text(metadata::BRAND_NAME),
            brand_website: text(metadata::BRAND_WEBSITE),
            brand_description: text(metadata::BRAND_DESCRIPTION),
            categories: list(metadata::CATEGORIES),
            target_audience: list(metadata::TARGET_AUDIENCE),
            price_range: text(metadata::PRICE_RANGE),
            monthly_volume: text(metadata::MONTHLY_VOLUME),
            styles: list(metadata::STYLES),
            platforms: list(metadata::PLATFORMS),
        }
    }
}

/// Write onboarding answers into checkout metadata.
pub fn onboarding_metadata(onboarding: &OnboardingDetails, out: &mut BTreeMap<String, String>) {
    let text = |v: &Option<String>| v.clone().unwrap_or_default();
    let list = |v: &Vec<String>| serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string());

    out.insert(metadata::BRAND_NAME.into(), text(&onboarding.brand_name));
    out.insert(metadata::BRAND_WEBSITE.into(), text(&onboarding.brand_website));
    out.insert(metadata::BRAND_DESCRIPTION.into(), text(&onboarding.brand_description));
    out.insert(metadata::CATEGORIES.into(), list(&onboarding.categories));
    out.insert(metadata::TARGET_AUDIENCE.into(), list(&onboarding.target_audience));
    out.insert(metadata::PRICE_RANGE.into(), text(&onboarding.price_range));
    out.insert(metadata::MONTHLY_VOLUME.into(), text(&onboarding.monthly_volume));
    out.insert(metadata::STYLES.into(), list(&onboarding.styles));
    out.insert(metadata::PLATFORMS.into(), list(&onboarding.platforms));
}

/// Hosted checkout provider.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_checkout_session(&self, request: &CreateCheckoutSession) -> Result<CheckoutRedirect>;

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSessionSnapshot>;
}
