//! Hosted checkout for new signups.
//!
//! Builds a subscription checkout session for the chosen plan and carries the
//! onboarding answers in session metadata, so provisioning can rebuild the
//! profile from the paid session alone.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;
use validator::Validate;

use super::error::BillingError;
use super::plans::{BillingInterval, PlanTier};
use super::processor::{
    CheckoutMode, CheckoutRedirect, CreateCheckoutSession, LineItem, PaymentProcessor, metadata,
    onboarding_metadata,
};
use crate::error::Result;
use crate::storage::OnboardingDetails;

/// Configuration for checkout sessions.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Public origin of the web app, used for redirect URLs.
    pub app_base_url: String,
    /// ISO currency code, lowercase.
    pub currency: String,
    /// Trial length for the free plan.
    pub trial_days: u32,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            app_base_url: "http://localhost:3000".to_string(),
            currency: "jpy".to_string(),
            trial_days: 3,
        }
    }
}

impl CheckoutConfig {
    #[must_use]
    pub fn new(app_base_url: impl Into<String>) -> Self {
        Self {
            app_base_url: app_base_url.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into().to_ascii_lowercase();
        self
    }

    #[must_use]
    pub fn trial_days(mut self, days: u32) -> Self {
        self.trial_days = days;
        self
    }

    /// Absolute URL for a path in the web app.
    pub fn url_for(&self, path: &str) -> std::result::Result<String, BillingError> {
        let base = Url::parse(&self.app_base_url).map_err(|e| BillingError::InvalidRedirectUrl {
            url: self.app_base_url.clone(),
            reason: e.to_string(),
        })?;
        if base.scheme() != "https" && base.scheme() != "http" {
            return Err(BillingError::InvalidRedirectUrl {
                url: self.app_base_url.clone(),
                reason: "must be an http(s) URL".to_string(),
            });
        }
        base.join(path)
            .map(String::from)
            .map_err(|e| BillingError::InvalidRedirectUrl {
                url: path.to_string(),
                reason: e.to_string(),
            })
    }

    /// Where enterprise prospects are sent instead of checkout.
    pub fn contact_url(&self) -> std::result::Result<String, BillingError> {
        self.url_for("/contact")
    }
}

/// Signup checkout request.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub plan_id: String,
    #[serde(default)]
    pub billing_interval: Option<String>,
    /// Prefills the hosted page.
    #[serde(default)]
    #[validate(email(message = "Must be a valid email"))]
    pub email: Option<String>,
    #[serde(flatten)]
    pub onboarding: OnboardingDetails,
}

/// How a checkout request is answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CheckoutStart {
    /// Send the customer to the hosted payment page.
    Redirect(CheckoutRedirect),
    /// Plan is sold through sales, not self-serve.
    ContactSales { redirect: String },
}

pub(crate) fn interval_label(interval: BillingInterval) -> &'static str {
    match interval {
        BillingInterval::Month => "月額",
        BillingInterval::Year => "年額",
    }
}

/// Creates signup checkout sessions.
#[derive(Clone)]
pub struct CheckoutManager {
    processor: Arc<dyn PaymentProcessor>,
    config: CheckoutConfig,
}

impl CheckoutManager {
    #[must_use]
    pub fn new(processor: Arc<dyn PaymentProcessor>, config: CheckoutConfig) -> Self {
        Self { processor, config }
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Start checkout for a plan.
    ///
    /// The free plan is sold as a trial of the starter plan: the session
    /// charges the starter price after `trial_days`, while metadata keeps
    /// `planId=free` so the account starts on the free tier.
    pub async fn create_checkout(&self, request: &CheckoutRequest) -> Result<CheckoutStart> {
        request.validate()?;

        let plan: PlanTier = request.plan_id.parse()?;
        let interval: BillingInterval = match request.billing_interval.as_deref() {
            Some(raw) => raw.parse()?,
            None => BillingInterval::Month,
        };

        if plan == PlanTier::Enterprise {
            return Ok(CheckoutStart::ContactSales {
                redirect: self.config.contact_url()?,
            });
        }

        let is_trial = plan == PlanTier::Free;
        let charged = if is_trial { PlanTier::Starter } else { plan };
        let price = charged.price(interval);
        let label = interval_label(interval);

        let (name, description) = if is_trial {
            (
                format!(
                    "生成 - フリートライアル（{}日間無料 → {}プラン {}）",
                    self.config.trial_days,
                    charged.display_name(),
                    label
                ),
                format!(
                    "{}日間無料でお試し。トライアル終了後は{}プラン（{} ¥{}）に自動移行します。",
                    self.config.trial_days,
                    charged.display_name(),
                    label,
                    price
                ),
            )
        } else {
            (
                format!("生成 - {}プラン（{}）", plan.display_name(), label),
                plan.definition().description.to_string(),
            )
        };

        let mut meta = BTreeMap::new();
        meta.insert(metadata::PLAN_ID.to_string(), plan.id().to_string());
        meta.insert(metadata::BILLING_INTERVAL.to_string(), interval.as_str().to_string());
        meta.insert(metadata::IS_FREE_TRIAL_PLAN.to_string(), is_trial.to_string());
        onboarding_metadata(&request.onboarding, &mut meta);

        let success_url = format!(
            "{}?session_id={{CHECKOUT_SESSION_ID}}",
            self.config.url_for("/onboarding/success")?
        );

        let redirect = self
            .processor
            .create_checkout_session(&CreateCheckoutSession {
                mode: CheckoutMode::Subscription,
                line_item: LineItem {
                    name,
                    description: Some(description),
                    unit_amount: price,
                    currency: self.config.currency.clone(),
                    recurring: Some(interval),
                },
                customer_email: request.email.clone(),
                customer_id: None,
                success_url,
                cancel_url: self.config.url_for("/onboarding?step=plan")?,
                metadata: meta,
                trial_period_days: is_trial.then_some(self.config.trial_days),
            })
            .await?;

        tracing::info!(
            target: "plangate::billing",
            session_id = %redirect.session_id,
            plan = %plan,
            interval = %interval,
            trial = is_trial,
            "Signup checkout created"
        );

        Ok(CheckoutStart::Redirect(redirect))
    }
}
