//! Mid-cycle plan upgrades.
//!
//! The price difference for the rest of the current cycle is charged as a
//! one-time payment. The plan changes when that payment is confirmed, either
//! by the webhook or by the client verifying the session after redirect.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::checkout::{CheckoutConfig, interval_label};
use super::error::BillingError;
use super::plans::{BillingInterval, PlanTier};
use super::processor::{
    CheckoutMode, CheckoutSessionSnapshot, CreateCheckoutSession, LineItem, PaymentProcessor,
    metadata,
};
use super::proration::{ProrationQuote, quote_upgrade};
use crate::clock::Clock;
use crate::error::{PlangateError, Result};
use crate::storage::{AccountId, AccountStore, ProfileUpdate};

/// Plan summary shown in the upgrade dialog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub id: PlanTier,
    pub name: &'static str,
    pub price: i64,
}

impl PlanSummary {
    fn of(tier: PlanTier, interval: BillingInterval) -> Self {
        Self {
            id: tier,
            name: tier.display_name(),
            price: tier.price(interval),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePreview {
    pub current_plan: PlanSummary,
    pub target_plan: PlanSummary,
    pub billing_interval: BillingInterval,
    pub prorated_amount: i64,
    pub days_remaining: u32,
    pub total_days: u32,
    pub full_price_difference: i64,
}

/// Result of asking for an upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// Nothing to charge; the plan was changed immediately.
    Applied { plan: PlanTier },
    /// The customer must pay the prorated difference first.
    PaymentRequired {
        session_id: String,
        url: String,
        quote: ProrationQuote,
    },
    /// Target is sold through sales.
    ContactSales { redirect: String },
}

/// Result of applying a paid upgrade session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedUpgrade {
    pub account_id: AccountId,
    pub plan: PlanTier,
    /// `false` when another trigger had already applied it.
    pub changed: bool,
}

/// Result of the client-side upgrade check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeVerification {
    Pending,
    Ready { plan: PlanTier },
}

/// Prices, starts and applies plan upgrades.
#[derive(Clone)]
pub struct UpgradeManager {
    accounts: Arc<dyn AccountStore>,
    processor: Arc<dyn PaymentProcessor>,
    config: CheckoutConfig,
    clock: Arc<dyn Clock>,
}

impl UpgradeManager {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        processor: Arc<dyn PaymentProcessor>,
        config: CheckoutConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            accounts,
            processor,
            config,
            clock,
        }
    }

    /// Current plan and interval. A missing profile is the lowest tier, monthly.
    async fn current_plan(&self, account_id: &AccountId) -> Result<(PlanTier, BillingInterval)> {
        Ok(self
            .accounts
            .get_profile(account_id)
            .await?
            .map(|p| (p.plan, p.billing_interval))
            .unwrap_or((PlanTier::lowest(), BillingInterval::Month)))
    }

    /// Price an upgrade without starting it.
    pub async fn preview(&self, account_id: &AccountId, target_plan_id: &str) -> Result<UpgradePreview> {
        let target: PlanTier = target_plan_id.parse()?;
        let (current, interval) = self.current_plan(account_id).await?;
        let quote = quote_upgrade(current, target, interval, self.clock.now())?;

        Ok(UpgradePreview {
            current_plan: PlanSummary::of(current, interval),
            target_plan: PlanSummary::of(target, interval),
            billing_interval: interval,
            prorated_amount: quote.amount,
            days_remaining: quote.days_remaining,
            total_days: quote.total_days,
            full_price_difference: target.price(interval) - current.price(interval),
        })
    }

    /// Start an upgrade.
    ///
    /// A zero quote changes the plan immediately. Otherwise a one-time payment
    /// session is created and the plan changes once it is paid.
    pub async fn commit(&self, account_id: &AccountId, target_plan_id: &str) -> Result<UpgradeOutcome> {
        let target: PlanTier = target_plan_id.parse()?;
        if target == PlanTier::Enterprise {
            return Ok(UpgradeOutcome::ContactSales {
                redirect: self.config.contact_url()?,
            });
        }

        let (current, interval) = self.current_plan(account_id).await?;
        let quote = quote_upgrade(current, target, interval, self.clock.now())?;

        if quote.is_free() {
            let update = ProfileUpdate {
                plan: Some(target),
                ..Default::default()
            };
            if !self
                .accounts
                .update_profile(account_id, update, self.clock.now())
                .await?
            {
                return Err(PlangateError::not_found("Profile not found"));
            }

            tracing::info!(
                target: "plangate::billing",
                account_id = %account_id,
                from = %current,
                to = %target,
                "Plan upgraded without charge"
            );
            return Ok(UpgradeOutcome::Applied { plan: target });
        }

        let email = self
            .accounts
            .get_account(account_id)
            .await?
            .map(|a| a.email);

        let mut meta = BTreeMap::new();
        for (key, value) in [
            (metadata::TYPE, metadata::TYPE_PLAN_UPGRADE.to_string()),
            (metadata::USER_ID, account_id.to_string()),
            (metadata::CURRENT_PLAN_ID, current.id().to_string()),
            (metadata::TARGET_PLAN_ID, target.id().to_string()),
            (metadata::BILLING_INTERVAL, interval.as_str().to_string()),
            (metadata::PRORATED_AMOUNT, quote.amount.to_string()),
            (metadata::DAYS_REMAINING, quote.days_remaining.to_string()),
            (metadata::TOTAL_DAYS, quote.total_days.to_string()),
        ] {
            meta.insert(key.to_string(), value);
        }

        let success_url = format!(
            "{}?upgrade=success&plan={}&session_id={{CHECKOUT_SESSION_ID}}",
            self.config.url_for("/dashboard/settings")?,
            target.id()
        );

        let redirect = self
            .processor
            .create_checkout_session(&CreateCheckoutSession {
                mode: CheckoutMode::Payment,
                line_item: LineItem {
                    name: format!(
                        "プランアップグレード: {} → {}",
                        current.display_name(),
                        target.display_name()
                    ),
                    description: Some(format!(
                        "{}プラン差額（残り{}日分 / {}日中）",
                        interval_label(interval),
                        quote.days_remaining,
                        quote.total_days
                    )),
                    unit_amount: quote.amount,
                    currency: self.config.currency.clone(),
                    recurring: None,
                },
                customer_email: email,
                customer_id: None,
                success_url,
                cancel_url: self.config.url_for("/dashboard/settings?upgrade=cancelled")?,
                metadata: meta,
                trial_period_days: None,
            })
            .await?;

        tracing::info!(
            target: "plangate::billing",
            account_id = %account_id,
            session_id = %redirect.session_id,
            from = %current,
            to = %target,
            amount = quote.amount,
            "Upgrade checkout created"
        );

        Ok(UpgradeOutcome::PaymentRequired {
            session_id: redirect.session_id,
            url: redirect.url,
            quote,
        })
    }

    /// Apply the plan bought by a paid upgrade session.
    ///
    /// Idempotent: when the account is already on the target plan or above,
    /// nothing is written. The plan change is a conditional write, so a
    /// concurrent apply from the other trigger cannot be lost or doubled.
    pub async fn apply_paid_upgrade(&self, session: &CheckoutSessionSnapshot) -> Result<AppliedUpgrade> {
        if !session.is_plan_upgrade() {
            return Err(PlangateError::bad_request("Session is not a plan upgrade"));
        }
        if !session.is_paid() {
            return Err(BillingError::SessionNotPaid {
                session_id: session.id.clone(),
            }
            .into());
        }

        let missing = || PlangateError::bad_request("Missing upgrade metadata");
        let account_id: AccountId = session
            .metadata_value(metadata::USER_ID)
            .and_then(|v| v.parse().ok())
            .ok_or_else(missing)?;
        let target: PlanTier = session
            .metadata_value(metadata::TARGET_PLAN_ID)
            .ok_or_else(missing)?
            .parse()?;
        let interval = session.billing_interval()?;

        let profile = self
            .accounts
            .get_profile(&account_id)
            .await?
            .ok_or_else(|| PlangateError::not_found("Profile not found"))?;

        if profile.plan >= target {
            tracing::debug!(
                target: "plangate::billing",
                account_id = %account_id,
                plan = %profile.plan,
                "Upgrade already applied"
            );
            return Ok(AppliedUpgrade {
                account_id,
                plan: profile.plan,
                changed: false,
            });
        }

        let now = self.clock.now();
        if !self
            .accounts
            .set_plan_if(&account_id, profile.plan, target, now)
            .await?
        {
            // Lost a race with the other trigger; report what it wrote.
            let plan = self
                .accounts
                .get_profile(&account_id)
                .await?
                .map(|p| p.plan)
                .unwrap_or(target);
            return Ok(AppliedUpgrade {
                account_id,
                plan,
                changed: false,
            });
        }

        let update = ProfileUpdate {
            billing_interval: Some(interval),
            ..Default::default()
        };
        self.accounts.update_profile(&account_id, update, now).await?;

        tracing::info!(
            target: "plangate::billing",
            account_id = %account_id,
            session_id = %session.id,
            from = %profile.plan,
            to = %target,
            "Paid upgrade applied"
        );

        Ok(AppliedUpgrade {
            account_id,
            plan: target,
            changed: true,
        })
    }

    /// Check an upgrade session after the customer returns from payment.
    pub async fn verify_upgrade(&self, session_id: &str) -> Result<UpgradeVerification> {
        let session = self.processor.retrieve_session(session_id).await?;
        if !session.is_paid() {
            return Ok(UpgradeVerification::Pending);
        }
        let applied = self.apply_paid_upgrade(&session).await?;
        Ok(UpgradeVerification::Ready { plan: applied.plan })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::processor::PaymentStatus;
    use crate::clock::FixedClock;
    use crate::error::ErrorKind;
    use crate::storage::{MemoryStore, NewAccount, OnboardingDetails, ProfileUpsert};
    use crate::testing::MockPaymentProcessor;
    use chrono::{TimeZone, Utc};

    async fn account_on(store: &MemoryStore, plan: PlanTier) -> AccountId {
        let id = AccountId::new();
        let now = Utc::now();
        store
            .create_account(NewAccount {
                id,
                email: format!("{id}@example.com"),
                password_hash: String::new(),
                created_at: now,
            })
            .await
            .unwrap();
        store
            .upsert_profile(&ProfileUpsert {
                account_id: id,
                email: format!("{id}@example.com"),
                plan,
                billing_interval: BillingInterval::Month,
                onboarding: OnboardingDetails::default(),
                payment_customer_id: None,
                updated_at: now,
            })
            .await
            .unwrap();
        id
    }

    fn manager(store: &MemoryStore, processor: &MockPaymentProcessor, day: u32) -> UpgradeManager {
        UpgradeManager::new(
            Arc::new(store.clone()),
            Arc::new(processor.clone()),
            CheckoutConfig::new("https://app.example.com"),
            Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 6, day, 9, 0, 0).unwrap())),
        )
    }

    #[tokio::test]
    async fn test_preview() {
        let store = MemoryStore::new();
        let account = account_on(&store, PlanTier::Starter).await;
        let preview = manager(&store, &MockPaymentProcessor::new(), 15)
            .preview(&account, "pro")
            .await
            .unwrap();

        assert_eq!(preview.current_plan.price, 5_000);
        assert_eq!(preview.target_plan.price, 20_000);
        assert_eq!(preview.full_price_difference, 15_000);
        assert_eq!(preview.total_days, 30);
        assert_eq!(preview.days_remaining, 15);
        assert_eq!(preview.prorated_amount, 7_500);
    }

    #[tokio::test]
    async fn test_preview_rejects_downgrade_and_unknown_plan() {
        let store = MemoryStore::new();
        let account = account_on(&store, PlanTier::Business).await;
        let mgr = manager(&store, &MockPaymentProcessor::new(), 15);

        let err = mgr.preview(&account, "pro").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = mgr.preview(&account, "gold").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_commit_on_last_day_applies_immediately() {
        let store = MemoryStore::new();
        let processor = MockPaymentProcessor::new();
        let account = account_on(&store, PlanTier::Starter).await;

        let outcome = manager(&store, &processor, 30).commit(&account, "pro").await.unwrap();
        assert_eq!(outcome, UpgradeOutcome::Applied { plan: PlanTier::Pro });
        let profile = store.get_profile(&account).await.unwrap().unwrap();
        assert_eq!(profile.plan, PlanTier::Pro);
        assert_eq!(profile.updated_at, Utc.with_ymd_and_hms(2026, 6, 30, 9, 0, 0).unwrap());
        assert!(processor.created_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_commit_creates_payment_session() {
        let store = MemoryStore::new();
        let processor = MockPaymentProcessor::new();
        let account = account_on(&store, PlanTier::Starter).await;

        let outcome = manager(&store, &processor, 15).commit(&account, "pro").await.unwrap();
        let UpgradeOutcome::PaymentRequired { quote, .. } = outcome else {
            panic!("expected payment, got {outcome:?}");
        };
        assert_eq!(quote.amount, 7_500);

        let session = &processor.created_sessions()[0];
        assert_eq!(session.mode, CheckoutMode::Payment);
        assert_eq!(session.line_item.unit_amount, 7_500);
        assert_eq!(session.line_item.recurring, None);
        assert_eq!(session.metadata[metadata::TYPE], "plan_upgrade");
        assert_eq!(session.metadata[metadata::USER_ID], account.to_string());
        assert_eq!(session.metadata[metadata::TARGET_PLAN_ID], "pro");
        assert_eq!(session.metadata[metadata::PRORATED_AMOUNT], "7500");

        // Plan unchanged until paid
        assert_eq!(store.get_profile(&account).await.unwrap().unwrap().plan, PlanTier::Starter);
    }

    #[tokio::test]
    async fn test_commit_enterprise_contacts_sales() {
        let store = MemoryStore::new();
        let account = account_on(&store, PlanTier::Starter).await;
        let outcome = manager(&store, &MockPaymentProcessor::new(), 15)
            .commit(&account, "enterprise")
            .await
            .unwrap();
        assert!(matches!(outcome, UpgradeOutcome::ContactSales { .. }));
    }

    fn paid_upgrade(account: AccountId, target: &str) -> CheckoutSessionSnapshot {
        CheckoutSessionSnapshot::new("cs_upgrade", PaymentStatus::Paid)
            .with_metadata(metadata::TYPE, metadata::TYPE_PLAN_UPGRADE)
            .with_metadata(metadata::USER_ID, account.to_string())
            .with_metadata(metadata::TARGET_PLAN_ID, target)
            .with_metadata(metadata::BILLING_INTERVAL, "year")
    }

    #[tokio::test]
    async fn test_apply_paid_upgrade_is_idempotent() {
        let store = MemoryStore::new();
        let account = account_on(&store, PlanTier::Starter).await;
        let mgr = manager(&store, &MockPaymentProcessor::new(), 15);
        let session = paid_upgrade(account, "business");

        let first = mgr.apply_paid_upgrade(&session).await.unwrap();
        assert!(first.changed);
        let second = mgr.apply_paid_upgrade(&session).await.unwrap();
        assert!(!second.changed);
        assert_eq!(second.plan, PlanTier::Business);

        let profile = store.get_profile(&account).await.unwrap().unwrap();
        assert_eq!(profile.plan, PlanTier::Business);
        assert_eq!(profile.billing_interval, BillingInterval::Year);
        assert_eq!(profile.updated_at, Utc.with_ymd_and_hms(2026, 6, 15, 9, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_verify_upgrade_pending_then_ready() {
        let store = MemoryStore::new();
        let processor = MockPaymentProcessor::new();
        let account = account_on(&store, PlanTier::Starter).await;
        let mgr = manager(&store, &processor, 15);

        let mut session = paid_upgrade(account, "pro");
        session.payment_status = PaymentStatus::Unpaid;
        processor.put_session(session.clone());
        assert_eq!(mgr.verify_upgrade("cs_upgrade").await.unwrap(), UpgradeVerification::Pending);

        session.payment_status = PaymentStatus::Paid;
        processor.put_session(session);
        assert_eq!(
            mgr.verify_upgrade("cs_upgrade").await.unwrap(),
            UpgradeVerification::Ready { plan: PlanTier::Pro }
        );
    }

    #[tokio::test]
    async fn test_apply_rejects_signup_session() {
        let store = MemoryStore::new();
        let mgr = manager(&store, &MockPaymentProcessor::new(), 15);
        let session = CheckoutSessionSnapshot::new("cs_signup", PaymentStatus::Paid);
        let err = mgr.apply_paid_upgrade(&session).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
