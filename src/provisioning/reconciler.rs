//! Turns a paid checkout session into a login-ready account.
//!
//! Two triggers race to do this: the payment webhook and the client polling
//! after redirect. Either may run first, both may run at once, and either may
//! be retried. Convergence rests on two persisted uniqueness guarantees, one
//! account per email and one checkout record per session id, not on locks:
//!
//! 1. A processed checkout record short-circuits with its stored credential.
//! 2. Find-or-create the account by email (`AlreadyExists` is normal).
//! 3. Upsert the profile from checkout metadata.
//! 4. Claim the session by inserting an unprocessed checkout record. Only the
//!    claimant rotates the password; everyone else reports the session as in
//!    progress until the record is marked processed.
//! 5. Rotate the password, then mark the record processed. The stored
//!    credential is handed out only from that point on.
//! 6. Send the welcome email, best effort.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::auth::{AlphabetGenerator, CredentialGenerator, PasswordHasher};
use crate::billing::{BillingError, BillingInterval, CheckoutSessionSnapshot, PaymentProcessor, PlanTier};
use crate::clock::Clock;
use crate::email::{Mailer, WelcomeTemplate};
use crate::error::{PlangateError, Result};
use crate::storage::{
    AccountId, AccountStore, CheckoutSessionRecord, CheckoutSessionStore, ClaimOutcome,
    CreateAccountOutcome, NewAccount, OnboardingDetails, ProfileUpdate, ProfileUpsert, WriteError,
};

/// The parts of a paid checkout session that provisioning needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaidSession {
    pub session_id: String,
    pub email: String,
    pub plan: PlanTier,
    pub billing_interval: BillingInterval,
    pub onboarding: OnboardingDetails,
    pub customer_id: Option<String>,
}

impl PaidSession {
    /// Validate a processor snapshot.
    pub fn from_snapshot(session: &CheckoutSessionSnapshot) -> std::result::Result<Self, BillingError> {
        if session.is_plan_upgrade() {
            return Err(BillingError::UpgradeSession {
                session_id: session.id.clone(),
            });
        }
        if !session.is_paid() {
            return Err(BillingError::SessionNotPaid {
                session_id: session.id.clone(),
            });
        }
        let email = session.email().ok_or_else(|| BillingError::MissingCustomerEmail {
            session_id: session.id.clone(),
        })?;

        Ok(Self {
            session_id: session.id.clone(),
            email: email.trim().to_string(),
            plan: session.signup_plan()?,
            billing_interval: session.billing_interval()?,
            onboarding: session.onboarding(),
            customer_id: session.customer.clone(),
        })
    }
}

/// A provisioned session: who to log in as, and with what.
#[derive(Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub account_id: AccountId,
    pub email: String,
    pub temp_credential: String,
    /// Whether this call did the provisioning.
    pub created: bool,
}

impl fmt::Debug for Provisioned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provisioned")
            .field("account_id", &self.account_id)
            .field("email", &self.email)
            .field("temp_credential", &"[REDACTED]")
            .field("created", &self.created)
            .finish()
    }
}

impl Provisioned {
    fn from_record(record: CheckoutSessionRecord) -> Self {
        Self {
            account_id: record.account_id,
            email: record.email,
            temp_credential: record.temp_credential,
            created: false,
        }
    }
}

/// Result of a provisioning attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The account exists and the credential authenticates.
    Ready(Provisioned),
    /// Another caller holds the claim and has not finished setting the
    /// credential. Nothing was handed out; try again later.
    InProgress,
}

impl ProvisionOutcome {
    fn from_record(record: CheckoutSessionRecord) -> Self {
        if record.processed {
            Self::Ready(Provisioned::from_record(record))
        } else {
            Self::InProgress
        }
    }
}

/// Answer to a client polling a checkout session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SessionPollStatus {
    /// Payment not confirmed yet.
    Pending,
    /// Paid, account not ready yet; poll again.
    Processing,
    Ready {
        email: String,
        #[serde(rename = "tempPassword")]
        temp_credential: String,
    },
    /// Terminal failure; polling should stop.
    Error { message: String },
}

impl fmt::Debug for SessionPollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("Pending"),
            Self::Processing => f.write_str("Processing"),
            Self::Ready { email, .. } => f
                .debug_struct("Ready")
                .field("email", email)
                .field("temp_credential", &"[REDACTED]")
                .finish(),
            Self::Error { message } => f.debug_struct("Error").field("message", message).finish(),
        }
    }
}

impl From<Provisioned> for SessionPollStatus {
    fn from(p: Provisioned) -> Self {
        Self::Ready {
            email: p.email,
            temp_credential: p.temp_credential,
        }
    }
}

impl From<ProvisionOutcome> for SessionPollStatus {
    fn from(outcome: ProvisionOutcome) -> Self {
        match outcome {
            ProvisionOutcome::Ready(provisioned) => provisioned.into(),
            ProvisionOutcome::InProgress => Self::Processing,
        }
    }
}

/// Idempotent account provisioning for paid checkout sessions.
#[derive(Clone)]
pub struct Reconciler {
    accounts: Arc<dyn AccountStore>,
    sessions: Arc<dyn CheckoutSessionStore>,
    processor: Arc<dyn PaymentProcessor>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    credentials: Arc<dyn CredentialGenerator>,
    hasher: PasswordHasher,
    welcome: WelcomeTemplate,
}

impl Reconciler {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        sessions: Arc<dyn CheckoutSessionStore>,
        processor: Arc<dyn PaymentProcessor>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            accounts,
            sessions,
            processor,
            mailer,
            clock,
            credentials: Arc::new(AlphabetGenerator::default()),
            hasher: PasswordHasher::default(),
            welcome: WelcomeTemplate::default(),
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, generator: Arc<dyn CredentialGenerator>) -> Self {
        self.credentials = generator;
        self
    }

    #[must_use]
    pub fn with_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    #[must_use]
    pub fn with_welcome(mut self, welcome: WelcomeTemplate) -> Self {
        self.welcome = welcome;
        self
    }

    /// Provision the account for a paid session, or return what an earlier
    /// run produced.
    ///
    /// Safe to call any number of times, concurrently, from either trigger.
    /// A credential is only returned once it authenticates. On error the
    /// session stays unprovisioned and a later call retries.
    pub async fn provision(&self, paid: &PaidSession) -> Result<ProvisionOutcome> {
        if let Some(record) = self.sessions.get_checkout_session(&paid.session_id).await? {
            tracing::debug!(
                target: "plangate::provisioning",
                session_id = %paid.session_id,
                processed = record.processed,
                "Session already claimed"
            );
            return Ok(ProvisionOutcome::from_record(record));
        }

        let temp_credential = self.credentials.generate();
        let password_hash = self.hasher.hash(&temp_credential)?;
        let now = self.clock.now();

        let account_id = self.find_or_create_account(&paid.email).await?;
        self.write_profile(account_id, paid).await?;

        let claim = CheckoutSessionRecord {
            session_id: paid.session_id.clone(),
            account_id,
            email: paid.email.clone(),
            temp_credential: temp_credential.clone(),
            processed: false,
            created_at: now,
        };

        match self.sessions.insert_checkout_session_if_absent(&claim).await? {
            ClaimOutcome::Existing(existing) => {
                tracing::debug!(
                    target: "plangate::provisioning",
                    session_id = %paid.session_id,
                    processed = existing.processed,
                    "Lost provisioning race"
                );
                return Ok(ProvisionOutcome::from_record(existing));
            }
            ClaimOutcome::Inserted => {}
        }

        if let Err(err) = self.activate(account_id, &paid.session_id, &password_hash).await {
            tracing::error!(
                target: "plangate::provisioning",
                session_id = %paid.session_id,
                account_id = %account_id,
                error = %err,
                "Failed to activate temporary credential, releasing session"
            );
            if let Err(release_err) = self.sessions.delete_checkout_session(&paid.session_id).await {
                tracing::error!(
                    target: "plangate::provisioning",
                    session_id = %paid.session_id,
                    error = %release_err,
                    "Failed to release checkout session"
                );
            }
            return Err(err);
        }

        tracing::info!(
            target: "plangate::provisioning",
            session_id = %paid.session_id,
            account_id = %account_id,
            plan = %paid.plan,
            "Account provisioned"
        );

        self.send_welcome(paid, &temp_credential).await;

        Ok(ProvisionOutcome::Ready(Provisioned {
            account_id,
            email: paid.email.clone(),
            temp_credential,
            created: true,
        }))
    }

    /// Rotate the password, then publish the claimed record.
    async fn activate(&self, account_id: AccountId, session_id: &str, password_hash: &str) -> Result<()> {
        self.accounts.set_password_hash(&account_id, password_hash).await?;
        self.sessions.mark_checkout_session_processed(session_id).await
    }

    async fn find_or_create_account(&self, email: &str) -> Result<AccountId> {
        let new_account = NewAccount {
            id: AccountId::new(),
            email: email.to_string(),
            // No login until a checkout record is claimed for this account
            password_hash: String::new(),
            created_at: self.clock.now(),
        };

        match self.accounts.create_account(new_account).await? {
            CreateAccountOutcome::Created(account) => Ok(account.id),
            CreateAccountOutcome::AlreadyExists => {
                tracing::debug!(
                    target: "plangate::provisioning",
                    "Account already exists for checkout email"
                );
                self.accounts
                    .find_account_by_email(email)
                    .await?
                    .map(|a| a.id)
                    .ok_or_else(|| PlangateError::datastore("Account reported as existing but not found"))
            }
        }
    }

    async fn write_profile(&self, account_id: AccountId, paid: &PaidSession) -> Result<()> {
        let upsert = ProfileUpsert {
            account_id,
            email: paid.email.clone(),
            plan: paid.plan,
            billing_interval: paid.billing_interval,
            onboarding: paid.onboarding.clone(),
            payment_customer_id: paid.customer_id.clone(),
            updated_at: self.clock.now(),
        };

        match self.accounts.upsert_profile(&upsert).await {
            Ok(()) => Ok(()),
            Err(WriteError::Constraint(reason)) => {
                tracing::warn!(
                    target: "plangate::provisioning",
                    account_id = %account_id,
                    reason = %reason,
                    "Profile upsert rejected, falling back to update"
                );
                if self
                    .accounts
                    .update_profile(&account_id, ProfileUpdate::from(&upsert), upsert.updated_at)
                    .await?
                {
                    Ok(())
                } else {
                    Err(PlangateError::datastore(format!(
                        "Profile for account {} could not be written",
                        account_id
                    )))
                }
            }
            Err(WriteError::Store(err)) => Err(err),
        }
    }

    async fn send_welcome(&self, paid: &PaidSession, temp_credential: &str) {
        let email = self
            .welcome
            .render(&paid.email, temp_credential, paid.onboarding.brand_name.as_deref());
        match self.mailer.send(&email).await {
            Ok(message_id) => tracing::info!(
                target: "plangate::provisioning",
                session_id = %paid.session_id,
                message_id = %message_id,
                "Welcome email sent"
            ),
            Err(err) => tracing::warn!(
                target: "plangate::provisioning",
                session_id = %paid.session_id,
                error = %err,
                "Failed to send welcome email"
            ),
        }
    }

    /// Provision from a processor snapshot delivered by the webhook.
    pub async fn provision_snapshot(&self, session: &CheckoutSessionSnapshot) -> Result<ProvisionOutcome> {
        let paid = PaidSession::from_snapshot(session)?;
        self.provision(&paid).await
    }

    /// Poll fallback: report the session state, provisioning if needed.
    ///
    /// Errors mean polling should stop: the processor could not be reached
    /// or the session can never be provisioned.
    pub async fn poll_status(&self, session_id: &str) -> Result<SessionPollStatus> {
        let session = self.processor.retrieve_session(session_id).await?;
        if !session.is_paid() {
            return Ok(SessionPollStatus::Pending);
        }

        let paid = PaidSession::from_snapshot(&session)?;

        if let Some(record) = self.sessions.get_checkout_session(session_id).await? {
            return Ok(ProvisionOutcome::from_record(record).into());
        }

        match self.provision(&paid).await {
            Ok(outcome) => Ok(outcome.into()),
            Err(err) => {
                tracing::warn!(
                    target: "plangate::provisioning",
                    session_id = %session_id,
                    error = %err,
                    "Provisioning from poll failed, will retry"
                );
                Ok(SessionPollStatus::Processing)
            }
        }
    }

    /// Check an email and password against the stored hash.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Option<AccountId>> {
        let Some(account) = self.accounts.find_account_by_email(email).await? else {
            return Ok(None);
        };
        Ok(self
            .hasher
            .verify(password, &account.password_hash)
            .then_some(account.id))
    }
}
