//! Storage contracts for accounts, credentials, usage and checkout state.
//!
//! Implement these traits over your database. Each method maps to a single
//! row operation; uniqueness (one account per email, one checkout record per
//! session id, one processed marker per event id) must be enforced by the
//! store itself, since provisioning relies on it instead of locks.
//!
//! [`MemoryStore`] implements every trait for development and tests.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::billing::{BillingInterval, PlanTier};
use crate::error::{PlangateError, Result};
use crate::generation::{GenerationKind, GenerationStatus};

/// Identifier of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for AccountId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Identity row: who can log in.
#[derive(Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password_hash", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Insert shape for [`Account`].
#[derive(Clone)]
pub struct NewAccount {
    pub id: AccountId,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Result of trying to create an account.
///
/// `AlreadyExists` is the normal convergence path when two provisioning
/// triggers race, not a failure.
#[derive(Debug, Clone)]
pub enum CreateAccountOutcome {
    Created(Account),
    AlreadyExists,
}

/// Onboarding answers collected before checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnboardingDetails {
    pub brand_name: Option<String>,
    pub brand_website: Option<String>,
    pub brand_description: Option<String>,
    pub categories: Vec<String>,
    pub target_audience: Vec<String>,
    pub price_range: Option<String>,
    pub monthly_volume: Option<String>,
    pub styles: Vec<String>,
    pub platforms: Vec<String>,
}

/// Plan and onboarding state for an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub account_id: AccountId,
    pub email: String,
    pub plan: PlanTier,
    pub billing_interval: BillingInterval,
    pub role: Role,
    pub onboarding: OnboardingDetails,
    pub payment_customer_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert shape for [`Profile`].
///
/// An upsert never touches the role of an existing profile, and keeps the
/// stored customer id when `payment_customer_id` is `None`.
#[derive(Debug, Clone)]
pub struct ProfileUpsert {
    pub account_id: AccountId,
    pub email: String,
    pub plan: PlanTier,
    pub billing_interval: BillingInterval,
    pub onboarding: OnboardingDetails,
    pub payment_customer_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update for an existing profile. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub plan: Option<PlanTier>,
    pub billing_interval: Option<BillingInterval>,
    pub onboarding: Option<OnboardingDetails>,
    pub payment_customer_id: Option<String>,
}

impl From<&ProfileUpsert> for ProfileUpdate {
    fn from(upsert: &ProfileUpsert) -> Self {
        Self {
            plan: Some(upsert.plan),
            billing_interval: Some(upsert.billing_interval),
            onboarding: Some(upsert.onboarding.clone()),
            payment_customer_id: upsert.payment_customer_id.clone(),
        }
    }
}

/// Failure of a write that may hit a uniqueness or foreign-key constraint.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error(transparent)]
    Store(#[from] PlangateError),
}

impl From<WriteError> for PlangateError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::Constraint(msg) => PlangateError::datastore(msg),
            WriteError::Store(err) => err,
        }
    }
}

/// Persisted API credential. Never contains the plaintext secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredApiKey {
    pub id: Uuid,
    pub account_id: AccountId,
    pub name: String,
    /// Leading slice of the secret, used for lookup and display.
    pub key_prefix: String,
    /// Hex-encoded SHA-256 of the full secret.
    pub key_hash: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// One generation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub id: Uuid,
    pub account_id: AccountId,
    pub kind: GenerationKind,
    pub status: GenerationStatus,
    pub prompt: String,
    pub output_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Status change written by the generation pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationUpdate {
    pub status: GenerationStatus,
    pub output_url: Option<String>,
    pub error_message: Option<String>,
}

/// Ties a processor checkout session to the account it provisioned.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSessionRecord {
    pub session_id: String,
    pub account_id: AccountId,
    pub email: String,
    /// One-time login secret handed to the polling client.
    pub temp_credential: String,
    /// Set once `temp_credential` authenticates. Until then the record is
    /// only a claim and its credential must not be handed out.
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for CheckoutSessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckoutSessionRecord")
            .field("session_id", &self.session_id)
            .field("account_id", &self.account_id)
            .field("email", &self.email)
            .field("temp_credential", &"[REDACTED]")
            .field("processed", &self.processed)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Result of an insert-if-absent on the checkout session table.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// This caller's record was written.
    Inserted,
    /// A record for the session already existed; it is returned unchanged.
    Existing(CheckoutSessionRecord),
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>>;

    /// Case-insensitive lookup.
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Create an account unless one with the same email exists.
    async fn create_account(&self, account: NewAccount) -> Result<CreateAccountOutcome>;

    async fn set_password_hash(&self, id: &AccountId, password_hash: &str) -> Result<()>;

    async fn get_profile(&self, id: &AccountId) -> Result<Option<Profile>>;

    async fn find_profile_by_customer(&self, customer_id: &str) -> Result<Option<Profile>>;

    /// Insert or merge a profile keyed by account id.
    async fn upsert_profile(&self, profile: &ProfileUpsert) -> std::result::Result<(), WriteError>;

    /// Update an existing profile, stamping `updated_at`. Returns `false`
    /// when no profile exists.
    async fn update_profile(
        &self,
        id: &AccountId,
        update: ProfileUpdate,
        updated_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Change the plan only if it currently equals `expected`.
    ///
    /// Must be a single conditional write. Returns whether the plan changed.
    async fn set_plan_if(
        &self,
        id: &AccountId,
        expected: PlanTier,
        plan: PlanTier,
        updated_at: DateTime<Utc>,
    ) -> Result<bool>;
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn insert_api_key(&self, key: &StoredApiKey) -> Result<()>;

    async fn find_api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<StoredApiKey>>;

    /// Keys for an account, newest first.
    async fn list_api_keys(&self, account_id: &AccountId) -> Result<Vec<StoredApiKey>>;

    /// Delete a key owned by `account_id`. Returns `false` if nothing matched.
    async fn delete_api_key(&self, account_id: &AccountId, key_id: &Uuid) -> Result<bool>;

    async fn touch_api_key(&self, key_id: &Uuid, used_at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait GenerationStore: Send + Sync {
    async fn insert_generation(&self, record: &GenerationRecord) -> Result<()>;

    async fn update_generation(&self, id: &Uuid, update: GenerationUpdate) -> Result<()>;

    /// Count records of `kind` for the account with `since <= created_at <= until`,
    /// whatever their status.
    async fn count_generations(
        &self,
        account_id: &AccountId,
        kind: GenerationKind,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64>;
}

#[async_trait]
pub trait CheckoutSessionStore: Send + Sync {
    async fn get_checkout_session(&self, session_id: &str) -> Result<Option<CheckoutSessionRecord>>;

    /// Insert the record unless one exists for the same session id.
    ///
    /// Must be atomic: two concurrent callers never both see `Inserted`.
    async fn insert_checkout_session_if_absent(
        &self,
        record: &CheckoutSessionRecord,
    ) -> Result<ClaimOutcome>;

    /// Flag a claimed record as provisioned once its credential is live.
    async fn mark_checkout_session_processed(&self, session_id: &str) -> Result<()>;

    async fn delete_checkout_session(&self, session_id: &str) -> Result<()>;
}

/// Webhook idempotency markers.
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    async fn is_event_processed(&self, event_id: &str) -> Result<bool>;

    async fn mark_event_processed(&self, event_id: &str) -> Result<()>;
}
