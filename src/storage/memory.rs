use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::{
    Account, AccountId, AccountStore, ApiKeyStore, CheckoutSessionRecord, CheckoutSessionStore,
    ClaimOutcome, CreateAccountOutcome, GenerationRecord, GenerationStore, GenerationUpdate,
    NewAccount, ProcessedEventStore, Profile, ProfileUpdate, ProfileUpsert, Role, StoredApiKey,
    WriteError,
};
use crate::billing::PlanTier;
use crate::error::{PlangateError, Result};
use crate::generation::GenerationKind;

/// In-memory implementation of every storage trait.
///
/// Wraps data in Arc for cheap cloning; clones share state. Uniqueness
/// constraints behave like a relational store: one account per
/// (case-insensitive) email and one checkout record per session id.
#[derive(Default, Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    accounts: RwLock<HashMap<AccountId, Account>>,
    profiles: RwLock<HashMap<AccountId, Profile>>,
    api_keys: RwLock<HashMap<Uuid, StoredApiKey>>,
    generations: RwLock<HashMap<Uuid, GenerationRecord>>,
    checkout_sessions: RwLock<HashMap<String, CheckoutSessionRecord>>,
    processed_events: RwLock<HashSet<String>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| PlangateError::datastore("memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| PlangateError::datastore("memory store lock poisoned"))
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accounts (for tests).
    pub fn account_count(&self) -> usize {
        read(&self.inner.accounts).map(|a| a.len()).unwrap_or(0)
    }

    /// All generation records (for tests).
    pub fn generations(&self) -> Vec<GenerationRecord> {
        read(&self.inner.generations)
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Set an account's role directly (for tests and seeding).
    pub fn set_role(&self, id: &AccountId, role: Role) -> Result<()> {
        let mut profiles = write(&self.inner.profiles)?;
        let profile = profiles
            .get_mut(id)
            .ok_or_else(|| PlangateError::not_found("Profile not found"))?;
        profile.role = role;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        Ok(read(&self.inner.accounts)?.get(id).cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        Ok(read(&self.inner.accounts)?
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create_account(&self, account: NewAccount) -> Result<CreateAccountOutcome> {
        let mut accounts = write(&self.inner.accounts)?;
        if accounts
            .values()
            .any(|a| a.email.eq_ignore_ascii_case(&account.email))
        {
            return Ok(CreateAccountOutcome::AlreadyExists);
        }

        let created = Account {
            id: account.id,
            email: account.email,
            password_hash: account.password_hash,
            created_at: account.created_at,
        };
        accounts.insert(created.id, created.clone());
        Ok(CreateAccountOutcome::Created(created))
    }

    async fn set_password_hash(&self, id: &AccountId, password_hash: &str) -> Result<()> {
        let mut accounts = write(&self.inner.accounts)?;
        let account = accounts
            .get_mut(id)
            .ok_or_else(|| PlangateError::not_found("Account not found"))?;
        account.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn get_profile(&self, id: &AccountId) -> Result<Option<Profile>> {
        Ok(read(&self.inner.profiles)?.get(id).cloned())
    }

    async fn find_profile_by_customer(&self, customer_id: &str) -> Result<Option<Profile>> {
        Ok(read(&self.inner.profiles)?
            .values()
            .find(|p| p.payment_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn upsert_profile(&self, upsert: &ProfileUpsert) -> std::result::Result<(), WriteError> {
        // Profiles reference accounts, like a foreign key would
        if !read(&self.inner.accounts)?.contains_key(&upsert.account_id) {
            return Err(WriteError::Constraint(format!(
                "profile references unknown account {}",
                upsert.account_id
            )));
        }

        let mut profiles = write(&self.inner.profiles)?;
        match profiles.get_mut(&upsert.account_id) {
            Some(existing) => {
                existing.email = upsert.email.clone();
                existing.plan = upsert.plan;
                existing.billing_interval = upsert.billing_interval;
                existing.onboarding = upsert.onboarding.clone();
                if upsert.payment_customer_id.is_some() {
                    existing.payment_customer_id = upsert.payment_customer_id.clone();
                }
                existing.updated_at = upsert.updated_at;
            }
            None => {
                profiles.insert(
                    upsert.account_id,
                    Profile {
                        account_id: upsert.account_id,
                        email: upsert.email.clone(),
                        plan: upsert.plan,
                        billing_interval: upsert.billing_interval,
                        role: Role::User,
                        onboarding: upsert.onboarding.clone(),
                        payment_customer_id: upsert.payment_customer_id.clone(),
                        updated_at: upsert.updated_at,
                    },
                );
            }
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        id: &AccountId,
        update: ProfileUpdate,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut profiles = write(&self.inner.profiles)?;
        let Some(profile) = profiles.get_mut(id) else {
            return Ok(false);
        };

        if let Some(plan) = update.plan {
            profile.plan = plan;
        }
        if let Some(interval) = update.billing_interval {
            profile.billing_interval = interval;
        }
        if let Some(onboarding) = update.onboarding {
            profile.onboarding = onboarding;
        }
        if let Some(customer_id) = update.payment_customer_id {
            profile.payment_customer_id = Some(customer_id);
        }
        profile.updated_at = updated_at;
        Ok(true)
    }

    async fn set_plan_if(
        &self,
        id: &AccountId,
        expected: PlanTier,
        plan: PlanTier,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut profiles = write(&self.inner.profiles)?;
        match profiles.get_mut(id) {
            Some(profile) if profile.plan == expected => {
                profile.plan = plan;
                profile.updated_at = updated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn insert_api_key(&self, key: &StoredApiKey) -> Result<()> {
        let mut keys = write(&self.inner.api_keys)?;
        if keys.values().any(|k| k.key_hash == key.key_hash) {
            return Err(PlangateError::datastore("duplicate api key hash"));
        }
        keys.insert(key.id, key.clone());
        Ok(())
    }

    async fn find_api_keys_by_prefix(&self, prefix: &str) -> Result<Vec<StoredApiKey>> {
        Ok(read(&self.inner.api_keys)?
            .values()
            .filter(|k| k.key_prefix == prefix)
            .cloned()
            .collect())
    }

    async fn list_api_keys(&self, account_id: &AccountId) -> Result<Vec<StoredApiKey>> {
        let mut keys: Vec<StoredApiKey> = read(&self.inner.api_keys)?
            .values()
            .filter(|k| &k.account_id == account_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn delete_api_key(&self, account_id: &AccountId, key_id: &Uuid) -> Result<bool> {
        let mut keys = write(&self.inner.api_keys)?;
        match keys.get(key_id) {
            Some(key) if &key.account_id == account_id => {
                keys.remove(key_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch_api_key(&self, key_id: &Uuid, used_at: DateTime<Utc>) -> Result<()> {
        if let Some(key) = write(&self.inner.api_keys)?.get_mut(key_id) {
            key.last_used_at = Some(used_at);
        }
        Ok(())
    }
}

#[async_trait]
impl GenerationStore for MemoryStore {
    async fn insert_generation(&self, record: &GenerationRecord) -> Result<()> {
        write(&self.inner.generations)?.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_generation(&self, id: &Uuid, update: GenerationUpdate) -> Result<()> {
        let mut generations = write(&self.inner.generations)?;
        let record = generations
            .get_mut(id)
            .ok_or_else(|| PlangateError::not_found("Generation not found"))?;
        record.status = update.status;
        record.output_url = update.output_url;
        record.error_message = update.error_message;
        Ok(())
    }

    async fn count_generations(
        &self,
        account_id: &AccountId,
        kind: GenerationKind,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64> {
        Ok(read(&self.inner.generations)?
            .values()
            .filter(|g| {
                &g.account_id == account_id
                    && g.kind == kind
                    && g.created_at >= since
                    && g.created_at <= until
            })
            .count() as u64)
    }
}

#[async_trait]
impl CheckoutSessionStore for MemoryStore {
    async fn get_checkout_session(&self, session_id: &str) -> Result<Option<CheckoutSessionRecord>> {
        Ok(read(&self.inner.checkout_sessions)?.get(session_id).cloned())
    }

    async fn insert_checkout_session_if_absent(
        &self,
        record: &CheckoutSessionRecord,
    ) -> Result<ClaimOutcome> {
        let mut sessions = write(&self.inner.checkout_sessions)?;
        if let Some(existing) = sessions.get(&record.session_id) {
            return Ok(ClaimOutcome::Existing(existing.clone()));
        }
        sessions.insert(record.session_id.clone(), record.clone());
        Ok(ClaimOutcome::Inserted)
    }

    async fn mark_checkout_session_processed(&self, session_id: &str) -> Result<()> {
        let mut sessions = write(&self.inner.checkout_sessions)?;
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| PlangateError::datastore("Checkout session record not found"))?;
        record.processed = true;
        Ok(())
    }

    async fn delete_checkout_session(&self, session_id: &str) -> Result<()> {
        write(&self.inner.checkout_sessions)?.remove(session_id);
        Ok(())
    }
}

#[async_trait]
impl ProcessedEventStore for MemoryStore {
    async fn is_event_processed(&self, event_id: &str) -> Result<bool> {
        Ok(read(&self.inner.processed_events)?.contains(event_id))
    }

    async fn mark_event_processed(&self, event_id: &str) -> Result<()> {
        write(&self.inner.processed_events)?.insert(event_id.to_string());
        Ok(())
    }
}
