//! API key issuing and verification.
//!
//! Keys look like `sk_live_` followed by 64 lowercase hex characters. Only the
//! SHA-256 of the key is stored, together with its first 16 characters for
//! lookup. Verification fails closed: any malformed input, store error or
//! mismatch is reported as [`KeyVerification::Invalid`].

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::billing::PlanTier;
use crate::clock::Clock;
use crate::error::{PlangateError, Result};
use crate::storage::{AccountId, AccountStore, ApiKeyStore, Role, StoredApiKey};

/// Marker at the start of every key.
pub const KEY_PREFIX: &str = "sk_live_";
/// Characters of the key kept in clear for lookup.
pub const LOOKUP_PREFIX_LEN: usize = 16;
const SECRET_BYTES: usize = 32;
const KEY_LEN: usize = KEY_PREFIX.len() + SECRET_BYTES * 2;
const MAX_NAME_LEN: usize = 100;

/// A newly issued key. The plaintext is only available here.
pub struct IssuedApiKey {
    pub key: String,
    pub record: StoredApiKey,
}

impl fmt::Debug for IssuedApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedApiKey")
            .field("key", &"[REDACTED]")
            .field("record", &self.record)
            .finish()
    }
}

/// Outcome of checking a presented key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyVerification {
    Invalid,
    Valid {
        account_id: AccountId,
        tier: PlanTier,
        role: Role,
        key_id: Uuid,
    },
}

impl KeyVerification {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

/// Key listing entry. Never includes the hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeySummary {
    pub id: Uuid,
    pub name: String,
    /// Lookup prefix followed by `...`.
    pub prefix: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<StoredApiKey> for ApiKeySummary {
    fn from(key: StoredApiKey) -> Self {
        Self {
            id: key.id,
            name: key.name,
            prefix: format!("{}...", key.key_prefix),
            last_used_at: key.last_used_at,
            created_at: key.created_at,
        }
    }
}

/// Hex-encoded SHA-256 of a key.
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn is_well_formed(key: &str) -> bool {
    key.len() == KEY_LEN
        && key.starts_with(KEY_PREFIX)
        && key[KEY_PREFIX.len()..]
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn generate_key() -> String {
    let mut secret = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut secret);
    format!("{}{}", KEY_PREFIX, hex::encode(secret))
}

/// Issues, verifies and revokes API keys.
#[derive(Clone)]
pub struct ApiKeyVault {
    keys: Arc<dyn ApiKeyStore>,
    accounts: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
}

impl ApiKeyVault {
    pub fn new(keys: Arc<dyn ApiKeyStore>, accounts: Arc<dyn AccountStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            keys,
            accounts,
            clock,
        }
    }

    /// Create a key for an account.
    pub async fn issue(&self, account_id: &AccountId, name: &str) -> Result<IssuedApiKey> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PlangateError::bad_request("Name is required"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(PlangateError::bad_request(format!(
                "Name must be at most {} characters",
                MAX_NAME_LEN
            )));
        }

        let key = generate_key();
        let record = StoredApiKey {
            id: Uuid::new_v4(),
            account_id: *account_id,
            name: name.to_string(),
            key_prefix: key[..LOOKUP_PREFIX_LEN].to_string(),
            key_hash: hash_key(&key),
            created_at: self.clock.now(),
            last_used_at: None,
        };
        self.keys.insert_api_key(&record).await?;

        tracing::info!(
            target: "plangate::auth",
            account_id = %account_id,
            key_id = %record.id,
            prefix = %record.key_prefix,
            "API key issued"
        );

        Ok(IssuedApiKey { key, record })
    }

    /// Resolve a presented key to its owner and current plan.
    ///
    /// Never errors. A successful check records last use on a detached task.
    pub async fn verify(&self, presented: &str) -> KeyVerification {
        if !is_well_formed(presented) {
            return KeyVerification::Invalid;
        }

        let candidates = match self.keys.find_api_keys_by_prefix(&presented[..LOOKUP_PREFIX_LEN]).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(target: "plangate::auth", error = %e, "API key lookup failed");
                return KeyVerification::Invalid;
            }
        };

        let presented_hash = hash_key(presented);
        let Some(matched) = candidates
            .into_iter()
            .find(|k| bool::from(presented_hash.as_bytes().ct_eq(k.key_hash.as_bytes())))
        else {
            return KeyVerification::Invalid;
        };

        let (tier, role) = match self.accounts.get_profile(&matched.account_id).await {
            Ok(Some(profile)) => (profile.plan, profile.role),
            Ok(None) => (PlanTier::lowest(), Role::User),
            Err(e) => {
                tracing::warn!(
                    target: "plangate::auth",
                    account_id = %matched.account_id,
                    error = %e,
                    "Plan lookup failed during API key verification"
                );
                return KeyVerification::Invalid;
            }
        };

        self.record_use(matched.id);

        KeyVerification::Valid {
            account_id: matched.account_id,
            tier,
            role,
            key_id: matched.id,
        }
    }

    fn record_use(&self, key_id: Uuid) {
        let keys = Arc::clone(&self.keys);
        let used_at = self.clock.now();
        tokio::spawn(async move {
            if let Err(e) = keys.touch_api_key(&key_id, used_at).await {
                tracing::warn!(
                    target: "plangate::auth",
                    key_id = %key_id,
                    error = %e,
                    "Failed to record API key use"
                );
            }
        });
    }

    /// Delete a key owned by the account.
    pub async fn revoke(&self, account_id: &AccountId, key_id: &Uuid) -> Result<()> {
        if !self.keys.delete_api_key(account_id, key_id).await? {
            return Err(PlangateError::not_found("API key not found"));
        }
        tracing::info!(
            target: "plangate::auth",
            account_id = %account_id,
            key_id = %key_id,
            "API key revoked"
        );
        Ok(())
    }

    /// Keys for the account, newest first.
    pub async fn list(&self, account_id: &AccountId) -> Result<Vec<ApiKeySummary>> {
        Ok(self
            .keys
            .list_api_keys(account_id)
            .await?
            .into_iter()
            .map(ApiKeySummary::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::BillingInterval;
    use crate::clock::FixedClock;
    use crate::storage::{MemoryStore, OnboardingDetails, ProfileUpsert};
    use async_trait::async_trait;
    use std::time::Duration;

    fn vault(store: &MemoryStore) -> ApiKeyVault {
        ApiKeyVault::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(FixedClock::at_date(2026, 3, 1)),
        )
    }

    async fn with_plan(store: &MemoryStore, plan: PlanTier) -> AccountId {
        let id = AccountId::new();
        store
            .create_account(crate::storage::NewAccount {
                id,
                email: format!("{id}@example.com"),
                password_hash: String::new(),
                created_at: Utc::now(),
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
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_issue_format_and_storage() {
        let store = MemoryStore::new();
        let account = with_plan(&store, PlanTier::Business).await;
        let issued = vault(&store).issue(&account, "  CI pipeline  ").await.unwrap();

        assert!(issued.key.starts_with("sk_live_"));
        assert_eq!(issued.key.len(), 72);
        assert_eq!(issued.record.name, "CI pipeline");
        assert_eq!(issued.record.key_prefix, &issued.key[..16]);
        assert_eq!(issued.record.key_hash, hash_key(&issued.key));
        assert_ne!(issued.record.key_hash, issued.key);
        assert!(!format!("{issued:?}").contains(&issued.key));
    }

    #[tokio::test]
    async fn test_issue_rejects_blank_name() {
        let store = MemoryStore::new();
        let err = vault(&store).issue(&AccountId::new(), "   ").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_verify_resolves_owner_and_current_plan() {
        let store = MemoryStore::new();
        let account = with_plan(&store, PlanTier::Business).await;
        let v = vault(&store);
        let issued = v.issue(&account, "key").await.unwrap();

        let result = v.verify(&issued.key).await;
        assert_eq!(
            result,
            KeyVerification::Valid {
                account_id: account,
                tier: PlanTier::Business,
                role: Role::User,
                key_id: issued.record.id,
            }
        );

        // Plan changes are seen on the next call
        store
            .set_plan_if(&account, PlanTier::Business, PlanTier::Enterprise, Utc::now())
            .await
            .unwrap();
        let KeyVerification::Valid { tier, .. } = v.verify(&issued.key).await else {
            panic!("expected valid");
        };
        assert_eq!(tier, PlanTier::Enterprise);
    }

    #[tokio::test]
    async fn test_verify_without_profile_is_lowest_tier() {
        let store = MemoryStore::new();
        let v = vault(&store);
        let issued = v.issue(&AccountId::new(), "orphan").await.unwrap();
        let KeyVerification::Valid { tier, .. } = v.verify(&issued.key).await else {
            panic!("expected valid");
        };
        assert_eq!(tier, PlanTier::Free);
    }

    #[tokio::test]
    async fn test_malformed_keys_are_invalid() {
        let store = MemoryStore::new();
        let v = vault(&store);
        let issued = v.issue(&AccountId::new(), "k").await.unwrap();

        let upper = format!("sk_live_{}", issued.key[8..].to_uppercase());
        let cases = [
            String::new(),
            "sk_live_".to_string(),
            issued.key[..71].to_string(),
            format!("{}0", issued.key),
            issued.key.replacen("sk_live_", "sk_test_", 1),
            format!("sk_live_{}", "g".repeat(64)),
            upper,
        ];
        for case in cases {
            assert_eq!(v.verify(&case).await, KeyVerification::Invalid, "{case}");
        }
    }

    #[tokio::test]
    async fn test_revoked_key_is_invalid() {
        let store = MemoryStore::new();
        let account = with_plan(&store, PlanTier::Business).await;
        let v = vault(&store);
        let issued = v.issue(&account, "temp").await.unwrap();

        v.revoke(&account, &issued.record.id).await.unwrap();
        assert_eq!(v.verify(&issued.key).await, KeyVerification::Invalid);
    }

    #[tokio::test]
    async fn test_revoke_other_accounts_key_is_not_found() {
        let store = MemoryStore::new();
        let owner = with_plan(&store, PlanTier::Business).await;
        let v = vault(&store);
        let issued = v.issue(&owner, "mine").await.unwrap();

        let err = v.revoke(&AccountId::new(), &issued.record.id).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        assert!(v.verify(&issued.key).await.is_valid());
    }

    #[tokio::test]
    async fn test_list_hides_hash_and_records_use() {
        let store = MemoryStore::new();
        let account = with_plan(&store, PlanTier::Business).await;
        let v = vault(&store);
        let issued = v.issue(&account, "first").await.unwrap();

        let listed = v.list(&account).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].prefix, format!("{}...", &issued.key[..16]));
        assert_eq!(listed[0].last_used_at, None);
        let json = serde_json::to_string(&listed).unwrap();
        assert!(!json.contains(&issued.record.key_hash));

        assert!(v.verify(&issued.key).await.is_valid());
        let mut last_used = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(2)).await;
            last_used = v.list(&account).await.unwrap()[0].last_used_at;
            if last_used.is_some() {
                break;
            }
        }
        assert!(last_used.is_some());
    }

    struct BrokenKeys;

    #[async_trait]
    impl ApiKeyStore for BrokenKeys {
        async fn insert_api_key(&self, _key: &StoredApiKey) -> Result<()> {
            Err(PlangateError::datastore("down"))
        }
        async fn find_api_keys_by_prefix(&self, _prefix: &str) -> Result<Vec<StoredApiKey>> {
            Err(PlangateError::datastore("down"))
        }
        async fn list_api_keys(&self, _account_id: &AccountId) -> Result<Vec<StoredApiKey>> {
            Err(PlangateError::datastore("down"))
        }
        async fn delete_api_key(&self, _account_id: &AccountId, _key_id: &Uuid) -> Result<bool> {
            Err(PlangateError::datastore("down"))
        }
        async fn touch_api_key(&self, _key_id: &Uuid, _used_at: DateTime<Utc>) -> Result<()> {
            Err(PlangateError::datastore("down"))
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let store = MemoryStore::new();
        let v = ApiKeyVault::new(
            Arc::new(BrokenKeys),
            Arc::new(store),
            Arc::new(FixedClock::at_date(2026, 3, 1)),
        );
        let key = format!("sk_live_{}", "ab".repeat(32));
        assert_eq!(v.verify(&key).await, KeyVerification::Invalid);
    }
}
