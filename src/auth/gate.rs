//! Per-request authentication and authorization.
//!
//! Every protected endpoint goes through [`RequestGate::authorize`]; only the
//! [`Policy`] differs. Handlers ask for it with the [`Authorized`] extractor:
//!
//! ```rust,ignore
//! async fn generate_video(
//!     caller: Authorized<VideoGeneration>,
//!     Json(body): Json<GenerationRequest>,
//! ) -> Result<Json<GenerationOutput>> { ... }
//! ```
//!
//! Checks run in a fixed order: identity, API access, admin role, quota. Each
//! decision is a fresh read; nothing is cached between requests.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;
use uuid::Uuid;

use super::api_keys::{ApiKeyVault, KeyVerification};
use super::session::SessionResolver;
use super::token::Credentials;
use crate::billing::{EntitlementTable, LimitCheckResult, PlanTier, UsageCounter};
use crate::error::{PlangateError, Result};
use crate::generation::GenerationKind;
use crate::storage::{AccountId, AccountStore, Role};

/// What an endpoint requires beyond a valid identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Policy {
    /// Caller's tier must grant API access.
    pub api_access: bool,
    /// Caller must have the admin role.
    pub admin: bool,
    /// Caller must have quota left for this kind.
    pub quota: Option<GenerationKind>,
}

impl Policy {
    pub const AUTHENTICATED: Policy = Policy {
        api_access: false,
        admin: false,
        quota: None,
    };

    pub const API_ACCESS: Policy = Policy {
        api_access: true,
        ..Self::AUTHENTICATED
    };

    pub const ADMIN: Policy = Policy {
        admin: true,
        ..Self::AUTHENTICATED
    };

    #[must_use]
    pub const fn generation(kind: GenerationKind) -> Policy {
        Policy {
            api_access: true,
            admin: false,
            quota: Some(kind),
        }
    }
}

/// Type-level policy for the [`Authorized`] extractor.
pub trait GatePolicy: Send + Sync + 'static {
    const POLICY: Policy;
}

/// Any signed-in caller.
pub struct Authenticated;
/// Caller whose plan includes API access.
pub struct ApiAccess;
/// API access plus image quota left this month.
pub struct ImageGeneration;
/// API access plus video quota left this month.
pub struct VideoGeneration;
/// Admin role.
pub struct Admin;

impl GatePolicy for Authenticated {
    const POLICY: Policy = Policy::AUTHENTICATED;
}

impl GatePolicy for ApiAccess {
    const POLICY: Policy = Policy::API_ACCESS;
}

impl GatePolicy for ImageGeneration {
    const POLICY: Policy = Policy::generation(GenerationKind::Image);
}

impl GatePolicy for VideoGeneration {
    const POLICY: Policy = Policy::generation(GenerationKind::Video);
}

impl GatePolicy for Admin {
    const POLICY: Policy = Policy::ADMIN;
}

/// How the caller authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Via {
    ApiKey { key_id: Uuid },
    Session,
}

/// Identity and plan of an authorized caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerContext {
    pub account_id: AccountId,
    pub tier: PlanTier,
    pub role: Role,
    pub via: Via,
}

/// Composes the key vault, entitlements and usage counter.
#[derive(Clone)]
pub struct RequestGate {
    vault: ApiKeyVault,
    sessions: Arc<dyn SessionResolver>,
    accounts: Arc<dyn AccountStore>,
    entitlements: EntitlementTable,
    usage: UsageCounter,
}

impl RequestGate {
    pub fn new(
        vault: ApiKeyVault,
        sessions: Arc<dyn SessionResolver>,
        accounts: Arc<dyn AccountStore>,
        entitlements: EntitlementTable,
        usage: UsageCounter,
    ) -> Self {
        Self {
            vault,
            sessions,
            accounts,
            entitlements,
            usage,
        }
    }

    pub fn entitlements(&self) -> &EntitlementTable {
        &self.entitlements
    }

    async fn identify(&self, credentials: Option<&Credentials>) -> Result<CallerContext> {
        match credentials {
            Some(Credentials::ApiKey(key)) => match self.vault.verify(key).await {
                KeyVerification::Valid {
                    account_id,
                    tier,
                    role,
                    key_id,
                } => Ok(CallerContext {
                    account_id,
                    tier,
                    role,
                    via: Via::ApiKey { key_id },
                }),
                KeyVerification::Invalid => Err(PlangateError::unauthenticated()),
            },
            Some(Credentials::Session(token)) => {
                let account_id = match self.sessions.resolve(token).await {
                    Ok(Some(id)) => id,
                    Ok(None) => return Err(PlangateError::unauthenticated()),
                    Err(e) => {
                        tracing::warn!(target: "plangate::auth", error = %e, "Session lookup failed");
                        return Err(PlangateError::unauthenticated());
                    }
                };
                let (tier, role) = self
                    .accounts
                    .get_profile(&account_id)
                    .await?
                    .map(|p| (p.plan, p.role))
                    .unwrap_or((PlanTier::lowest(), Role::User));
                Ok(CallerContext {
                    account_id,
                    tier,
                    role,
                    via: Via::Session,
                })
            }
            None => Err(PlangateError::unauthenticated()),
        }
    }

    /// Authenticate the caller and enforce `policy`.
    pub async fn authorize(&self, credentials: Option<&Credentials>, policy: &Policy) -> Result<CallerContext> {
        let caller = self.identify(credentials).await?;

        if policy.api_access && !self.entitlements.has_api_access(caller.tier) {
            tracing::debug!(
                target: "plangate::auth",
                account_id = %caller.account_id,
                tier = %caller.tier,
                "API access denied by plan"
            );
            return Err(PlangateError::forbidden(format!(
                "API access requires the {} plan or higher",
                self.entitlements.api_access_threshold().label()
            )));
        }

        if policy.admin && caller.role != Role::Admin {
            return Err(PlangateError::forbidden("Admin access required"));
        }

        if let Some(kind) = policy.quota {
            let check = self.usage.check(&caller.account_id, kind, caller.tier).await?;
            if let LimitCheckResult::AtLimit { current, max } = check {
                tracing::debug!(
                    target: "plangate::auth",
                    account_id = %caller.account_id,
                    kind = %kind,
                    current,
                    max,
                    "Generation quota exhausted"
                );
                return Err(PlangateError::quota_exceeded(format!(
                    "Monthly {} generation limit reached ({}/{})",
                    kind, current, max
                )));
            }
        }

        Ok(caller)
    }
}

/// Extractor that runs the gate with policy `P`.
pub struct Authorized<P> {
    pub caller: CallerContext,
    _policy: PhantomData<fn() -> P>,
}

impl<P> Deref for Authorized<P> {
    type Target = CallerContext;

    fn deref(&self) -> &Self::Target {
        &self.caller
    }
}

impl<S, P> FromRequestParts<S> for Authorized<P>
where
    S: Send + Sync,
    RequestGate: FromRef<S>,
    P: GatePolicy,
{
    type Rejection = PlangateError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let gate = RequestGate::from_ref(state);
        let credentials = Credentials::from_parts(parts);
        let caller = gate.authorize(credentials.as_ref(), &P::POLICY).await?;
        Ok(Self {
            caller,
            _policy: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::BillingInterval;
    use crate::clock::FixedClock;
    use crate::error::ErrorKind;
    use crate::generation::GenerationStatus;
    use crate::storage::{
        GenerationRecord, GenerationStore, MemoryStore, NewAccount, OnboardingDetails, ProfileUpsert,
    };
    use crate::testing::StaticSessions;
    use chrono::Utc;

    struct Fixture {
        store: MemoryStore,
        sessions: StaticSessions,
        gate: RequestGate,
        vault: ApiKeyVault,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let clock = Arc::new(FixedClock::at_date(2026, 4, 10));
        let sessions = StaticSessions::new();
        let vault = ApiKeyVault::new(Arc::new(store.clone()), Arc::new(store.clone()), clock.clone());
        let entitlements = EntitlementTable::default();
        let usage = UsageCounter::new(Arc::new(store.clone()), entitlements, clock);
        let gate = RequestGate::new(
            vault.clone(),
            Arc::new(sessions.clone()),
            Arc::new(store.clone()),
            entitlements,
            usage,
        );
        Fixture {
            store,
            sessions,
            gate,
            vault,
        }
    }

    async fn account(store: &MemoryStore, plan: PlanTier) -> AccountId {
        let id = AccountId::new();
        store
            .create_account(NewAccount {
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
    async fn test_missing_and_bad_credentials_are_unauthenticated() {
        let f = fixture();
        for creds in [
            None,
            Some(Credentials::ApiKey("sk_live_nope".into())),
            Some(Credentials::Session("unknown".into())),
        ] {
            let err = f.gate.authorize(creds.as_ref(), &Policy::AUTHENTICATED).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Authentication);
            assert_eq!(err.to_response_body().error, crate::error::AUTHENTICATION_FAILED);
        }
    }

    #[tokio::test]
    async fn test_api_access_denied_below_threshold() {
        let f = fixture();
        let id = account(&f.store, PlanTier::Pro).await;
        let key = f.vault.issue(&id, "k").await.unwrap().key;

        let err = f
            .gate
            .authorize(Some(&Credentials::ApiKey(key)), &Policy::API_ACCESS)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(err.to_response_body().error.contains("Business"));
    }

    #[tokio::test]
    async fn test_session_caller() {
        let f = fixture();
        let id = account(&f.store, PlanTier::Business).await;
        f.sessions.insert("tok", id);

        let caller = f
            .gate
            .authorize(Some(&Credentials::Session("tok".into())), &Policy::API_ACCESS)
            .await
            .unwrap();
        assert_eq!(caller.account_id, id);
        assert_eq!(caller.via, Via::Session);
    }

    #[tokio::test]
    async fn test_admin_policy() {
        let f = fixture();
        let id = account(&f.store, PlanTier::Starter).await;
        f.sessions.insert("tok", id);
        let creds = Credentials::Session("tok".into());

        let err = f.gate.authorize(Some(&creds), &Policy::ADMIN).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_eq!(err.to_response_body().error, "Admin access required");

        f.store.set_role(&id, Role::Admin).unwrap();
        assert!(f.gate.authorize(Some(&creds), &Policy::ADMIN).await.is_ok());
    }

    #[tokio::test]
    async fn test_quota_checked_after_access() {
        let f = fixture();
        let id = account(&f.store, PlanTier::Business).await;
        let key = f.vault.issue(&id, "k").await.unwrap().key;
        let creds = Credentials::ApiKey(key);
        let policy = Policy::generation(GenerationKind::Video);

        assert!(f.gate.authorize(Some(&creds), &policy).await.is_ok());

        let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 4, 9, 0, 0, 0).unwrap();
        for _ in 0..200 {
            f.store
                .insert_generation(&GenerationRecord {
                    id: Uuid::new_v4(),
                    account_id: id,
                    kind: GenerationKind::Video,
                    status: GenerationStatus::Completed,
                    prompt: "p".into(),
                    output_url: None,
                    error_message: None,
                    created_at: now,
                })
                .await
                .unwrap();
        }

        let err = f.gate.authorize(Some(&creds), &policy).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);

        // Image quota is separate
        let image = Policy::generation(GenerationKind::Image);
        assert!(f.gate.authorize(Some(&creds), &image).await.is_ok());
    }
}
