//! Account provisioning convergence across the webhook and polling triggers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use plangate::auth::{PasswordConfig, PasswordHasher, SequenceCredentialGenerator};
use plangate::billing::{
    CheckoutConfig, CheckoutSessionSnapshot, PaymentStatus, PlanTier, SessionStatus,
    UpgradeManager, WebhookEvent, WebhookHandler, WebhookOutcome, metadata,
};
use plangate::clock::FixedClock;
use plangate::provisioning::{PollOutcome, Reconciler, SessionPollStatus, SessionPoller};
use plangate::Result;
use plangate::storage::{
    Account, AccountId, AccountStore, CheckoutSessionStore, CreateAccountOutcome, MemoryStore,
    NewAccount, Profile, ProfileUpdate, ProfileUpsert, WriteError,
};
use plangate::testing::{MockPaymentProcessor, RecordingMailer};

struct Harness {
    store: MemoryStore,
    processor: MockPaymentProcessor,
    mailer: RecordingMailer,
    reconciler: Reconciler,
    webhooks: WebhookHandler,
}

fn harness() -> Harness {
    let store = MemoryStore::new();
    harness_with(Arc::new(store.clone()), store)
}

fn harness_with(accounts: Arc<dyn AccountStore>, store: MemoryStore) -> Harness {
    let processor = MockPaymentProcessor::new();
    let mailer = RecordingMailer::new();
    let clock = Arc::new(FixedClock::at_date(2026, 5, 2));
    let shared = Arc::new(store.clone());

    let reconciler = Reconciler::new(
        accounts.clone(),
        shared.clone(),
        Arc::new(processor.clone()),
        Arc::new(mailer.clone()),
        clock.clone(),
    )
    .with_credentials(Arc::new(SequenceCredentialGenerator::new([
        "credential-one",
        "credential-two",
        "credential-three",
    ])))
    .with_hasher(PasswordHasher::new(PasswordConfig::fast()));
    let upgrades = UpgradeManager::new(
        accounts.clone(),
        Arc::new(processor.clone()),
        CheckoutConfig::new("https://app.example.com"),
        clock.clone(),
    );
    let webhooks = WebhookHandler::new(
        SecretString::from("whsec_provisioning"),
        shared,
        accounts,
        reconciler.clone(),
        upgrades,
        clock,
    );

    Harness {
        store,
        processor,
        mailer,
        reconciler,
        webhooks,
    }
}

fn paid_session(id: &str, email: &str) -> CheckoutSessionSnapshot {
    CheckoutSessionSnapshot::new(id, PaymentStatus::Paid)
        .with_status(SessionStatus::Complete)
        .with_email(email)
        .with_customer("cus_conv")
        .with_metadata(metadata::PLAN_ID, "business")
        .with_metadata(metadata::BILLING_INTERVAL, "year")
}

fn completed_event(event_id: &str, session_id: &str, email: &str) -> WebhookEvent {
    serde_json::from_value(json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session_id,
                "payment_status": "paid",
                "status": "complete",
                "customer": "cus_conv",
                "customer_details": { "email": email },
                "metadata": { "planId": "business", "billingInterval": "year" }
            }
        }
    }))
    .unwrap()
}

fn ready_credential(status: &SessionPollStatus) -> &str {
    match status {
        SessionPollStatus::Ready {
            temp_credential, ..
        } => temp_credential,
        other => panic!("expected ready, got {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_webhook_and_poll_converge() {
    let h = harness();
    h.processor.put_session(paid_session("cs_race", "race@example.com"));

    let (delivered, polled) = tokio::join!(
        h.webhooks
            .handle_event(completed_event("evt_race", "cs_race", "race@example.com")),
        h.reconciler.poll_status("cs_race"),
    );
    assert_eq!(delivered.unwrap(), WebhookOutcome::Processed);
    let polled = polled.unwrap();

    let stored = h.store.get_checkout_session("cs_race").await.unwrap().unwrap();
    assert_eq!(ready_credential(&polled), stored.temp_credential);
    assert_eq!(h.store.account_count(), 1);
    assert_eq!(h.mailer.sent().len(), 1);

    let login = h
        .reconciler
        .authenticate("race@example.com", &stored.temp_credential)
        .await
        .unwrap();
    assert!(login.is_some());
}

#[tokio::test]
async fn test_existing_account_converges_to_one_working_credential() {
    let h = harness();
    let existing = AccountId::new();
    let created = h
        .store
        .create_account(NewAccount {
            id: existing,
            email: "returning@example.com".to_string(),
            password_hash: PasswordHasher::new(PasswordConfig::fast())
                .hash("old-password")
                .unwrap(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    assert!(matches!(created, CreateAccountOutcome::Created(_)));
    h.processor
        .put_session(paid_session("cs_back", "Returning@Example.com "));

    let first = h.reconciler.poll_status("cs_back").await.unwrap();
    let outcome = h
        .webhooks
        .handle_event(completed_event("evt_back", "cs_back", "returning@example.com"))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);
    let second = h.reconciler.poll_status("cs_back").await.unwrap();

    assert_eq!(ready_credential(&first), "credential-one");
    assert_eq!(ready_credential(&second), "credential-one");
    assert_eq!(h.store.account_count(), 1);

    let login = h
        .reconciler
        .authenticate("returning@example.com", "credential-one")
        .await
        .unwrap();
    assert_eq!(login, Some(existing));
    let old = h
        .reconciler
        .authenticate("returning@example.com", "old-password")
        .await
        .unwrap();
    assert_eq!(old, None);

    let profile = h.store.get_profile(&existing).await.unwrap().unwrap();
    assert_eq!(profile.plan, PlanTier::Business);
}

/// Counts password rotations and yields at every store call so concurrent
/// triggers interleave.
struct CountingAccounts {
    store: MemoryStore,
    rotations: AtomicUsize,
}

#[async_trait]
impl AccountStore for CountingAccounts {
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        tokio::task::yield_now().await;
        self.store.get_account(id).await
    }
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        tokio::task::yield_now().await;
        self.store.find_account_by_email(email).await
    }
    async fn create_account(&self, account: NewAccount) -> Result<CreateAccountOutcome> {
        tokio::task::yield_now().await;
        self.store.create_account(account).await
    }
    async fn set_password_hash(&self, id: &AccountId, hash: &str) -> Result<()> {
        self.rotations.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.store.set_password_hash(id, hash).await
    }
    async fn get_profile(&self, id: &AccountId) -> Result<Option<Profile>> {
        self.store.get_profile(id).await
    }
    async fn find_profile_by_customer(&self, customer_id: &str) -> Result<Option<Profile>> {
        self.store.find_profile_by_customer(customer_id).await
    }
    async fn upsert_profile(&self, profile: &ProfileUpsert) -> std::result::Result<(), WriteError> {
        tokio::task::yield_now().await;
        self.store.upsert_profile(profile).await
    }
    async fn update_profile(
        &self,
        id: &AccountId,
        update: ProfileUpdate,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.store.update_profile(id, update, at).await
    }
    async fn set_plan_if(
        &self,
        id: &AccountId,
        expected: PlanTier,
        plan: PlanTier,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.store.set_plan_if(id, expected, plan, at).await
    }
}

#[tokio::test]
async fn test_racing_triggers_rotate_existing_account_once() {
    let store = MemoryStore::new();
    let existing = AccountId::new();
    store
        .create_account(NewAccount {
            id: existing,
            email: "loyal@example.com".to_string(),
            password_hash: PasswordHasher::new(PasswordConfig::fast())
                .hash("old-password")
                .unwrap(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    let accounts = Arc::new(CountingAccounts {
        store: store.clone(),
        rotations: AtomicUsize::new(0),
    });
    let h = harness_with(accounts.clone(), store);
    h.processor.put_session(paid_session("cs_loyal", "Loyal@Example.com"));

    let (delivered, polled) = tokio::join!(
        h.webhooks
            .handle_event(completed_event("evt_loyal", "cs_loyal", "loyal@example.com")),
        h.reconciler.poll_status("cs_loyal"),
    );
    let delivered = delivered.unwrap();
    let polled = polled.unwrap();

    // The loser of the claim sees the session in flight, never a credential
    if delivered == WebhookOutcome::Deferred {
        let redelivered = h
            .webhooks
            .handle_event(completed_event("evt_loyal", "cs_loyal", "loyal@example.com"))
            .await
            .unwrap();
        assert_eq!(redelivered, WebhookOutcome::Processed);
    } else {
        assert_eq!(delivered, WebhookOutcome::Processed);
    }
    assert!(matches!(
        polled,
        SessionPollStatus::Ready { .. } | SessionPollStatus::Processing
    ));

    let settled = h.reconciler.poll_status("cs_loyal").await.unwrap();
    let credential = ready_credential(&settled);
    if let SessionPollStatus::Ready { .. } = polled {
        assert_eq!(ready_credential(&polled), credential);
    }

    assert_eq!(accounts.rotations.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.account_count(), 1);
    assert_eq!(h.mailer.sent().len(), 1);

    let login = h
        .reconciler
        .authenticate("loyal@example.com", credential)
        .await
        .unwrap();
    assert_eq!(login, Some(existing));
    let old = h
        .reconciler
        .authenticate("loyal@example.com", "old-password")
        .await
        .unwrap();
    assert_eq!(old, None);
}

#[tokio::test(start_paused = true)]
async fn test_client_poller_reaches_ready_after_payment() {
    let h = harness();
    let unpaid = CheckoutSessionSnapshot::new("cs_poll", PaymentStatus::Unpaid)
        .with_status(SessionStatus::Open)
        .with_metadata(metadata::PLAN_ID, "pro");
    h.processor.put_session(unpaid);

    let processor = h.processor.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(3_500)).await;
        processor.complete_session("cs_poll", "poller@example.com");
    });

    let outcome = SessionPoller::new(h.reconciler.clone()).poll("cs_poll").await;
    match outcome {
        PollOutcome::Finished(status) => {
            assert_eq!(ready_credential(&status), "credential-one");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_client_poller_times_out_while_unpaid() {
    let h = harness();
    h.processor.put_session(
        CheckoutSessionSnapshot::new("cs_never", PaymentStatus::Unpaid)
            .with_status(SessionStatus::Open),
    );

    let outcome = SessionPoller::new(h.reconciler.clone()).poll("cs_never").await;
    assert!(matches!(outcome, PollOutcome::TimedOut { attempts: 20 }));
    assert_eq!(h.store.account_count(), 0);
}
