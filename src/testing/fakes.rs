//! In-memory stand-ins for the external collaborators.
//!
//! Each fake is cheap to clone and shares its state between clones, so a
//! test can hand one copy to the code under test and inspect another.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::auth::SessionResolver;
use crate::billing::{
    CheckoutRedirect, CheckoutSessionSnapshot, CreateCheckoutSession, PaymentProcessor,
    PaymentStatus, SessionStatus,
};
use crate::error::{PlangateError, Result, UpstreamService};
use crate::generation::{GeneratedAsset, GenerationKind, GenerationProvider, GenerationRequest, ObjectStorage};
use crate::storage::AccountId;
use crate::traits::mailer::{Email, Mailer};

/// Payment processor that records sessions instead of charging anyone.
///
/// Created sessions start unpaid; [`complete_session`](Self::complete_session)
/// plays the customer finishing the hosted page.
#[derive(Clone, Default)]
pub struct MockPaymentProcessor {
    created: Arc<Mutex<Vec<CreateCheckoutSession>>>,
    sessions: Arc<RwLock<HashMap<String, CheckoutSessionSnapshot>>>,
    next_id: Arc<AtomicU64>,
    failing: Arc<AtomicBool>,
}

impl MockPaymentProcessor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with an upstream error until turned off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Requests passed to `create_checkout_session`, oldest first.
    pub fn created_sessions(&self) -> Vec<CreateCheckoutSession> {
        self.created.lock().unwrap().clone()
    }

    /// Insert or replace the snapshot returned for `session.id`.
    pub fn put_session(&self, session: CheckoutSessionSnapshot) {
        self.sessions
            .write()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    /// Mark a created session as completed by `email`.
    ///
    /// Trial sessions complete without payment, like the hosted page does.
    pub fn complete_session(&self, session_id: &str, email: &str) -> Option<CheckoutSessionSnapshot> {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions.get_mut(session_id)?;
        if session.payment_status == PaymentStatus::Unpaid {
            session.payment_status = PaymentStatus::Paid;
        }
        *session = session
            .clone()
            .with_status(SessionStatus::Complete)
            .with_email(email);
        Some(session.clone())
    }

    fn check_failing(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PlangateError::upstream(
                UpstreamService::PaymentProcessor,
                "mock processor unavailable",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    async fn create_checkout_session(&self, request: &CreateCheckoutSession) -> Result<CheckoutRedirect> {
        self.check_failing()?;

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = format!("cs_test_{:04}", n);

        let status = if request.trial_period_days.is_some() {
            PaymentStatus::NoPaymentRequired
        } else {
            PaymentStatus::Unpaid
        };
        let mut snapshot = CheckoutSessionSnapshot::new(&session_id, status).with_status(SessionStatus::Open);
        snapshot.metadata = request.metadata.clone();
        snapshot.amount_total = Some(request.line_item.unit_amount);
        if let Some(customer) = &request.customer_id {
            snapshot = snapshot.with_customer(customer);
        }
        if let Some(email) = &request.customer_email {
            snapshot = snapshot.with_email(email);
        }

        self.created.lock().unwrap().push(request.clone());
        self.put_session(snapshot);

        Ok(CheckoutRedirect {
            url: format!("https://checkout.example.com/c/pay/{}", session_id),
            session_id,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSessionSnapshot> {
        self.check_failing()?;
        self.sessions
            .read()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| {
                PlangateError::upstream(
                    UpstreamService::PaymentProcessor,
                    format!("No such checkout session: {}", session_id),
                )
            })
    }
}

/// Mailer that keeps every email it was asked to send.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<Email>>>,
    failing: bool,
}

impl RecordingMailer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer whose every send fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &Email) -> Result<String> {
        if self.failing {
            return Err(PlangateError::upstream(
                UpstreamService::EmailSender,
                "mock mailer unavailable",
            ));
        }
        email.validate()?;
        let mut sent = self.sent.lock().unwrap();
        sent.push(email.clone());
        Ok(format!("recorded-{}", sent.len()))
    }
}

/// Session tokens mapped to accounts by hand.
#[derive(Clone, Default)]
pub struct StaticSessions {
    tokens: Arc<RwLock<HashMap<String, AccountId>>>,
}

impl StaticSessions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, account_id: AccountId) {
        self.tokens.write().unwrap().insert(token.into(), account_id);
    }

    pub fn remove(&self, token: &str) {
        self.tokens.write().unwrap().remove(token);
    }
}

#[async_trait]
impl SessionResolver for StaticSessions {
    async fn resolve(&self, token: &str) -> Result<Option<AccountId>> {
        Ok(self.tokens.read().unwrap().get(token).copied())
    }
}

#[derive(Clone)]
enum StubOutput {
    Bytes(Vec<u8>),
    Url(String),
    Fail(String),
}

/// Generation provider with a canned answer.
#[derive(Clone)]
pub struct StubGenerationProvider {
    output: StubOutput,
    calls: Arc<AtomicU64>,
}

impl StubGenerationProvider {
    fn with(output: StubOutput) -> Self {
        Self {
            output,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Return raw bytes that still need storing.
    #[must_use]
    pub fn bytes(data: Vec<u8>) -> Self {
        Self::with(StubOutput::Bytes(data))
    }

    /// Return an already hosted asset.
    #[must_use]
    pub fn url(url: impl Into<String>) -> Self {
        Self::with(StubOutput::Url(url.into()))
    }

    /// Fail with a message the caller is allowed to see.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with(StubOutput::Fail(message.into()))
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for StubGenerationProvider {
    async fn generate(&self, kind: GenerationKind, _request: &GenerationRequest) -> Result<GeneratedAsset> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.output {
            StubOutput::Bytes(data) => Ok(GeneratedAsset::Bytes {
                data: data.clone(),
                content_type: match kind {
                    GenerationKind::Image => "image/png",
                    GenerationKind::Video => "video/mp4",
                }
                .to_string(),
            }),
            StubOutput::Url(url) => Ok(GeneratedAsset::Url(url.clone())),
            StubOutput::Fail(message) => Err(PlangateError::upstream_exposed(
                UpstreamService::GenerationProvider,
                message.clone(),
            )),
        }
    }
}

/// Object storage backed by a map; URLs are `{base_url}/{path}`.
#[derive(Clone)]
pub struct MemoryObjectStorage {
    base_url: String,
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryObjectStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            objects: Arc::default(),
        }
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn put(&self, data: Vec<u8>, _content_type: &str, path_hint: &str) -> Result<String> {
        self.objects
            .lock()
            .unwrap()
            .insert(path_hint.to_string(), data);
        Ok(format!("{}/{}", self.base_url, path_hint))
    }
}
