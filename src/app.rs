use axum::extract::FromRef;
use std::sync::Arc;

use crate::auth::{
    AlphabetGenerator, ApiKeyVault, NoSessions, PasswordHasher, RequestGate, SessionResolver,
};
use crate::billing::{
    CheckoutConfig, CheckoutManager, EntitlementTable, PaymentProcessor, UpgradeManager,
    UsageCounter, WebhookHandler,
};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::email::{ConsoleMailer, Mailer, WelcomeTemplate};
use crate::error::{PlangateError, Result};
use crate::generation::{GenerationProvider, GenerationService, ObjectStorage};
use crate::provisioning::Reconciler;
use crate::storage::{
    AccountStore, ApiKeyStore, CheckoutSessionStore, GenerationStore, MemoryStore,
    ProcessedEventStore,
};

/// Application context shared by every route.
///
/// Built once from the configured collaborators; cloning is cheap.
#[derive(Clone)]
pub struct AppContext {
    pub gate: RequestGate,
    pub vault: ApiKeyVault,
    pub usage: UsageCounter,
    pub checkout: CheckoutManager,
    pub upgrades: UpgradeManager,
    pub reconciler: Reconciler,
    /// Present when a generation provider and object storage are configured.
    pub generation: Option<Arc<GenerationService>>,
    /// Present when a webhook secret is configured.
    pub webhooks: Option<Arc<WebhookHandler>>,
}

impl AppContext {
    /// Builder pattern for constructing AppContext
    pub fn builder() -> AppContextBuilder {
        AppContextBuilder::new()
    }

    pub fn generation(&self) -> Result<&Arc<GenerationService>> {
        self.generation
            .as_ref()
            .ok_or_else(|| PlangateError::internal("Generation provider not configured"))
    }

    pub fn webhooks(&self) -> Result<&Arc<WebhookHandler>> {
        self.webhooks
            .as_ref()
            .ok_or_else(|| PlangateError::internal("Webhook secret not configured"))
    }
}

impl FromRef<AppContext> for RequestGate {
    fn from_ref(ctx: &AppContext) -> Self {
        ctx.gate.clone()
    }
}

/// Builder for AppContext with fluent API
///
/// Stores default to a shared [`MemoryStore`]; the payment processor is
/// required unless a processor API key is configured.
#[must_use = "builder does nothing until you call build()"]
pub struct AppContextBuilder {
    config: Config,
    accounts: Option<Arc<dyn AccountStore>>,
    api_keys: Option<Arc<dyn ApiKeyStore>>,
    generations: Option<Arc<dyn GenerationStore>>,
    checkout_sessions: Option<Arc<dyn CheckoutSessionStore>>,
    events: Option<Arc<dyn ProcessedEventStore>>,
    processor: Option<Arc<dyn PaymentProcessor>>,
    mailer: Option<Arc<dyn Mailer>>,
    sessions: Option<Arc<dyn SessionResolver>>,
    clock: Option<Arc<dyn Clock>>,
    provider: Option<Arc<dyn GenerationProvider>>,
    object_storage: Option<Arc<dyn ObjectStorage>>,
    password_hasher: Option<PasswordHasher>,
}

impl AppContextBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            accounts: None,
            api_keys: None,
            generations: None,
            checkout_sessions: None,
            events: None,
            processor: None,
            mailer: None,
            sessions: None,
            clock: None,
            provider: None,
            object_storage: None,
            password_hasher: None,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use one store for every storage trait.
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: AccountStore + ApiKeyStore + GenerationStore + CheckoutSessionStore + ProcessedEventStore + 'static,
    {
        self.accounts = Some(store.clone());
        self.api_keys = Some(store.clone());
        self.generations = Some(store.clone());
        self.checkout_sessions = Some(store.clone());
        self.events = Some(store);
        self
    }

    pub fn with_account_store(mut self, store: Arc<dyn AccountStore>) -> Self {
        self.accounts = Some(store);
        self
    }

    pub fn with_api_key_store(mut self, store: Arc<dyn ApiKeyStore>) -> Self {
        self.api_keys = Some(store);
        self
    }

    pub fn with_generation_store(mut self, store: Arc<dyn GenerationStore>) -> Self {
        self.generations = Some(store);
        self
    }

    pub fn with_checkout_session_store(mut self, store: Arc<dyn CheckoutSessionStore>) -> Self {
        self.checkout_sessions = Some(store);
        self
    }

    pub fn with_event_store(mut self, store: Arc<dyn ProcessedEventStore>) -> Self {
        self.events = Some(store);
        self
    }

    pub fn with_payment_processor(mut self, processor: Arc<dyn PaymentProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn with_session_resolver(mut self, sessions: Arc<dyn SessionResolver>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_generation(
        mut self,
        provider: Arc<dyn GenerationProvider>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        self.provider = Some(provider);
        self.object_storage = Some(storage);
        self
    }

    pub fn with_password_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.password_hasher = Some(hasher);
        self
    }

    fn resolve_processor(&mut self) -> Result<Arc<dyn PaymentProcessor>> {
        if let Some(processor) = self.processor.take() {
            return Ok(processor);
        }

        #[cfg(feature = "live-processor")]
        if let Some(key) = self.config.billing.processor_api_key.clone() {
            let client = crate::billing::LiveProcessorClient::new(
                key,
                crate::billing::LiveProcessorConfig::default(),
            )?;
            return Ok(Arc::new(client));
        }

        Err(PlangateError::internal("Payment processor not configured"))
    }

    fn resolve_mailer(&mut self) -> Result<Arc<dyn Mailer>> {
        if let Some(mailer) = self.mailer.take() {
            return Ok(mailer);
        }

        #[cfg(feature = "resend")]
        if let Some(key) = self.config.email.resend_api_key.clone() {
            return Ok(Arc::new(crate::email::ResendMailer::new(key)?));
        }

        tracing::warn!(target: "plangate::email", "No mailer configured, logging emails to console");
        Ok(Arc::new(ConsoleMailer::new()))
    }

    pub fn build(mut self) -> Result<AppContext> {
        self.config.validate()?;

        let processor = self.resolve_processor()?;
        let mailer = self.resolve_mailer()?;

        let uses_memory = self.accounts.is_none()
            || self.api_keys.is_none()
            || self.generations.is_none()
            || self.checkout_sessions.is_none()
            || self.events.is_none();
        let fallback = Arc::new(MemoryStore::new());
        let accounts: Arc<dyn AccountStore> =
            self.accounts.take().unwrap_or_else(|| fallback.clone());
        let api_keys: Arc<dyn ApiKeyStore> =
            self.api_keys.take().unwrap_or_else(|| fallback.clone());
        let generations: Arc<dyn GenerationStore> =
            self.generations.take().unwrap_or_else(|| fallback.clone());
        let checkout_sessions: Arc<dyn CheckoutSessionStore> =
            self.checkout_sessions.take().unwrap_or_else(|| fallback.clone());
        let events: Arc<dyn ProcessedEventStore> =
            self.events.take().unwrap_or_else(|| fallback.clone());
        if uses_memory {
            tracing::warn!(
                target: "plangate::storage",
                "Using in-memory storage; data is lost on restart"
            );
        }

        let clock = self.clock.take().unwrap_or_else(|| Arc::new(SystemClock));
        let sessions = self.sessions.take().unwrap_or_else(|| Arc::new(NoSessions));
        let config = &self.config;

        let entitlements = EntitlementTable::new(config.api_keys.access_threshold);
        let usage = UsageCounter::new(generations.clone(), entitlements, clock.clone());
        let vault = ApiKeyVault::new(api_keys, accounts.clone(), clock.clone());
        let gate = RequestGate::new(
            vault.clone(),
            sessions,
            accounts.clone(),
            entitlements,
            usage.clone(),
        );

        let checkout_config = CheckoutConfig::new(&config.billing.app_base_url)
            .currency(&config.billing.currency)
            .trial_days(config.billing.trial_days);
        let checkout = CheckoutManager::new(processor.clone(), checkout_config.clone());
        let upgrades = UpgradeManager::new(
            accounts.clone(),
            processor.clone(),
            checkout_config.clone(),
            clock.clone(),
        );

        let welcome = WelcomeTemplate {
            from: config.email.from.clone(),
            subject: config.email.welcome_subject.clone(),
            login_url: checkout_config.url_for("/login")?,
        };
        let reconciler = Reconciler::new(
            accounts.clone(),
            checkout_sessions,
            processor,
            mailer,
            clock.clone(),
        )
        .with_credentials(Arc::new(AlphabetGenerator::new(
            config.provisioning.credential_length,
        )))
        .with_hasher(self.password_hasher.take().unwrap_or_default())
        .with_welcome(welcome);

        let generation = match (self.provider.take(), self.object_storage.take()) {
            (Some(provider), Some(storage)) => Some(Arc::new(GenerationService::new(
                generations,
                provider,
                storage,
                clock.clone(),
            ))),
            _ => None,
        };

        let webhooks = config.billing.webhook_secret.clone().map(|secret| {
            Arc::new(
                WebhookHandler::new(
                    secret,
                    events,
                    accounts,
                    reconciler.clone(),
                    upgrades.clone(),
                    clock,
                )
                .with_tolerance(config.billing.webhook_tolerance_secs),
            )
        });
        if webhooks.is_none() {
            tracing::warn!(
                target: "plangate::billing",
                "No webhook secret configured; webhook endpoint disabled"
            );
        }

        Ok(AppContext {
            gate,
            vault,
            usage,
            checkout,
            upgrades,
            reconciler,
            generation,
            webhooks,
        })
    }
}

impl Default for AppContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PasswordConfig;
    use crate::config::ConfigBuilder;
    use crate::error::ErrorKind;
    use crate::testing::MockPaymentProcessor;

    #[test]
    fn test_requires_payment_processor() {
        let err = AppContext::builder().build().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_builds_with_defaults() {
        let ctx = AppContext::builder()
            .with_payment_processor(Arc::new(MockPaymentProcessor::new()))
            .with_password_hasher(PasswordHasher::new(PasswordConfig::fast()))
            .build()
            .unwrap();
        assert!(ctx.generation().is_err());
        assert!(ctx.webhooks().is_err());
        assert_eq!(
            ctx.gate.entitlements().api_access_threshold(),
            crate::billing::PlanTier::Business
        );
    }

    #[test]
    fn test_webhook_handler_follows_config() {
        let config = ConfigBuilder::new()
            .with_webhook_secret("whsec_test")
            .with_api_access_threshold(crate::billing::PlanTier::Pro)
            .build()
            .unwrap();
        let ctx = AppContext::builder()
            .with_config(config)
            .with_payment_processor(Arc::new(MockPaymentProcessor::new()))
            .build()
            .unwrap();
        assert!(ctx.webhooks().is_ok());
        assert_eq!(
            ctx.gate.entitlements().api_access_threshold(),
            crate::billing::PlanTier::Pro
        );
    }
}
