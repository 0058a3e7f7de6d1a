//! Live payment processor client.
//!
//! Talks to the processor's REST API (form-encoded requests, JSON responses)
//! with retry logic, secure API key handling and error mapping into
//! [`BillingError`].

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use super::error::BillingError;
use super::processor::{
    CheckoutMode, CheckoutRedirect, CheckoutSessionSnapshot, CreateCheckoutSession, PaymentProcessor,
};
use crate::error::Result;

const DEFAULT_API_BASE: &str = "https://api.stripe.com/v1";

/// Configuration for the live processor client.
#[derive(Debug, Clone)]
pub struct LiveProcessorConfig {
    /// Maximum number of retry attempts for transient failures.
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// API root, overridable for local mocks.
    pub api_base: String,
}

impl Default for LiveProcessorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            timeout_seconds: 30,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl LiveProcessorConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    #[must_use]
    pub fn base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }
}

/// Validate a processor secret key format.
///
/// Accepts `sk_test_`, `sk_live_`, `rk_test_` and `rk_live_` keys.
fn validate_api_key(key: &str) -> std::result::Result<(), BillingError> {
    const MIN_KEY_LENGTH: usize = 20;

    let reason = if key.is_empty() {
        Some("API key cannot be empty".to_string())
    } else if key.len() < MIN_KEY_LENGTH {
        Some(format!("API key too short (minimum {} characters)", MIN_KEY_LENGTH))
    } else if !["sk_test_", "sk_live_", "rk_test_", "rk_live_"]
        .iter()
        .any(|prefix| key.starts_with(prefix))
    {
        Some("API key must start with sk_test_, sk_live_, rk_test_, or rk_live_".to_string())
    } else {
        None
    };

    match reason {
        Some(message) => Err(BillingError::Internal { message }),
        None => Ok(()),
    }
}

/// Live client for production use.
pub struct LiveProcessorClient {
    http: reqwest::Client,
    api_key: SecretString,
    config: LiveProcessorConfig,
}

impl LiveProcessorClient {
    /// Create a client after checking the key format.
    pub fn new(api_key: SecretString, config: LiveProcessorConfig) -> Result<Self> {
        validate_api_key(api_key.expose_secret())?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| BillingError::Internal {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            api_key,
            config,
        })
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &str,
        request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<T> {
        with_retry(&self.config, operation, || async {
            let response = request()
                .bearer_auth(self.api_key.expose_secret())
                .send()
                .await
                .map_err(|e| RequestFailure::transport(&e))?;

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<T>()
                    .await
                    .map_err(|e| RequestFailure::decode(&e));
            }

            let body = response.json::<ApiErrorBody>().await.unwrap_or_default();
            Err(RequestFailure {
                http_status: Some(status.as_u16()),
                message: body
                    .error
                    .message
                    .unwrap_or_else(|| status.to_string()),
                code: body.error.code,
            })
        })
        .await
    }
}

#[async_trait]
impl PaymentProcessor for LiveProcessorClient {
    async fn create_checkout_session(&self, request: &CreateCheckoutSession) -> Result<CheckoutRedirect> {
        let form = checkout_form(request);
        let url = format!("{}/checkout/sessions", self.config.api_base);

        let session: CheckoutSessionSnapshot = self
            .send("create_checkout_session", || self.http.post(&url).form(&form))
            .await?;

        let redirect_url = session.url.clone().ok_or_else(|| BillingError::ProcessorApiError {
            operation: "create_checkout_session".to_string(),
            message: "Checkout session has no URL".to_string(),
            code: None,
            http_status: None,
        })?;

        tracing::info!(
            target: "plangate::billing::processor",
            session_id = %session.id,
            mode = request.mode.as_str(),
            "Checkout session created"
        );

        Ok(CheckoutRedirect {
            session_id: session.id,
            url: redirect_url,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSessionSnapshot> {
        if session_id.is_empty() || !session_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(crate::error::PlangateError::bad_request("Invalid session id"));
        }
        let url = format!("{}/checkout/sessions/{}", self.config.api_base, session_id);
        self.send("retrieve_session", || self.http.get(&url)).await
    }
}

/// Flatten a checkout request into the processor's bracketed form encoding.
fn checkout_form(request: &CreateCheckoutSession) -> Vec<(String, String)> {
    let item = &request.line_item;
    let mut form: Vec<(String, String)> = vec![
        ("mode".into(), request.mode.as_str().into()),
        ("payment_method_types[0]".into(), "card".into()),
        ("success_url".into(), request.success_url.clone()),
        ("cancel_url".into(), request.cancel_url.clone()),
        ("line_items[0][quantity]".into(), "1".into()),
        ("line_items[0][price_data][currency]".into(), item.currency.clone()),
        ("line_items[0][price_data][unit_amount]".into(), item.unit_amount.to_string()),
        ("line_items[0][price_data][product_data][name]".into(), item.name.clone()),
        ("locale".into(), "ja".into()),
    ];

    if let Some(description) = &item.description {
        form.push((
            "line_items[0][price_data][product_data][description]".into(),
            description.clone(),
        ));
    }
    if let Some(interval) = item.recurring {
        form.push((
            "line_items[0][price_data][recurring][interval]".into(),
            interval.as_str().into(),
        ));
    }
    if let Some(email) = &request.customer_email {
        form.push(("customer_email".into(), email.clone()));
    }
    if let Some(customer) = &request.customer_id {
        form.push(("customer".into(), customer.clone()));
    }
    if request.mode == CheckoutMode::Subscription {
        form.push(("allow_promotion_codes".into(), "true".into()));
        if let Some(days) = request.trial_period_days {
            form.push(("subscription_data[trial_period_days]".into(), days.to_string()));
        }
    }
    for (key, value) in &request.metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
    }

    form
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: ApiErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
    code: Option<String>,
}

/// A failed attempt, before retry classification.
#[derive(Debug)]
struct RequestFailure {
    http_status: Option<u16>,
    message: String,
    code: Option<String>,
}

impl RequestFailure {
    fn transport(err: &reqwest::Error) -> Self {
        Self {
            http_status: if err.is_timeout() { Some(408) } else { None },
            message: format!("Request failed: {err}"),
            code: None,
        }
    }

    fn decode(err: &reqwest::Error) -> Self {
        Self {
            http_status: Some(200),
            message: format!("Failed to decode response: {err}"),
            code: None,
        }
    }

    fn into_billing_error(self, operation: &str) -> BillingError {
        BillingError::ProcessorApiError {
            operation: operation.to_string(),
            message: self.message,
            code: self.code,
            http_status: self.http_status,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self.http_status, None | Some(408) | Some(429) | Some(500..=599))
    }
}

/// Execute an operation with retry logic.
///
/// Retries on rate limits, server errors, timeouts and connection failures.
async fn with_retry<T, F, Fut>(config: &LiveProcessorConfig, operation: &str, operation_fn: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, RequestFailure>>,
{
    let mut attempts = 0;

    loop {
        match operation_fn().await {
            Ok(value) => return Ok(value),
            Err(failure) => {
                if !failure.is_retryable() {
                    return Err(failure.into_billing_error(operation).into());
                }
                if attempts >= config.max_retries {
                    tracing::error!(
                        target: "plangate::billing::processor",
                        operation = operation,
                        attempts = attempts + 1,
                        error = %failure.message,
                        "Payment processor call failed after retries"
                    );
                    return Err(BillingError::RetryLimitExceeded {
                        operation: operation.to_string(),
                    }
                    .into());
                }

                let delay = calculate_backoff_delay(attempts, config.base_delay_ms, config.max_delay_ms);
                tracing::warn!(
                    target: "plangate::billing::processor",
                    operation = operation,
                    attempt = attempts + 1,
                    delay_ms = delay.as_millis() as u64,
                    http_status = ?failure.http_status,
                    "Retrying payment processor call after transient error"
                );
                tokio::time::sleep(delay).await;
                attempts += 1;
            }
        }
    }
}

/// Exponential backoff with 0-25% jitter.
fn calculate_backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let delay_ms = base_ms.saturating_mul(2_u64.saturating_pow(attempt));
    let delay_ms = delay_ms.min(max_ms);

    let jitter = if delay_ms > 0 {
        fastrand::u64(0..=delay_ms / 4)
    } else {
        0
    };
    Duration::from_millis(delay_ms.saturating_add(jitter))
}
