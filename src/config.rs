use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::billing::PlanTier;
use crate::email::WelcomeTemplate;
use crate::error::{PlangateError, Result};
use crate::utils::{get_env_with_prefix, parse_env_with_prefix};

/// Main configuration for a plangate application
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub api_keys: ApiKeysConfig,
    #[serde(default)]
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum request body size in bytes (default: 1MB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

/// Checkout, webhook and processor settings.
///
/// Secrets never round-trip through serde; they only come from the
/// environment or the builder.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BillingConfig {
    /// Public base URL used for checkout redirects.
    #[serde(default = "default_app_base_url")]
    pub app_base_url: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Trial length for free-plan signups.
    #[serde(default = "default_trial_days")]
    pub trial_days: u32,
    #[serde(skip)]
    pub webhook_secret: Option<SecretString>,
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: i64,
    #[serde(skip)]
    pub processor_api_key: Option<SecretString>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvisioningConfig {
    #[serde(default = "default_credential_length")]
    pub credential_length: usize,
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiKeysConfig {
    /// Lowest plan allowed to authenticate with API keys.
    #[serde(default = "default_access_threshold")]
    pub access_threshold: PlanTier,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailConfig {
    #[serde(default = "default_email_from")]
    pub from: String,
    #[serde(default = "default_welcome_subject")]
    pub welcome_subject: String,
    #[serde(skip)]
    pub resend_api_key: Option<SecretString>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_size: default_max_body_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            app_base_url: default_app_base_url(),
            currency: default_currency(),
            trial_days: default_trial_days(),
            webhook_secret: None,
            webhook_tolerance_secs: default_webhook_tolerance_secs(),
            processor_api_key: None,
        }
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            credential_length: default_credential_length(),
            poll_max_attempts: default_poll_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for ApiKeysConfig {
    fn default() -> Self {
        Self {
            access_threshold: default_access_threshold(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from: default_email_from(),
            welcome_subject: default_welcome_subject(),
            resend_api_key: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_app_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_currency() -> String {
    "jpy".to_string()
}

fn default_trial_days() -> u32 {
    3
}

fn default_webhook_tolerance_secs() -> i64 {
    300
}

fn default_credential_length() -> usize {
    16
}

fn default_poll_max_attempts() -> u32 {
    20
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_access_threshold() -> PlanTier {
    PlanTier::Business
}

fn default_email_from() -> String {
    WelcomeTemplate::default().from
}

fn default_welcome_subject() -> String {
    WelcomeTemplate::default().subject
}

impl ServerConfig {
    pub fn addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

impl ProvisioningConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Shorthand for `ConfigBuilder::new().from_env().build()`.
    pub fn from_env() -> Result<Self> {
        ConfigBuilder::new().from_env().build()
    }

    /// Check every section, returning the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.server.addr().map_err(|e| {
            PlangateError::bad_request(format!(
                "Invalid server address {}:{} - {}",
                self.server.host, self.server.port, e
            ))
        })?;

        if self.server.port == 0 {
            return Err(PlangateError::bad_request("Server port must be greater than 0"));
        }
        if self.server.max_body_size == 0 {
            return Err(PlangateError::bad_request(
                "Maximum body size must be greater than 0",
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(PlangateError::bad_request(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            )));
        }

        match url::Url::parse(&self.billing.app_base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(PlangateError::bad_request(format!(
                    "App base URL must be an http(s) URL, got: {}",
                    self.billing.app_base_url
                )));
            }
        }

        let currency = &self.billing.currency;
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_lowercase()) {
            return Err(PlangateError::bad_request(format!(
                "Currency must be a lowercase ISO 4217 code, got: {}",
                currency
            )));
        }

        if self.billing.webhook_tolerance_secs <= 0 {
            return Err(PlangateError::bad_request(
                "Webhook tolerance must be greater than 0",
            ));
        }

        if self.provisioning.credential_length < 12 {
            return Err(PlangateError::bad_request(
                "Temporary credential length must be at least 12",
            ));
        }
        if self.provisioning.poll_max_attempts == 0 {
            return Err(PlangateError::bad_request(
                "Poll attempts must be greater than 0",
            ));
        }

        if self.email.from.trim().is_empty() {
            return Err(PlangateError::bad_request("Email sender must not be empty"));
        }

        Ok(())
    }
}

/// Builder for Config with environment variable support
#[must_use = "builder does nothing until you call build()"]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.config.server.max_body_size = max_body_size;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn with_json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    pub fn with_app_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.billing.app_base_url = url.into();
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<SecretString>) -> Self {
        self.config.billing.webhook_secret = Some(secret.into());
        self
    }

    pub fn with_processor_api_key(mut self, key: impl Into<SecretString>) -> Self {
        self.config.billing.processor_api_key = Some(key.into());
        self
    }

    pub fn with_api_access_threshold(mut self, tier: PlanTier) -> Self {
        self.config.api_keys.access_threshold = tier;
        self
    }

    pub fn with_credential_length(mut self, length: usize) -> Self {
        self.config.provisioning.credential_length = length;
        self
    }

    pub fn with_email_from(mut self, from: impl Into<String>) -> Self {
        self.config.email.from = from.into();
        self
    }

    pub fn with_resend_api_key(mut self, key: impl Into<SecretString>) -> Self {
        self.config.email.resend_api_key = Some(key.into());
        self
    }

    /// Load configuration from environment variables with PLANGATE_ prefix
    pub fn from_env(mut self) -> Self {
        let config = &mut self.config;

        if let Some(host) = get_env_with_prefix("HOST") {
            config.server.host = host;
        }
        if let Some(port) = parse_env_with_prefix("PORT") {
            config.server.port = port;
        }
        if let Some(size) = parse_env_with_prefix("MAX_BODY_SIZE") {
            config.server.max_body_size = size;
        }
        if let Some(level) = get_env_with_prefix("LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = parse_env_with_prefix("LOG_JSON") {
            config.logging.json = json;
        }

        if let Some(url) = get_env_with_prefix("APP_URL") {
            config.billing.app_base_url = url;
        }
        if let Some(currency) = get_env_with_prefix("CURRENCY") {
            config.billing.currency = currency.to_lowercase();
        }
        if let Some(days) = parse_env_with_prefix("TRIAL_DAYS") {
            config.billing.trial_days = days;
        }
        if let Some(secret) = get_env_with_prefix("STRIPE_WEBHOOK_SECRET") {
            config.billing.webhook_secret = Some(SecretString::from(secret));
        }
        if let Some(secs) = parse_env_with_prefix("WEBHOOK_TOLERANCE_SECS") {
            config.billing.webhook_tolerance_secs = secs;
        }
        if let Some(key) = get_env_with_prefix("STRIPE_SECRET_KEY") {
            config.billing.processor_api_key = Some(SecretString::from(key));
        }

        if let Some(length) = parse_env_with_prefix("TEMP_CREDENTIAL_LENGTH") {
            config.provisioning.credential_length = length;
        }
        if let Some(attempts) = parse_env_with_prefix("POLL_MAX_ATTEMPTS") {
            config.provisioning.poll_max_attempts = attempts;
        }
        if let Some(ms) = parse_env_with_prefix("POLL_INTERVAL_MS") {
            config.provisioning.poll_interval_ms = ms;
        }

        if let Some(tier) = parse_env_with_prefix("API_ACCESS_TIER") {
            config.api_keys.access_threshold = tier;
        }

        if let Some(from) = get_env_with_prefix("EMAIL_FROM") {
            config.email.from = from;
        }
        if let Some(subject) = get_env_with_prefix("WELCOME_SUBJECT") {
            config.email.welcome_subject = subject;
        }
        if let Some(key) = get_env_with_prefix("RESEND_API_KEY") {
            config.email.resend_api_key = Some(SecretString::from(key));
        }

        self
    }

    /// Build the configuration, validating all settings
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_defaults_are_valid() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.billing.currency, "jpy");
        assert_eq!(config.billing.trial_days, 3);
        assert_eq!(config.billing.webhook_tolerance_secs, 300);
        assert_eq!(config.provisioning.credential_length, 16);
        assert_eq!(config.provisioning.poll_max_attempts, 20);
        assert_eq!(config.provisioning.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.api_keys.access_threshold, PlanTier::Business);
        assert!(config.billing.webhook_secret.is_none());
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(ConfigBuilder::new().with_log_level("loud").build().is_err());
        assert!(ConfigBuilder::new().with_port(0).build().is_err());
        assert!(ConfigBuilder::new().with_app_base_url("ftp://example.com").build().is_err());
        assert!(ConfigBuilder::new().with_app_base_url("not a url").build().is_err());
        assert!(ConfigBuilder::new().with_credential_length(6).build().is_err());
        assert!(ConfigBuilder::new().with_email_from("  ").build().is_err());
    }

    #[test]
    fn test_from_env_reads_prefixed_values() {
        unsafe {
            std::env::set_var("PLANGATE_API_ACCESS_TIER", "pro");
            std::env::set_var("PLANGATE_STRIPE_WEBHOOK_SECRET", "whsec_from_env");
            std::env::set_var("PLANGATE_POLL_MAX_ATTEMPTS", "not-a-number");
        }
        let config = ConfigBuilder::new().from_env().build().unwrap();
        unsafe {
            std::env::remove_var("PLANGATE_API_ACCESS_TIER");
            std::env::remove_var("PLANGATE_STRIPE_WEBHOOK_SECRET");
            std::env::remove_var("PLANGATE_POLL_MAX_ATTEMPTS");
        }

        assert_eq!(config.api_keys.access_threshold, PlanTier::Pro);
        assert_eq!(
            config
                .billing
                .webhook_secret
                .as_ref()
                .map(|s| s.expose_secret().to_string()),
            Some("whsec_from_env".to_string())
        );
        assert_eq!(config.provisioning.poll_max_attempts, 20);
    }

    #[test]
    fn test_secrets_are_redacted_in_debug() {
        let config = ConfigBuilder::new()
            .with_processor_api_key("sk_test_supersecretvalue123")
            .build()
            .unwrap();
        assert!(!format!("{:?}", config).contains("supersecret"));
    }

    #[test]
    fn test_deserializes_partial_config() {
        let config: Config = serde_json::from_str(
            r#"{"server": {"port": 9000}, "api_keys": {"access_threshold": "starter"}}"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.api_keys.access_threshold, PlanTier::Starter);
        assert!(config.validate().is_ok());
    }
}
