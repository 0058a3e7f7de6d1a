//! plangate - plan entitlements and metered billing for Axum SaaS backends
//!
//! plangate decides who may call an endpoint, how much they may use it, what
//! an upgrade costs, and turns a paid checkout into a usable account.
//!
//! # Features
//!
//! - **API keys**: hashed, prefix-indexed keys that fail closed
//! - **Entitlements**: fixed plan tiers with capabilities and monthly quotas
//! - **Usage**: generations counted per UTC calendar month
//! - **Proration**: day-based pricing of mid-cycle upgrades
//! - **Provisioning**: webhook and poll converge on one account per checkout
//! - **Request gate**: one extractor for authentication, plan and quota checks
//! - **Testing**: in-memory fakes and request scenarios
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use plangate::{App, ConfigBuilder};
//!
//! #[tokio::main]
//! async fn main() -> plangate::Result<()> {
//!     plangate::init_tracing();
//!
//!     let config = ConfigBuilder::new().from_env().build()?;
//!     App::builder().with_config(config).build()?.serve().await
//! }
//! ```

mod app;
pub mod auth;
pub mod billing;
pub mod clock;
mod config;
mod core;
pub mod email;
mod error;
pub mod generation;
pub mod http;
pub mod provisioning;
pub mod storage;
pub mod testing;
pub mod traits;
mod utils;
pub mod validation;

pub use app::{AppContext, AppContextBuilder};
pub use config::{
    ApiKeysConfig, BillingConfig, Config, ConfigBuilder, EmailConfig, LoggingConfig,
    ProvisioningConfig, ServerConfig,
};
pub use core::{App, AppBuilder, MakeRequestUuid};
pub use error::{AUTHENTICATION_FAILED, ErrorKind, ErrorResponse, PlangateError, Result, UpstreamService};
pub use http::RouteModule;
pub use validation::ValidatedJson;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "plangate=info,tower_http=info";

/// Initialize tracing/logging with sensible defaults
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "plangate=debug")
/// - `PLANGATE_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let json_logs = std::env::var("PLANGATE_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    install(env_filter, json_logs);
}

/// Initialize tracing from the `logging` config section
pub fn init_tracing_with_config(config: &Config) {
    install(EnvFilter::new(&config.logging.level), config.logging.json);
}

fn install(env_filter: EnvFilter, json: bool) {
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
