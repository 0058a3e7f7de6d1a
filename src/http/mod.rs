//! HTTP surface: route modules over [`AppContext`](crate::AppContext).
//!
//! Every handler authorizes through the [`Authorized`](crate::auth::Authorized)
//! extractor and returns `plangate::Result`, so rejections share one body shape.

mod api_keys;
mod billing;
mod generation;
pub mod routes;
mod usage;

pub use api_keys::ApiKeysModule;
pub use billing::BillingModule;
pub use generation::GenerationModule;
pub use routes::RouteModule;
pub use usage::UsageModule;
