use axum::{Json, Router, extract::State, routing::get};

use super::RouteModule;
use crate::app::AppContext;
use crate::auth::{Authenticated, Authorized};
use crate::billing::UsageReport;
use crate::error::Result;

async fn usage(
    State(ctx): State<AppContext>,
    auth: Authorized<Authenticated>,
) -> Result<Json<UsageReport>> {
    Ok(Json(ctx.usage.report(&auth.account_id, auth.tier).await?))
}

/// `GET /api/usage`: this month's generations against plan limits.
pub struct UsageModule;

impl RouteModule for UsageModule {
    fn name(&self) -> &'static str {
        "usage"
    }

    fn routes(&self) -> Router<AppContext> {
        Router::new().route("/usage", get(usage))
    }

    fn prefix(&self) -> Option<&str> {
        Some("/api")
    }
}
