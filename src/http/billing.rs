//! `/api/stripe/*`: signup checkout, plan upgrades, post-payment polling and
//! the processor's webhook.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::RouteModule;
use crate::app::AppContext;
use crate::auth::{Authenticated, Authorized};
use crate::billing::{
    CheckoutRequest, CheckoutStart, PlanTier, UpgradeOutcome, UpgradePreview, UpgradeVerification,
    WebhookOutcome, webhook::SIGNATURE_HEADER,
};
use crate::error::{PlangateError, Result};
use crate::provisioning::SessionPollStatus;

async fn checkout(
    State(ctx): State<AppContext>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutStart>> {
    Ok(Json(ctx.checkout.create_checkout(&req).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpgradeTarget {
    #[serde(default)]
    target_plan_id: Option<String>,
}

impl UpgradeTarget {
    fn require(&self) -> Result<&str> {
        self.target_plan_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| PlangateError::bad_request("targetPlanId is required"))
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
enum UpgradeResponse {
    Applied { applied: bool, plan_id: PlanTier },
    Payment { url: String, session_id: String, amount: i64 },
    Redirect { redirect: String },
}

impl From<UpgradeOutcome> for UpgradeResponse {
    fn from(outcome: UpgradeOutcome) -> Self {
        match outcome {
            UpgradeOutcome::Applied { plan } => Self::Applied {
                applied: true,
                plan_id: plan,
            },
            UpgradeOutcome::PaymentRequired {
                session_id,
                url,
                quote,
            } => Self::Payment {
                url,
                session_id,
                amount: quote.amount,
            },
            UpgradeOutcome::ContactSales { redirect } => Self::Redirect { redirect },
        }
    }
}

async fn preview_upgrade(
    State(ctx): State<AppContext>,
    auth: Authorized<Authenticated>,
    Query(target): Query<UpgradeTarget>,
) -> Result<Json<UpgradePreview>> {
    let preview = ctx.upgrades.preview(&auth.account_id, target.require()?).await?;
    Ok(Json(preview))
}

async fn commit_upgrade(
    State(ctx): State<AppContext>,
    auth: Authorized<Authenticated>,
    Json(target): Json<UpgradeTarget>,
) -> Result<Json<UpgradeResponse>> {
    let outcome = ctx.upgrades.commit(&auth.account_id, target.require()?).await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum UpgradePollStatus {
    Pending,
    Ready {
        #[serde(rename = "planId")]
        plan_id: PlanTier,
    },
}

impl From<UpgradeVerification> for UpgradePollStatus {
    fn from(verification: UpgradeVerification) -> Self {
        match verification {
            UpgradeVerification::Pending => Self::Pending,
            UpgradeVerification::Ready { plan } => Self::Ready { plan_id: plan },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SessionResponse {
    Signup(SessionPollStatus),
    Upgrade(UpgradePollStatus),
}

/// Polled by the browser after returning from the hosted payment page.
async fn session_status(
    State(ctx): State<AppContext>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<SessionResponse>> {
    let session_id = query
        .session_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| PlangateError::bad_request("Missing session_id"))?;

    if query.kind.as_deref() == Some("upgrade") {
        let verification = ctx.upgrades.verify_upgrade(session_id).await?;
        return Ok(Json(SessionResponse::Upgrade(verification.into())));
    }

    let status = ctx.reconciler.poll_status(session_id).await?;
    Ok(Json(SessionResponse::Signup(status)))
}

async fn webhook(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let handler = ctx.webhooks()?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| PlangateError::bad_request("Missing stripe-signature header"))?;

    let event = handler.verify_signature(&body, signature)?;
    let status = match handler.handle_event(event).await? {
        // Non-2xx makes the processor redeliver
        WebhookOutcome::Deferred => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };

    Ok((status, Json(serde_json::json!({ "received": true }))))
}

pub struct BillingModule;

impl RouteModule for BillingModule {
    fn name(&self) -> &'static str {
        "billing"
    }

    fn routes(&self) -> Router<AppContext> {
        Router::new()
            .route("/checkout", post(checkout))
            .route("/upgrade", get(preview_upgrade).post(commit_upgrade))
            .route("/session", get(session_status))
            .route("/webhook", post(webhook))
    }

    fn prefix(&self) -> Option<&str> {
        Some("/api/stripe")
    }
}
