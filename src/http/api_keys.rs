//! `/api/api-keys`: list, issue and revoke the caller's API keys.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::get,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RouteModule;
use crate::app::AppContext;
use crate::auth::{ApiAccess, ApiKeySummary, Authenticated, Authorized};
use crate::error::Result;

#[derive(Debug, Deserialize)]
struct CreateKeyRequest {
    #[serde(default)]
    name: String,
}

/// Returned once at creation; the key cannot be read back later.
#[derive(Debug, Serialize)]
struct CreatedKey {
    key: String,
    prefix: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RevokeKeyRequest {
    id: Uuid,
}

#[derive(Debug, Serialize)]
struct KeyList {
    keys: Vec<ApiKeySummary>,
}

async fn list_keys(
    State(ctx): State<AppContext>,
    auth: Authorized<Authenticated>,
) -> Result<Json<KeyList>> {
    let keys = ctx.vault.list(&auth.account_id).await?;
    Ok(Json(KeyList { keys }))
}

async fn create_key(
    State(ctx): State<AppContext>,
    auth: Authorized<ApiAccess>,
    Json(req): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<CreatedKey>)> {
    let issued = ctx.vault.issue(&auth.account_id, &req.name).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedKey {
            prefix: issued.record.key_prefix.clone(),
            name: issued.record.name.clone(),
            key: issued.key,
        }),
    ))
}

async fn revoke_key(
    State(ctx): State<AppContext>,
    auth: Authorized<Authenticated>,
    Json(req): Json<RevokeKeyRequest>,
) -> Result<Json<serde_json::Value>> {
    ctx.vault.revoke(&auth.account_id, &req.id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub struct ApiKeysModule;

impl RouteModule for ApiKeysModule {
    fn name(&self) -> &'static str {
        "api_keys"
    }

    fn routes(&self) -> Router<AppContext> {
        Router::new().route("/api-keys", get(list_keys).post(create_key).delete(revoke_key))
    }

    fn prefix(&self) -> Option<&str> {
        Some("/api")
    }
}
