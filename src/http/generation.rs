use axum::{Json, Router, extract::State, routing::post};

use super::RouteModule;
use crate::app::AppContext;
use crate::auth::{Authorized, ImageGeneration, VideoGeneration};
use crate::error::Result;
use crate::generation::{GenerationKind, GenerationOutput, GenerationRequest};
use crate::validation::ValidatedJson;

async fn generate_image(
    State(ctx): State<AppContext>,
    auth: Authorized<ImageGeneration>,
    ValidatedJson(req): ValidatedJson<GenerationRequest>,
) -> Result<Json<GenerationOutput>> {
    let output = ctx.generation()?.run(auth.account_id, GenerationKind::Image, &req).await?;
    Ok(Json(output))
}

async fn generate_video(
    State(ctx): State<AppContext>,
    auth: Authorized<VideoGeneration>,
    ValidatedJson(req): ValidatedJson<GenerationRequest>,
) -> Result<Json<GenerationOutput>> {
    let output = ctx.generation()?.run(auth.account_id, GenerationKind::Video, &req).await?;
    Ok(Json(output))
}

/// `/api/v1/generate/*`: plan-gated, quota-metered generation endpoints.
pub struct GenerationModule;

impl RouteModule for GenerationModule {
    fn name(&self) -> &'static str {
        "generation"
    }

    fn routes(&self) -> Router<AppContext> {
        Router::new()
            .route("/generate/image", post(generate_image))
            .route("/generate/video", post(generate_video))
    }

    fn prefix(&self) -> Option<&str> {
        Some("/api/v1")
    }
}
