use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::{GeneratedAsset, GenerationKind, GenerationProvider, GenerationStatus, ObjectStorage};
use crate::clock::Clock;
use crate::error::{PlangateError, Result};
use crate::storage::{AccountId, GenerationRecord, GenerationStore, GenerationUpdate};

/// Parameters forwarded to the provider.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[validate(length(min = 1, max = 4000, message = "Prompt is required"))]
    pub prompt: String,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    /// Source image for edits and image-to-video.
    #[serde(default)]
    #[validate(url(message = "Must be a valid URL"))]
    pub reference_url: Option<String>,
}

/// Completed generation returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutput {
    pub id: Uuid,
    pub kind: GenerationKind,
    pub status: GenerationStatus,
    pub url: String,
}

/// Runs one generation and keeps its record up to date.
///
/// The record is inserted as `processing` before the provider is called, so
/// the attempt counts against quota even if it later fails.
pub struct GenerationService {
    store: Arc<dyn GenerationStore>,
    provider: Arc<dyn GenerationProvider>,
    storage: Arc<dyn ObjectStorage>,
    clock: Arc<dyn Clock>,
}

impl GenerationService {
    pub fn new(
        store: Arc<dyn GenerationStore>,
        provider: Arc<dyn GenerationProvider>,
        storage: Arc<dyn ObjectStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            provider,
            storage,
            clock,
        }
    }

    pub async fn run(
        &self,
        account_id: AccountId,
        kind: GenerationKind,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput> {
        let record = GenerationRecord {
            id: Uuid::new_v4(),
            account_id,
            kind,
            status: GenerationStatus::Processing,
            prompt: request.prompt.clone(),
            output_url: None,
            error_message: None,
            created_at: self.clock.now(),
        };
        self.store.insert_generation(&record).await?;

        match self.produce(&record, request).await {
            Ok(url) => {
                self.store
                    .update_generation(
                        &record.id,
                        GenerationUpdate {
                            status: GenerationStatus::Completed,
                            output_url: Some(url.clone()),
                            error_message: None,
                        },
                    )
                    .await?;

                tracing::info!(
                    target: "plangate::generation",
                    generation_id = %record.id,
                    account_id = %account_id,
                    kind = %kind,
                    "Generation completed"
                );

                Ok(GenerationOutput {
                    id: record.id,
                    kind,
                    status: GenerationStatus::Completed,
                    url,
                })
            }
            Err(err) => {
                tracing::warn!(
                    target: "plangate::generation",
                    generation_id = %record.id,
                    account_id = %account_id,
                    kind = %kind,
                    error = %err,
                    "Generation failed"
                );

                if let Err(update_err) = self
                    .store
                    .update_generation(
                        &record.id,
                        GenerationUpdate {
                            status: GenerationStatus::Failed,
                            output_url: None,
                            error_message: Some(err.to_string()),
                        },
                    )
                    .await
                {
                    tracing::error!(
                        target: "plangate::generation",
                        generation_id = %record.id,
                        error = %update_err,
                        "Failed to mark generation as failed"
                    );
                }

                Err(err)
            }
        }
    }

    async fn produce(&self, record: &GenerationRecord, request: &GenerationRequest) -> Result<String> {
        match self.provider.generate(record.kind, request).await? {
            GeneratedAsset::Url(url) => Ok(url),
            GeneratedAsset::Bytes { data, content_type } => {
                let path = format!(
                    "{}/{}/{}-{}",
                    record.account_id,
                    record.kind,
                    record.created_at.format("%Y%m%d"),
                    record.id
                );
                self.storage
                    .put(data, &content_type, &path)
                    .await
                    .map_err(|e| match e {
                        PlangateError::Upstream { .. } => e,
                        other => PlangateError::upstream(
                            crate::error::UpstreamService::ObjectStorage,
                            other.to_string(),
                        ),
                    })
            }
        }
    }
}
