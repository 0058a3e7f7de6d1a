//! Image and video generation.
//!
//! The provider and the object store are external collaborators behind
//! [`GenerationProvider`] and [`ObjectStorage`]. [`GenerationService`] records
//! each attempt so the usage counter can see it.

mod pipeline;

pub use pipeline::{GenerationOutput, GenerationRequest, GenerationService};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// What is being generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Image,
    Video,
}

impl GenerationKind {
    pub const ALL: [GenerationKind; 2] = [GenerationKind::Image, GenerationKind::Video];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl GenerationStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Output of a provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedAsset {
    /// Raw bytes that still need to be stored.
    Bytes { data: Vec<u8>, content_type: String },
    /// Already hosted by the provider.
    Url(String),
}

/// Remote image/video generator.
///
/// Errors should be upstream errors; their message is shown to the caller.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, kind: GenerationKind, request: &GenerationRequest) -> Result<GeneratedAsset>;
}

/// Public object storage for generated assets.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `data` and return its public URL.
    async fn put(&self, data: Vec<u8>, content_type: &str, path_hint: &str) -> Result<String>;
}
