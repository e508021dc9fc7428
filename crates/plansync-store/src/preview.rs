//! Preview image side channel
//!
//! A preview is a thumbnail rendered from the live scene and uploaded next
//! to the document. Renderer and scene handles stay inside the implementor.

use crate::error::PreviewError;
use plansync_document::DocumentId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Renders and uploads a preview for a document
#[async_trait::async_trait]
pub trait PreviewGenerator: Send + Sync {
    /// Produce a preview and return where it was stored
    async fn generate(&self, request: &PreviewRequest) -> Result<PreviewRef, PreviewError>;
}

/// What to render a preview for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewRequest {
    pub owner_id: Option<String>,
    pub document_id: DocumentId,
}

/// Location of an uploaded preview
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreviewRef(pub String);

impl PreviewRef {
    /// Preview URL
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PreviewRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
