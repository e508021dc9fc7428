//! The remote document store contract

use crate::error::StoreError;
use crate::preview::PreviewRef;
use plansync_document::{DesignPayload, DocumentId, NewDocument, ProjectDocument, Revision};
use serde::{Deserialize, Serialize};

/// Durable storage for project documents
///
/// Implementations must make `write` an atomic compare-and-swap on the
/// document revision: the write is applied only if `believed_revision`
/// equals the stored revision, and the store alone assigns the next one.
///
/// Transport-class failures are reported as `Err(StoreError::Transport)`.
/// Conflicts and validation rejections are reported as `Ok(WriteOutcome)`
/// so that a retry layer can never replay a rejected write.
#[async_trait::async_trait]
pub trait ProjectDocumentStore: Send + Sync {
    /// Fetch the current version of a document
    async fn read(&self, id: &DocumentId) -> Result<ProjectDocument, StoreError>;

    /// Persist a new document at [`Revision::INITIAL`]
    async fn create(&self, draft: NewDocument) -> Result<ProjectDocument, StoreError>;

    /// Revision-checked payload write
    async fn write(&self, request: WriteRequest) -> Result<WriteOutcome, StoreError>;

    /// Update metadata; never changes the revision
    async fn update_metadata(&self, id: &DocumentId, patch: MetadataPatch)
        -> Result<(), StoreError>;
}

/// Compare-and-swap write request
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub id: DocumentId,
    pub believed_revision: Revision,
    pub payload: DesignPayload,
    pub preview: Option<PreviewRef>,
}

impl WriteRequest {
    /// Create write request without preview
    #[inline]
    #[must_use]
    pub fn new(id: DocumentId, believed_revision: Revision, payload: DesignPayload) -> Self {
        Self {
            id,
            believed_revision,
            payload,
            preview: None,
        }
    }

    /// Attach preview reference
    #[inline]
    #[must_use]
    pub fn with_preview(mut self, preview: Option<PreviewRef>) -> Self {
        self.preview = preview;
        self
    }
}

/// Business outcome of a write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Write applied; carries the stored document at its new revision
    Accepted(ProjectDocument),
    /// Believed revision was stale
    Conflict {
        server_revision: Revision,
        server_payload: DesignPayload,
    },
    /// Payload refused (size, shape)
    Rejected { message: String },
}

/// Metadata update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPatch {
    pub name: Option<String>,
}

impl MetadataPatch {
    /// Rename patch
    #[inline]
    #[must_use]
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}
