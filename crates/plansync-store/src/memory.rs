//! In-memory revision-checked document store
//!
//! Each document lives in its own [`DashMap`] shard entry; holding the entry
//! guard for the whole compare-and-swap makes every write atomic with respect
//! to concurrent writers of the same document.

use crate::error::StoreError;
use crate::preview::PreviewRef;
use crate::store::{MetadataPatch, ProjectDocumentStore, WriteOutcome, WriteRequest};
use chrono::Utc;
use dashmap::DashMap;
use plansync_document::{
    validate_name, DesignPayload, DocumentId, NewDocument, ProjectDocument,
};
use std::sync::atomic::{AtomicU64, Ordering};

/// Store-side payload limits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreLimits {
    /// Largest accepted canonical payload encoding
    pub max_payload_bytes: Option<usize>,
}

impl StoreLimits {
    fn check(&self, payload: &DesignPayload) -> Option<String> {
        let max = self.max_payload_bytes?;
        let len = payload.encoded_len();
        (len > max).then(|| format!("payload is {len} bytes, limit is {max}"))
    }
}

/// Document store held in process memory
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<DocumentId, ProjectDocument>,
    previews: DashMap<DocumentId, PreviewRef>,
    limits: StoreLimits,
    write_calls: AtomicU64,
    accepted_writes: AtomicU64,
}

impl MemoryDocumentStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create store with payload limits
    #[inline]
    #[must_use]
    pub fn with_limits(limits: StoreLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Seed a document as-is (tests, fixtures)
    pub fn insert(&self, document: ProjectDocument) {
        self.documents.insert(document.id, document);
    }

    /// Current stored version, bypassing the async contract
    #[must_use]
    pub fn peek(&self, id: &DocumentId) -> Option<ProjectDocument> {
        self.documents.get(id).map(|entry| entry.value().clone())
    }

    /// Last preview attached to a document
    #[must_use]
    pub fn preview_for(&self, id: &DocumentId) -> Option<PreviewRef> {
        self.previews.get(id).map(|entry| entry.value().clone())
    }

    /// Number of documents
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Check if store holds no documents
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Write calls received, whatever their outcome
    #[inline]
    #[must_use]
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Writes that advanced a revision
    #[inline]
    #[must_use]
    pub fn accepted_writes(&self) -> u64 {
        self.accepted_writes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProjectDocumentStore for MemoryDocumentStore {
    async fn read(&self, id: &DocumentId) -> Result<ProjectDocument, StoreError> {
        self.peek(id).ok_or(StoreError::NotFound(*id))
    }

    async fn create(&self, draft: NewDocument) -> Result<ProjectDocument, StoreError> {
        let name = validate_name(draft.name.clone())
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        if let Some(message) = self.limits.check(&draft.payload) {
            return Err(StoreError::Validation(message));
        }

        let document = ProjectDocument::from_draft(
            DocumentId::new(),
            NewDocument { name, ..draft },
            Utc::now(),
        );
        self.documents.insert(document.id, document.clone());
        tracing::debug!("Created document {} ({})", document.id, document.name);
        Ok(document)
    }

    async fn write(&self, request: WriteRequest) -> Result<WriteOutcome, StoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.limits.check(&request.payload) {
            return Ok(WriteOutcome::Rejected { message });
        }

        let mut entry = self
            .documents
            .get_mut(&request.id)
            .ok_or(StoreError::NotFound(request.id))?;
        let document = entry.value_mut();

        if document.revision != request.believed_revision {
            tracing::debug!(
                "Rejecting write to {}: believed {}, stored {}",
                request.id,
                request.believed_revision,
                document.revision
            );
            return Ok(WriteOutcome::Conflict {
                server_revision: document.revision,
                server_payload: document.payload.clone(),
            });
        }

        document.revision = document.revision.next();
        document.payload = request.payload;
        document.updated_at = Utc::now();
        let stored = document.clone();
        drop(entry);

        if let Some(preview) = request.preview {
            self.previews.insert(request.id, preview);
        }
        self.accepted_writes.fetch_add(1, Ordering::SeqCst);
        Ok(WriteOutcome::Accepted(stored))
    }

    async fn update_metadata(
        &self,
        id: &DocumentId,
        patch: MetadataPatch,
    ) -> Result<(), StoreError> {
        let mut entry = self.documents.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        if let Some(name) = patch.name {
            let name = validate_name(name).map_err(|e| StoreError::Validation(e.to_string()))?;
            let document = entry.value_mut();
            document.name = name;
            document.updated_at = Utc::now();
        }
        Ok(())
    }
}
