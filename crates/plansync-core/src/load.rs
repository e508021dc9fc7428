//! Load coordination
//!
//! A load is a hard boundary: on success the model, metadata and sync state
//! are replaced and undo history and selection are dropped. On failure
//! nothing the session holds is touched.

use crate::error::SyncError;
use crate::model::EditableModel;
use crate::session::{LoadingGuard, ProjectSession};
use crate::state::SaveTicket;
use crate::types::{LoadOutcome, SyncStatus};
use futures::FutureExt;
use plansync_document::{
    validate_name, DesignPayload, DocumentId, DocumentMeta, NewDocument, ProjectDocument, Revision,
};
use std::panic::AssertUnwindSafe;

impl<M: EditableModel> ProjectSession<M> {
    /// Fetch a document and bind the session to it
    pub async fn load(&self, id: DocumentId) -> LoadOutcome {
        let attempt = AssertUnwindSafe(self.run_load(id)).catch_unwind().await;
        match attempt.unwrap_or_else(|panic| Err(SyncError::from_panic("load", &*panic))) {
            Ok((meta, revision)) => LoadOutcome::Loaded { meta, revision },
            Err(error) => {
                tracing::warn!("Loading {} failed: {}", id, error);
                LoadOutcome::from(&error)
            }
        }
    }

    /// Create an empty document and bind the session to it
    ///
    /// The store is written first; the model is reset only once the
    /// document exists. No broadcast is sent.
    ///
    /// # Errors
    /// - [`SyncError::Validation`] for a blank name
    /// - [`SyncError::Offline`] while offline
    /// - [`SyncError::Busy`] if a save, load or resolution is running
    /// - store failures after retries
    pub async fn create_new(&self, name: Option<String>) -> Result<DocumentMeta, SyncError> {
        self.ensure_open()?;
        let name = name.unwrap_or_else(|| self.config().default_document_name.clone());
        let name = validate_name(name).map_err(|e| SyncError::Validation(e.to_string()))?;
        if self.status() == SyncStatus::Offline {
            return Err(SyncError::Offline);
        }
        let _gate = self.acquire_gate()?;
        let ticket = self.machine.ticket();

        let draft = NewDocument {
            name,
            description: String::new(),
            payload: DesignPayload::empty(),
        };
        let document = self.create_document("create_new", draft).await?;
        if !self.machine.is_current(&ticket) || self.is_closed() {
            return Err(SyncError::Superseded);
        }

        let meta = self.adopt(&document, &ticket)?;
        tracing::info!("Created document {} ({})", document.id, document.name);
        Ok(meta)
    }

    async fn run_load(&self, id: DocumentId) -> Result<(DocumentMeta, Revision), SyncError> {
        self.ensure_open()?;
        let _gate = self.acquire_gate()?;
        let ticket = self.machine.ticket();
        self.reload(id, &ticket).await
    }

    /// Fetch and adopt `id`; the caller holds the gate
    pub(crate) async fn reload(
        &self,
        id: DocumentId,
        ticket: &SaveTicket,
    ) -> Result<(DocumentMeta, Revision), SyncError> {
        let _loading = LoadingGuard::raise(&self.loading);
        tracing::info!("Loading document {}", id);

        let store = &self.store;
        let document_id = &id;
        let document = self
            .with_retry("load", move |_| store.read(document_id))
            .await?;

        if !self.machine.is_current(ticket) || self.is_closed() {
            return Err(SyncError::Superseded);
        }
        let meta = self.adopt(&document, ticket)?;
        Ok((meta, document.revision))
    }

    /// Replace model, metadata and sync state with `document`
    fn adopt(
        &self,
        document: &ProjectDocument,
        ticket: &SaveTicket,
    ) -> Result<DocumentMeta, SyncError> {
        {
            let mut model = self.model.lock();
            model.replace(&document.payload)?;
            model.clear_history();
            model.clear_selection();
        }
        let meta = self.bind_meta(document);
        self.machine
            .bind_loaded(ticket, document.revision)
            .applied()?;
        Ok(meta)
    }
}
