//! Save coordination
//!
//! `save()` serializes the model, attaches a best-effort preview and sends
//! one compare-and-swap write through the retry policy. The store's answer
//! is classified into the state machine:
//!
//! | Store answer         | State       | Outcome    |
//! |----------------------|-------------|------------|
//! | accepted             | `synced`    | `Success`  |
//! | stale revision       | `conflict`  | `Conflict` |
//! | rejected payload     | `error`     | VALIDATION |
//! | transport, exhausted | `error`     | NETWORK    |
//! | panic                | `error`     | UNKNOWN    |

use crate::error::SyncError;
use crate::model::EditableModel;
use crate::session::ProjectSession;
use crate::state::SaveTicket;
use crate::types::SaveOutcome;
use futures::FutureExt;
use plansync_document::{validate_name, DocumentId, NewDocument, ProjectDocument, Revision};
use plansync_store::{PreviewRef, PreviewRequest, WriteOutcome, WriteRequest};
use std::panic::AssertUnwindSafe;

impl<M: EditableModel> ProjectSession<M> {
    /// Persist the model to the bound document
    ///
    /// Never fails: every problem is reported in the returned outcome.
    /// Without a bound document it returns a NOT_FOUND error and leaves the
    /// sync state untouched.
    pub async fn save(&self) -> SaveOutcome {
        match self.run_save().await {
            Ok(outcome) => outcome,
            Err(error) => SaveOutcome::from(&error),
        }
    }

    /// Persist the model as a new document named `name` and bind to it
    pub async fn save_as(&self, name: impl Into<String>) -> SaveOutcome {
        match self.run_save_as(name.into()).await {
            Ok(outcome) => outcome,
            Err(error) => SaveOutcome::from(&error),
        }
    }

    async fn run_save(&self) -> Result<SaveOutcome, SyncError> {
        self.ensure_open()?;
        let document_id = self.document_id().ok_or(SyncError::NoDocument)?;
        let _gate = self.acquire_gate()?;
        let believed = self.believed_revision()?;
        let ticket = self.machine.begin_save()?;

        tracing::info!("Saving document {} against {}", document_id, believed);
        let attempt = AssertUnwindSafe(self.write_payload(document_id, believed))
            .catch_unwind()
            .await;
        let result = attempt.unwrap_or_else(|panic| Err(SyncError::from_panic("save", &*panic)));

        match result {
            Ok(WriteOutcome::Accepted(document)) => {
                self.machine
                    .commit_saved(&ticket, document_id, document.revision)
                    .applied()?;
                self.refresh_meta(&document);
                tracing::info!("Saved document {} at {}", document_id, document.revision);
                Ok(SaveOutcome::Success {
                    new_revision: document.revision,
                })
            }
            Ok(WriteOutcome::Conflict {
                server_revision,
                server_payload,
            }) => {
                tracing::warn!(
                    "Save of {} conflicted: believed {}, server at {}",
                    document_id,
                    believed,
                    server_revision
                );
                self.machine
                    .commit_conflict(&ticket, server_revision, server_payload.clone())
                    .applied()?;
                Ok(SaveOutcome::Conflict {
                    server_revision,
                    server_payload,
                })
            }
            Ok(WriteOutcome::Rejected { message }) => {
                self.fail(&ticket, SyncError::Validation(message))
            }
            Err(error) => self.fail(&ticket, error),
        }
    }

    async fn run_save_as(&self, name: String) -> Result<SaveOutcome, SyncError> {
        self.ensure_open()?;
        let name = validate_name(name).map_err(|e| SyncError::Validation(e.to_string()))?;
        let _gate = self.acquire_gate()?;
        let ticket = self.machine.begin_save()?;

        let attempt = AssertUnwindSafe(self.create_from_model(name))
            .catch_unwind()
            .await;
        let result = attempt.unwrap_or_else(|panic| Err(SyncError::from_panic("save_as", &*panic)));

        match result {
            Ok(document) => {
                self.machine
                    .commit_saved(&ticket, document.id, document.revision)
                    .applied()?;
                self.bind_meta(&document);
                tracing::info!("Saved design as {} ({})", document.id, document.name);
                Ok(SaveOutcome::Success {
                    new_revision: document.revision,
                })
            }
            Err(error) => self.fail(&ticket, error),
        }
    }

    async fn write_payload(
        &self,
        document_id: DocumentId,
        believed: Revision,
    ) -> Result<WriteOutcome, SyncError> {
        let payload = self.model.lock().snapshot()?;
        let preview = self.render_preview(document_id).await;
        let request = WriteRequest::new(document_id, believed, payload).with_preview(preview);

        let store = &self.store;
        self.with_retry("save", move |_| store.write(request.clone()))
            .await
    }

    async fn create_from_model(&self, name: String) -> Result<ProjectDocument, SyncError> {
        let payload = self.model.lock().snapshot()?;
        let description = self
            .meta
            .read()
            .as_ref()
            .map(|meta| meta.description.clone())
            .unwrap_or_default();
        let draft = NewDocument {
            name,
            description,
            payload,
        };
        self.create_document("save_as", draft).await
    }

    /// Best-effort preview; failures only cost the thumbnail
    async fn render_preview(&self, document_id: DocumentId) -> Option<PreviewRef> {
        if !self.config().previews_enabled {
            return None;
        }
        let generator = self.preview.as_ref()?;
        let request = PreviewRequest {
            owner_id: self.config().owner_id.clone(),
            document_id,
        };
        match generator.generate(&request).await {
            Ok(preview) => Some(preview),
            Err(e) => {
                tracing::warn!("Preview for {} failed, saving without it: {}", document_id, e);
                None
            }
        }
    }

    fn fail(&self, ticket: &SaveTicket, error: SyncError) -> Result<SaveOutcome, SyncError> {
        tracing::error!("Save failed: {}", error);
        self.machine.commit_failed(ticket, error.to_string()).applied()?;
        Err(error)
    }
}
