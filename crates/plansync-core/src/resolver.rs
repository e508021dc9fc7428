//! Conflict resolution
//!
//! Applies one of three policies to a session sitting in `conflict`:
//! - `keep_local` re-reads the current server revision and writes the
//!   local design against it
//! - `keep_server` reloads the server state, falling back to the snapshot
//!   payload when the reload fails
//! - `keep_both` saves the local design as a new document, then proceeds
//!   as `keep_server`
//!
//! Every successful path leaves the session `synced` with no snapshot.

use crate::error::SyncError;
use crate::model::EditableModel;
use crate::session::ProjectSession;
use crate::state::SaveTicket;
use crate::types::{ConflictSnapshot, ResolutionOutcome, ResolveStrategy};
use futures::FutureExt;
use plansync_document::{DocumentId, NewDocument};
use plansync_store::{WriteOutcome, WriteRequest};
use std::panic::AssertUnwindSafe;

impl<M: EditableModel> ProjectSession<M> {
    /// Resolve the active conflict with `strategy`
    ///
    /// Returns [`ResolutionOutcome::NotInConflict`] without doing anything
    /// unless the session is in `conflict`. On failure the conflict stays
    /// open and its error message is set.
    pub async fn resolve_conflict(&self, strategy: ResolveStrategy) -> ResolutionOutcome {
        let attempt = AssertUnwindSafe(self.run_resolution(strategy))
            .catch_unwind()
            .await;
        match attempt.unwrap_or_else(|panic| Err(SyncError::from_panic("resolve", &*panic))) {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!("Resolving conflict with {} failed: {}", strategy, error);
                if !matches!(error, SyncError::Busy | SyncError::Superseded) {
                    self.machine.note_resolution_failure(error.to_string());
                }
                ResolutionOutcome::from(&error)
            }
        }
    }

    async fn run_resolution(
        &self,
        strategy: ResolveStrategy,
    ) -> Result<ResolutionOutcome, SyncError> {
        self.ensure_open()?;
        let Some(snapshot) = self.machine.active_conflict() else {
            return Ok(ResolutionOutcome::NotInConflict);
        };
        let document_id = self.document_id().ok_or(SyncError::NoDocument)?;
        let _gate = self.acquire_gate()?;
        let ticket = self.machine.ticket();

        tracing::info!(
            "Resolving conflict on {} (server at {}) with {}",
            document_id,
            snapshot.revision,
            strategy
        );
        match strategy {
            ResolveStrategy::KeepLocal => self.keep_local(document_id, &ticket).await,
            ResolveStrategy::KeepServer => {
                self.keep_server(document_id, snapshot, &ticket, None).await
            }
            ResolveStrategy::KeepBoth => self.keep_both(document_id, snapshot, &ticket).await,
        }
    }

    async fn keep_local(
        &self,
        document_id: DocumentId,
        ticket: &SaveTicket,
    ) -> Result<ResolutionOutcome, SyncError> {
        let payload = self.model.lock().snapshot()?;
        let store = &self.store;
        let id = &document_id;

        let current = self
            .with_retry("resolve.read", move |_| store.read(id))
            .await?;
        let request = WriteRequest::new(document_id, current.revision, payload);
        let outcome = self
            .with_retry("resolve.write", move |_| store.write(request.clone()))
            .await?;

        match outcome {
            WriteOutcome::Accepted(document) => {
                self.machine
                    .commit_saved(ticket, document_id, document.revision)
                    .applied()?;
                self.refresh_meta(&document);
                Ok(ResolutionOutcome::Resolved {
                    strategy: ResolveStrategy::KeepLocal,
                    revision: document.revision,
                    copy: None,
                    reloaded: false,
                })
            }
            WriteOutcome::Conflict {
                server_revision,
                server_payload,
            } => {
                tracing::warn!(
                    "Forced write to {} met a newer revision {}",
                    document_id,
                    server_revision
                );
                self.machine
                    .commit_conflict(ticket, server_revision, server_payload)
                    .applied()?;
                Ok(ResolutionOutcome::Conflict { server_revision })
            }
            WriteOutcome::Rejected { message } => Err(SyncError::Validation(message)),
        }
    }

    async fn keep_server(
        &self,
        document_id: DocumentId,
        snapshot: ConflictSnapshot,
        ticket: &SaveTicket,
        copy: Option<DocumentId>,
    ) -> Result<ResolutionOutcome, SyncError> {
        let strategy = if copy.is_some() {
            ResolveStrategy::KeepBoth
        } else {
            ResolveStrategy::KeepServer
        };
        // Model changes only through the reload or the fallback below
        let (revision, reloaded) = match self.reload(document_id, ticket).await {
            Ok((_, revision)) => (revision, true),
            Err(SyncError::Superseded) => return Err(SyncError::Superseded),
            Err(error) => {
                tracing::warn!(
                    "Reload of {} after choosing server state failed, keeping {}: {}",
                    document_id,
                    snapshot.revision,
                    error
                );
                if !self.machine.is_current(ticket) || self.is_closed() {
                    return Err(SyncError::Superseded);
                }
                {
                    let mut model = self.model.lock();
                    model.replace(&snapshot.payload)?;
                    model.clear_history();
                    model.clear_selection();
                }
                self.machine
                    .bind_loaded(ticket, snapshot.revision)
                    .applied()?;
                (snapshot.revision, false)
            }
        };
        self.machine.clear_conflict();

        Ok(ResolutionOutcome::Resolved {
            strategy,
            revision,
            copy,
            reloaded,
        })
    }

    async fn keep_both(
        &self,
        document_id: DocumentId,
        snapshot: ConflictSnapshot,
        ticket: &SaveTicket,
    ) -> Result<ResolutionOutcome, SyncError> {
        let payload = self.model.lock().snapshot()?;
        let (name, description) = self
            .meta()
            .map(|meta| (meta.name, meta.description))
            .unwrap_or_else(|| (self.config().default_document_name.clone(), String::new()));
        let draft = NewDocument::new(format!("{name}{}", self.config().copy_suffix), payload)
            .map_err(|e| SyncError::Validation(e.to_string()))?
            .with_description(description);

        let copy = self.create_document("resolve.copy", draft).await?;
        tracing::info!("Kept local design of {} as {}", document_id, copy.id);

        self.keep_server(document_id, snapshot, ticket, Some(copy.id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SyncStatus;
    use plansync_store::MemoryDocumentStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn resolution_outside_conflict_is_a_noop() {
        let store = Arc::new(MemoryDocumentStore::new());
        let session = ProjectSession::builder(store.clone()).build();
        session.create_new(Some("Hall".into())).await.unwrap();
        session.mark_dirty();
        let before = session.state();

        for strategy in ResolveStrategy::ALL {
            assert_eq!(
                session.resolve_conflict(strategy).await,
                ResolutionOutcome::NotInConflict
            );
        }
        assert_eq!(session.state(), before);
        assert_eq!(session.status(), SyncStatus::LocalOnly);
        assert_eq!(store.len(), 1);
    }
}
