//! Session-scoped sync context
//!
//! A [`ProjectSession`] owns one editable model, the state machine that
//! describes it and the handles to its collaborators. Several sessions can
//! share one store and one notification bus; nothing here is global.
//!
//! Save, load and resolution entry points live in `save`, `load` and
//! `resolver`. They all pass through a per-session single-flight gate:
//! a second call while one is running returns [`SyncError::Busy`].

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::model::{DesignModel, EditableModel};
use crate::notifier::{DisabledNotifier, DocumentSaved, SaveNotifier};
use crate::retry::{RetryEvent, RetryHook, RetryPolicy};
use crate::state::SyncStateMachine;
use crate::types::{SessionId, SyncState, SyncStatus};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use plansync_document::{
    validate_name, DesignPayload, DocumentId, DocumentMeta, NewDocument, ProjectDocument, Revision,
};
use plansync_store::{MetadataPatch, PreviewGenerator, ProjectDocumentStore, StoreError};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Builder for [`ProjectSession`]
pub struct SessionBuilder<M: EditableModel = DesignModel> {
    store: Arc<dyn ProjectDocumentStore>,
    model: M,
    notifier: Option<Arc<dyn SaveNotifier>>,
    preview: Option<Arc<dyn PreviewGenerator>>,
    config: SyncConfig,
    retry_hook: Option<RetryHook>,
    id: Option<SessionId>,
}

impl<M: EditableModel> SessionBuilder<M> {
    /// Use a different editable model
    #[must_use]
    pub fn model<N: EditableModel>(self, model: N) -> SessionBuilder<N> {
        SessionBuilder {
            store: self.store,
            model,
            notifier: self.notifier,
            preview: self.preview,
            config: self.config,
            retry_hook: self.retry_hook,
            id: self.id,
        }
    }

    /// Announce saves through `notifier`
    #[inline]
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn SaveNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Attach previews rendered by `preview`
    #[inline]
    #[must_use]
    pub fn preview(mut self, preview: Arc<dyn PreviewGenerator>) -> Self {
        self.preview = Some(preview);
        self
    }

    #[inline]
    #[must_use]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Observe every scheduled retry
    #[inline]
    #[must_use]
    pub fn retry_hook(mut self, hook: RetryHook) -> Self {
        self.retry_hook = Some(hook);
        self
    }

    /// Fixed session identity
    #[inline]
    #[must_use]
    pub fn id(mut self, id: SessionId) -> Self {
        self.id = Some(id);
        self
    }

    /// Build the session in `local_only` with no document bound
    #[must_use]
    pub fn build(self) -> ProjectSession<M> {
        let id = self.id.unwrap_or_default();
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(DisabledNotifier) as Arc<dyn SaveNotifier>);
        tracing::debug!("Starting session {} on channel {}", id, self.config.channel_name);

        ProjectSession {
            id,
            retry: RetryPolicy::new(self.config.retry),
            config: self.config,
            store: self.store,
            preview: self.preview,
            retry_hook: self.retry_hook,
            machine: SyncStateMachine::new(id, notifier),
            model: Mutex::new(self.model),
            meta: RwLock::new(None),
            gate: tokio::sync::Mutex::new(()),
            loading: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
}

/// One editing session over at most one project document
pub struct ProjectSession<M: EditableModel = DesignModel> {
    id: SessionId,
    config: SyncConfig,
    pub(crate) store: Arc<dyn ProjectDocumentStore>,
    pub(crate) preview: Option<Arc<dyn PreviewGenerator>>,
    retry: RetryPolicy,
    retry_hook: Option<RetryHook>,
    pub(crate) machine: SyncStateMachine,
    pub(crate) model: Mutex<M>,
    pub(crate) meta: RwLock<Option<DocumentMeta>>,
    gate: tokio::sync::Mutex<()>,
    pub(crate) loading: AtomicBool,
    closed: AtomicBool,
}

impl<M: EditableModel> std::fmt::Debug for ProjectSession<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectSession")
            .field("id", &self.id)
            .field("document", &self.document_id())
            .field("machine", &self.machine)
            .finish_non_exhaustive()
    }
}

impl ProjectSession<DesignModel> {
    /// Start building a session over `store`
    #[must_use]
    pub fn builder(store: Arc<dyn ProjectDocumentStore>) -> SessionBuilder<DesignModel> {
        SessionBuilder {
            store,
            model: DesignModel::new(),
            notifier: None,
            preview: None,
            config: SyncConfig::default(),
            retry_hook: None,
            id: None,
        }
    }
}

impl<M: EditableModel> ProjectSession<M> {
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Current sync state
    #[must_use]
    pub fn state(&self) -> SyncState {
        self.machine.state()
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.machine.status()
    }

    /// Watch sync state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.machine.subscribe()
    }

    /// State machine driving this session
    #[inline]
    #[must_use]
    pub fn machine(&self) -> &SyncStateMachine {
        &self.machine
    }

    /// Metadata of the bound document
    #[must_use]
    pub fn meta(&self) -> Option<DocumentMeta> {
        self.meta.read().clone()
    }

    /// Bound document
    #[must_use]
    pub fn document_id(&self) -> Option<DocumentId> {
        self.meta.read().as_ref().map(|meta| meta.id)
    }

    /// Check if a load is running
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Record a local edit made outside [`edit`](Self::edit)
    pub fn mark_dirty(&self) {
        self.machine.mark_dirty();
    }

    /// Mutate the model and record the edit
    pub fn edit<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        let mut model = self.model.lock();
        let result = f(&mut model);
        self.machine.mark_dirty();
        result
    }

    /// Read the model
    pub fn with_model<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        f(&self.model.lock())
    }

    /// Explicit status override; see [`SyncStateMachine::set_status`]
    ///
    /// # Errors
    /// Returns [`SyncError::InvalidStatusOverride`] for forbidden overrides
    pub fn set_status(&self, status: SyncStatus) -> Result<(), SyncError> {
        self.machine.set_status(status)
    }

    /// Leave `conflict` for `synced` without touching the model
    pub fn clear_conflict(&self) -> bool {
        self.machine.clear_conflict()
    }

    /// Serialize the model
    ///
    /// # Errors
    /// Returns [`SyncError::Unknown`] if the model cannot be captured
    pub fn serialized_payload(&self) -> Result<DesignPayload, SyncError> {
        Ok(self.model.lock().snapshot()?)
    }

    /// Overwrite the model from a payload and record the edit
    ///
    /// # Errors
    /// Returns [`SyncError::Validation`] and leaves the model unchanged if
    /// the payload is unusable
    pub fn apply_serialized_payload(&self, payload: &DesignPayload) -> Result<(), SyncError> {
        let mut model = self.model.lock();
        model.replace(payload)?;
        self.machine.mark_dirty();
        Ok(())
    }

    /// Rename the bound document; the revision is untouched
    ///
    /// # Errors
    /// - [`SyncError::Validation`] for a blank name
    /// - [`SyncError::NoDocument`] if nothing is bound
    /// - [`SyncError::Offline`] while offline
    /// - store failures after retries
    pub async fn update_name(&self, name: impl Into<String>) -> Result<DocumentMeta, SyncError> {
        self.ensure_open()?;
        let name = validate_name(name).map_err(|e| SyncError::Validation(e.to_string()))?;
        let document_id = self.document_id().ok_or(SyncError::NoDocument)?;
        if self.status() == SyncStatus::Offline {
            return Err(SyncError::Offline);
        }

        let store = &self.store;
        let id = &document_id;
        let patch = MetadataPatch::rename(name.clone());
        self.with_retry("update_name", move |_| store.update_metadata(id, patch.clone()))
            .await?;

        let mut meta = self.meta.write();
        let current = meta.as_mut().ok_or(SyncError::Superseded)?;
        if current.id != document_id {
            return Err(SyncError::Superseded);
        }
        current.name = name;
        current.updated_at = Utc::now();
        tracing::info!("Renamed document {} to {:?}", document_id, current.name);
        Ok(current.clone())
    }

    /// Check if a broadcast from a sibling announces a newer revision of
    /// this session's document
    #[must_use]
    pub fn is_stale_against(&self, event: &DocumentSaved) -> bool {
        if event.origin_id == self.id {
            return false;
        }
        self.document_id()
            .is_some_and(|id| event.supersedes(&id, self.machine.revision()))
    }

    /// Tear the session down; late results are ignored
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.machine.supersede();
            tracing::debug!("Closed session {}", self.id);
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<(), SyncError> {
        if self.is_closed() {
            return Err(SyncError::Superseded);
        }
        Ok(())
    }

    pub(crate) fn acquire_gate(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, SyncError> {
        self.gate.try_lock().map_err(|_| SyncError::Busy)
    }

    /// Run a store call under the retry policy, reporting every retry
    pub(crate) async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        op: F,
    ) -> Result<T, SyncError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let hook = self.retry_hook.as_ref();
        self.retry
            .run(op, |attempt, error, delay| {
                tracing::warn!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    operation,
                    attempt,
                    delay,
                    error
                );
                if let Some(hook) = hook {
                    hook(&RetryEvent {
                        operation,
                        attempt,
                        delay,
                        error: error.to_string(),
                    });
                }
            })
            .await
            .map_err(SyncError::from)
    }

    /// Create a document under the retry policy
    pub(crate) async fn create_document(
        &self,
        operation: &'static str,
        draft: NewDocument,
    ) -> Result<ProjectDocument, SyncError> {
        let store = &self.store;
        self.with_retry(operation, move |_| store.create(draft.clone()))
            .await
    }

    /// Replace the cached metadata, stamping it as opened now
    pub(crate) fn bind_meta(&self, document: &ProjectDocument) -> DocumentMeta {
        let mut meta = document.meta();
        meta.last_opened_at = Some(Utc::now());
        *self.meta.write() = Some(meta.clone());
        meta
    }

    /// Refresh cached metadata after a write, keeping the open timestamp
    pub(crate) fn refresh_meta(&self, document: &ProjectDocument) {
        let mut meta = self.meta.write();
        let last_opened_at = meta.as_ref().and_then(|current| current.last_opened_at);
        let mut fresh = document.meta();
        fresh.last_opened_at = fresh.last_opened_at.or(last_opened_at);
        *meta = Some(fresh);
    }

    /// Revision to present on the next write
    pub(crate) fn believed_revision(&self) -> Result<Revision, SyncError> {
        self.machine.revision().ok_or(SyncError::NoDocument)
    }
}

/// Clears the loading flag on every exit path
pub(crate) struct LoadingGuard<'a>(&'a AtomicBool);

impl<'a> LoadingGuard<'a> {
    pub(crate) fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
