//! Testing utilities for PlanSync workspace
//!
//! Shared fixtures, recording collaborators and store probes.

#![allow(missing_docs)]

use parking_lot::Mutex;
use plansync_core::{
    DocumentSaved, NotifyError, ProjectSession, RetryConfig, RetryEvent, RetryHook, SaveNotifier,
    SyncConfig, SyncState, SyncStatus,
};
use plansync_document::{DesignPayload, DocumentId, NewDocument, ProjectDocument};
use plansync_store::{
    MemoryDocumentStore, MetadataPatch, ProjectDocumentStore, StoreError, WriteOutcome,
    WriteRequest,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify, Semaphore};

/// Small design payload tagged with `tag`
pub fn kitchen_payload(tag: &str) -> DesignPayload {
    DesignPayload::from_value(json!({
        "base-1": { "width": 600, "finish": tag },
        "wall-1": { "width": 400, "finish": tag },
    }))
}

/// Memory store holding one document named `name`
pub async fn seeded_store(
    name: &str,
    payload: DesignPayload,
) -> (Arc<MemoryDocumentStore>, ProjectDocument) {
    let store = Arc::new(MemoryDocumentStore::new());
    let document = store
        .create(NewDocument::new(name, payload).unwrap())
        .await
        .unwrap();
    (store, document)
}

/// Write `payload` directly to the store, advancing the revision by one
pub async fn bump_revision(
    store: &MemoryDocumentStore,
    document: &ProjectDocument,
    payload: DesignPayload,
) -> ProjectDocument {
    let request = WriteRequest::new(document.id, document.revision, payload);
    match store.write(request).await.unwrap() {
        WriteOutcome::Accepted(next) => next,
        other => panic!("expected Accepted, got {other:?}"),
    }
}

/// Config with millisecond backoff
pub fn fast_config() -> SyncConfig {
    SyncConfig::default().with_retry(
        RetryConfig::default().with_delays(Duration::from_millis(1), Duration::from_millis(5)),
    )
}

/// Session over `store` that has already loaded `id`
pub async fn loaded_session(
    store: Arc<dyn ProjectDocumentStore>,
    notifier: Arc<dyn SaveNotifier>,
    id: DocumentId,
) -> ProjectSession {
    let session = ProjectSession::builder(store)
        .notifier(notifier)
        .config(fast_config())
        .build();
    let outcome = session.load(id).await;
    assert!(outcome.is_loaded(), "fixture load failed: {outcome:?}");
    session
}

/// Notifier that records every attempt and can be told to fail
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<DocumentSaved>>,
    attempts: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Notifier whose channel is unavailable
    pub fn failing() -> Arc<Self> {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::SeqCst);
        Arc::new(notifier)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Delivered messages
    pub fn events(&self) -> Vec<DocumentSaved> {
        self.events.lock().clone()
    }
}

impl SaveNotifier for RecordingNotifier {
    fn notify(&self, event: &DocumentSaved) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::ChannelUnavailable("test channel closed".into()));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Collects retry telemetry
#[derive(Debug, Default)]
pub struct RetryRecorder {
    events: Mutex<Vec<RetryEvent>>,
}

impl RetryRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hook to hand to a session builder
    pub fn hook(self: &Arc<Self>) -> RetryHook {
        let recorder = Arc::clone(self);
        Arc::new(move |event: &RetryEvent| recorder.events.lock().push(event.clone()))
    }

    pub fn events(&self) -> Vec<RetryEvent> {
        self.events.lock().clone()
    }
}

/// Store wrapper that records the session status seen by each write
///
/// Attach the session's state receiver after building it.
pub struct ProbeStore<S> {
    inner: Arc<S>,
    observer: Mutex<Option<watch::Receiver<SyncState>>>,
    seen: Mutex<Vec<SyncStatus>>,
}

impl<S: ProjectDocumentStore> ProbeStore<S> {
    pub fn new(inner: Arc<S>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            observer: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn attach(&self, receiver: watch::Receiver<SyncState>) {
        *self.observer.lock() = Some(receiver);
    }

    /// Statuses observed at the moment each write arrived
    pub fn seen_during_writes(&self) -> Vec<SyncStatus> {
        self.seen.lock().clone()
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }
}

#[async_trait::async_trait]
impl<S: ProjectDocumentStore> ProjectDocumentStore for ProbeStore<S> {
    async fn read(&self, id: &DocumentId) -> Result<ProjectDocument, StoreError> {
        self.inner.read(id).await
    }

    async fn create(&self, draft: NewDocument) -> Result<ProjectDocument, StoreError> {
        self.inner.create(draft).await
    }

    async fn write(&self, request: WriteRequest) -> Result<WriteOutcome, StoreError> {
        let status = self
            .observer
            .lock()
            .as_ref()
            .map(|receiver| receiver.borrow().status);
        if let Some(status) = status {
            self.seen.lock().push(status);
        }
        self.inner.write(request).await
    }

    async fn update_metadata(
        &self,
        id: &DocumentId,
        patch: MetadataPatch,
    ) -> Result<(), StoreError> {
        self.inner.update_metadata(id, patch).await
    }
}

/// Store wrapper that parks every write until released
///
/// Lets a test observe a session while its save is in flight. Reads pass
/// straight through unless [`GatedStore::gate_reads`] is switched on.
pub struct GatedStore<S> {
    inner: Arc<S>,
    entered: Notify,
    release: Semaphore,
    reads_gated: AtomicBool,
    read_entered: Notify,
    read_release: Semaphore,
}

impl<S: ProjectDocumentStore> GatedStore<S> {
    pub fn new(inner: Arc<S>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            entered: Notify::new(),
            release: Semaphore::new(0),
            reads_gated: AtomicBool::new(false),
            read_entered: Notify::new(),
            read_release: Semaphore::new(0),
        })
    }

    /// Park reads as well as writes from now on
    pub fn gate_reads(&self) {
        self.reads_gated.store(true, Ordering::SeqCst);
    }

    pub async fn wait_for_read(&self) {
        self.read_entered.notified().await;
    }

    pub fn release_read(&self) {
        self.read_release.add_permits(1);
    }

    /// Wait until a write has reached the store
    pub async fn wait_for_write(&self) {
        self.entered.notified().await;
    }

    /// Let one parked write through
    pub fn release_one(&self) {
        self.release.add_permits(1);
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }
}

#[async_trait::async_trait]
impl<S: ProjectDocumentStore> ProjectDocumentStore for GatedStore<S> {
    async fn read(&self, id: &DocumentId) -> Result<ProjectDocument, StoreError> {
        if self.reads_gated.load(Ordering::SeqCst) {
            self.read_entered.notify_one();
            self.read_release
                .acquire()
                .await
                .map_err(|_| StoreError::transport("gate closed"))?
                .forget();
        }
        self.inner.read(id).await
    }

    async fn create(&self, draft: NewDocument) -> Result<ProjectDocument, StoreError> {
        self.inner.create(draft).await
    }

    async fn write(&self, request: WriteRequest) -> Result<WriteOutcome, StoreError> {
        self.entered.notify_one();
        self.release
            .acquire()
            .await
            .map_err(|_| StoreError::transport("gate closed"))?
            .forget();
        self.inner.write(request).await
    }

    async fn update_metadata(
        &self,
        id: &DocumentId,
        patch: MetadataPatch,
    ) -> Result<(), StoreError> {
        self.inner.update_metadata(id, patch).await
    }
}

/// Store wrapper whose reads panic once armed
pub struct PanickingStore<S> {
    inner: Arc<S>,
    armed: AtomicBool,
}

impl<S: ProjectDocumentStore> PanickingStore<S> {
    pub fn new(inner: Arc<S>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            armed: AtomicBool::new(false),
        })
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl<S: ProjectDocumentStore> ProjectDocumentStore for PanickingStore<S> {
    async fn read(&self, id: &DocumentId) -> Result<ProjectDocument, StoreError> {
        if self.armed.load(Ordering::SeqCst) {
            panic!("store backend crashed reading {id}");
        }
        self.inner.read(id).await
    }

    async fn create(&self, draft: NewDocument) -> Result<ProjectDocument, StoreError> {
        self.inner.create(draft).await
    }

    async fn write(&self, request: WriteRequest) -> Result<WriteOutcome, StoreError> {
        self.inner.write(request).await
    }

    async fn update_metadata(
        &self,
        id: &DocumentId,
        patch: MetadataPatch,
    ) -> Result<(), StoreError> {
        self.inner.update_metadata(id, patch).await
    }
}
