//! Two sessions racing on one document, and the three ways out

use async_trait::async_trait;
use plansync_core::prelude::*;
use plansync_document::{DesignPayload, DocumentId, NewDocument, ProjectDocument, Revision};
use plansync_store::{
    FaultInjectingStore, MemoryDocumentStore, MetadataPatch, ProjectDocumentStore, StoreError,
    WriteOutcome, WriteRequest,
};
use plansync_test_utils::{
    bump_revision, fast_config, kitchen_payload, loaded_session, seeded_store, GatedStore,
    PanickingStore, RecordingNotifier,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Store whose next read, once armed, is followed by a third party's write
struct InterleavingStore {
    inner: Arc<MemoryDocumentStore>,
    armed: AtomicBool,
}

#[async_trait]
impl ProjectDocumentStore for InterleavingStore {
    async fn read(&self, id: &DocumentId) -> Result<ProjectDocument, StoreError> {
        let document = self.inner.read(id).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            let request =
                WriteRequest::new(document.id, document.revision, kitchen_payload("third"));
            self.inner.write(request).await?;
        }
        Ok(document)
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

async fn revision_three() -> (Arc<MemoryDocumentStore>, ProjectDocument) {
    let (memory, doc) = seeded_store("Kitchen", kitchen_payload("oak")).await;
    let doc = bump_revision(&memory, &doc, kitchen_payload("ash")).await;
    let doc = bump_revision(&memory, &doc, kitchen_payload("elm")).await;
    assert_eq!(doc.revision, Revision::new(3));
    (memory, doc)
}

/// A wins the race, B ends in conflict; returns B's local payload
async fn into_conflict(a: &ProjectSession, b: &ProjectSession) -> DesignPayload {
    a.edit(|model| model.set("base-1", json!({ "width": 900, "finish": "walnut" })));
    assert_eq!(
        a.save().await,
        SaveOutcome::Success {
            new_revision: Revision::new(4)
        }
    );

    b.edit(|model| model.set("wall-1", json!({ "width": 300, "finish": "gloss" })));
    let outcome = b.save().await;
    assert!(
        matches!(
            outcome,
            SaveOutcome::Conflict { server_revision, .. } if server_revision == Revision::new(4)
        ),
        "unexpected outcome {outcome:?}"
    );
    b.serialized_payload().unwrap()
}

#[tokio::test]
async fn stale_session_lands_in_conflict() {
    let (memory, doc) = revision_three().await;
    let a = loaded_session(memory.clone(), RecordingNotifier::new(), doc.id).await;
    let b = loaded_session(memory.clone(), RecordingNotifier::new(), doc.id).await;
    assert_eq!(a.state().revision, Some(Revision::new(3)));
    assert_eq!(b.state().revision, Some(Revision::new(3)));

    into_conflict(&a, &b).await;

    let state = b.state();
    assert_eq!(state.status, SyncStatus::Conflict);
    assert_eq!(
        state.conflict_snapshot.map(|snapshot| snapshot.revision),
        Some(Revision::new(4))
    );
    assert!(!state.pending_changes);
}

#[tokio::test]
async fn keep_server_adopts_snapshot_and_rereads() {
    let (memory, doc) = revision_three().await;
    let a = loaded_session(memory.clone(), RecordingNotifier::new(), doc.id).await;
    let b = loaded_session(memory.clone(), RecordingNotifier::new(), doc.id).await;
    into_conflict(&a, &b).await;
    let snapshot = b.state().conflict_snapshot.unwrap();

    let outcome = b.resolve_conflict(ResolveStrategy::KeepServer).await;

    let fresh = memory.read(&doc.id).await.unwrap();
    assert_eq!(
        outcome,
        ResolutionOutcome::Resolved {
            strategy: ResolveStrategy::KeepServer,
            revision: fresh.revision,
            copy: None,
            reloaded: true,
        }
    );
    assert_eq!(b.serialized_payload().unwrap(), snapshot.payload);
    let state = b.state();
    assert_eq!(state.status, SyncStatus::Synced);
    assert_eq!(state.revision, Some(fresh.revision));
    assert!(state.conflict_snapshot.is_none());
    assert!(b.with_model(|model| !model.can_undo()));
}

#[tokio::test]
async fn keep_both_copies_local_design_and_leaves_original_alone() {
    let (memory, doc) = revision_three().await;
    let a = loaded_session(memory.clone(), RecordingNotifier::new(), doc.id).await;
    let b = loaded_session(memory.clone(), RecordingNotifier::new(), doc.id).await;
    let local = into_conflict(&a, &b).await;
    let original_before = memory.peek(&doc.id).unwrap();

    let outcome = b.resolve_conflict(ResolveStrategy::KeepBoth).await;

    let copy_id = match outcome {
        ResolutionOutcome::Resolved {
            strategy: ResolveStrategy::KeepBoth,
            copy: Some(copy),
            revision,
            reloaded: true,
        } => {
            assert_eq!(revision, original_before.revision);
            copy
        }
        other => panic!("expected KeepBoth resolution, got {other:?}"),
    };
    assert_eq!(memory.len(), 2);
    assert_eq!(memory.peek(&doc.id).unwrap().revision, original_before.revision);
    let copy = memory.peek(&copy_id).unwrap();
    assert_eq!(copy.payload, local);
    assert_eq!(copy.name, "Kitchen (copy)");
    assert_eq!(copy.revision, Revision::INITIAL);

    assert_eq!(b.document_id(), Some(doc.id));
    assert_eq!(b.serialized_payload().unwrap(), original_before.payload);
    assert_eq!(b.status(), SyncStatus::Synced);
}

#[tokio::test]
async fn keep_local_overwrites_against_fresh_revision() {
    let (memory, doc) = revision_three().await;
    let a = loaded_session(memory.clone(), RecordingNotifier::new(), doc.id).await;
    let notifier = RecordingNotifier::new();
    let b = loaded_session(memory.clone(), notifier.clone(), doc.id).await;
    let local = into_conflict(&a, &b).await;

    let outcome = b.resolve_conflict(ResolveStrategy::KeepLocal).await;

    assert_eq!(
        outcome,
        ResolutionOutcome::Resolved {
            strategy: ResolveStrategy::KeepLocal,
            revision: Revision::new(5),
            copy: None,
            reloaded: false,
        }
    );
    let stored = memory.peek(&doc.id).unwrap();
    assert_eq!(stored.revision, Revision::new(5));
    assert_eq!(stored.payload, local);
    let state = b.state();
    assert_eq!(state.status, SyncStatus::Synced);
    assert_eq!(state.revision, Some(Revision::new(5)));
    assert!(state.conflict_snapshot.is_none());
    assert_eq!(notifier.attempts(), 1);
}

#[tokio::test]
async fn keep_local_collision_surfaces_new_conflict() {
    let (memory, doc) = revision_three().await;
    let interleaving = Arc::new(InterleavingStore {
        inner: memory.clone(),
        armed: AtomicBool::new(false),
    });
    let a = loaded_session(memory.clone(), RecordingNotifier::new(), doc.id).await;
    let b = loaded_session(interleaving.clone(), RecordingNotifier::new(), doc.id).await;
    into_conflict(&a, &b).await;
    interleaving.armed.store(true, Ordering::SeqCst);

    let outcome = b.resolve_conflict(ResolveStrategy::KeepLocal).await;

    assert_eq!(
        outcome,
        ResolutionOutcome::Conflict {
            server_revision: Revision::new(5)
        }
    );
    let state = b.state();
    assert_eq!(state.status, SyncStatus::Conflict);
    let snapshot = state.conflict_snapshot.unwrap();
    assert_eq!(snapshot.revision, Revision::new(5));
    assert_eq!(snapshot.payload, kitchen_payload("third"));
    assert_eq!(memory.peek(&doc.id).unwrap().payload, kitchen_payload("third"));
}

#[tokio::test]
async fn keep_server_without_reload_binds_snapshot_revision() {
    let (memory, doc) = revision_three().await;
    let faulty = Arc::new(FaultInjectingStore::new(memory.clone()));
    let a = loaded_session(memory.clone(), RecordingNotifier::new(), doc.id).await;
    let b = loaded_session(faulty.clone(), RecordingNotifier::new(), doc.id).await;
    into_conflict(&a, &b).await;
    let snapshot = b.state().conflict_snapshot.unwrap();
    faulty.fail_next_reads(fast_config().retry.max_attempts);

    let outcome = b.resolve_conflict(ResolveStrategy::KeepServer).await;

    assert_eq!(
        outcome,
        ResolutionOutcome::Resolved {
            strategy: ResolveStrategy::KeepServer,
            revision: snapshot.revision,
            copy: None,
            reloaded: false,
        }
    );
    assert_eq!(b.serialized_payload().unwrap(), snapshot.payload);
    assert_eq!(b.status(), SyncStatus::Synced);
    assert_eq!(b.state().revision, Some(snapshot.revision));
}

#[tokio::test]
async fn failed_keep_local_stays_in_conflict_with_message() {
    let (memory, doc) = revision_three().await;
    let faulty = Arc::new(FaultInjectingStore::new(memory.clone()));
    let a = loaded_session(memory.clone(), RecordingNotifier::new(), doc.id).await;
    let b = loaded_session(faulty.clone(), RecordingNotifier::new(), doc.id).await;
    into_conflict(&a, &b).await;
    faulty.fail_next_reads(fast_config().retry.max_attempts);

    let outcome = b.resolve_conflict(ResolveStrategy::KeepLocal).await;

    assert!(
        matches!(
            outcome,
            ResolutionOutcome::Failed {
                kind: SyncErrorKind::Network,
                ..
            }
        ),
        "unexpected outcome {outcome:?}"
    );
    let state = b.state();
    assert_eq!(state.status, SyncStatus::Conflict);
    assert!(state.conflict_snapshot.is_some());
    assert!(state.error_message.is_some());
    assert_eq!(memory.peek(&doc.id).unwrap().revision, Revision::new(4));
}

#[tokio::test]
async fn manual_clear_conflict_keeps_local_model() {
    let (memory, doc) = revision_three().await;
    let a = loaded_session(memory.clone(), RecordingNotifier::new(), doc.id).await;
    let b = loaded_session(memory.clone(), RecordingNotifier::new(), doc.id).await;
    let local = into_conflict(&a, &b).await;

    assert!(b.clear_conflict());
    assert!(!b.clear_conflict());

    let state = b.state();
    assert_eq!(state.status, SyncStatus::Synced);
    assert!(state.conflict_snapshot.is_none());
    assert_eq!(b.serialized_payload().unwrap(), local);
}

#[tokio::test]
async fn panic_during_resolution_keeps_conflict_open() {
    let (memory, doc) = revision_three().await;
    let store = PanickingStore::new(memory.clone());
    let a = loaded_session(memory.clone(), RecordingNotifier::new(), doc.id).await;
    let b = loaded_session(store.clone(), RecordingNotifier::new(), doc.id).await;
    let local = into_conflict(&a, &b).await;
    store.arm();

    let outcome = b.resolve_conflict(ResolveStrategy::KeepLocal).await;

    assert!(
        matches!(
            outcome,
            ResolutionOutcome::Failed {
                kind: SyncErrorKind::Unknown,
                ..
            }
        ),
        "unexpected outcome {outcome:?}"
    );
    let state = b.state();
    assert_eq!(state.status, SyncStatus::Conflict);
    assert!(state.conflict_snapshot.is_some());
    assert!(state
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("panicked")));
    assert_eq!(b.serialized_payload().unwrap(), local);
    assert_eq!(memory.peek(&doc.id).unwrap().revision, Revision::new(4));

    store.disarm();
    assert!(matches!(
        b.resolve_conflict(ResolveStrategy::KeepLocal).await,
        ResolutionOutcome::Resolved { .. }
    ));
}

#[tokio::test]
async fn keep_server_closed_mid_reload_leaves_local_model() {
    let (memory, doc) = revision_three().await;
    let gated = GatedStore::new(memory.clone());
    let a = loaded_session(memory.clone(), RecordingNotifier::new(), doc.id).await;
    let b = Arc::new(loaded_session(gated.clone(), RecordingNotifier::new(), doc.id).await);
    let local = {
        a.edit(|model| model.set("base-1", json!({ "width": 900 })));
        assert!(a.save().await.is_success());
        b.edit(|model| model.set("wall-1", json!({ "width": 300 })));
        let saving = tokio::spawn({
            let b = Arc::clone(&b);
            async move { b.save().await }
        });
        gated.wait_for_write().await;
        gated.release_one();
        assert!(matches!(saving.await.unwrap(), SaveOutcome::Conflict { .. }));
        b.serialized_payload().unwrap()
    };
    gated.gate_reads();

    let resolving = tokio::spawn({
        let b = Arc::clone(&b);
        async move { b.resolve_conflict(ResolveStrategy::KeepServer).await }
    });
    gated.wait_for_read().await;
    b.close();
    gated.release_read();
    let outcome = resolving.await.unwrap();

    assert!(
        matches!(
            outcome,
            ResolutionOutcome::Failed {
                kind: SyncErrorKind::Superseded,
                ..
            }
        ),
        "unexpected outcome {outcome:?}"
    );
    assert_eq!(b.serialized_payload().unwrap(), local);
    assert_eq!(b.status(), SyncStatus::Conflict);
    assert!(b.state().conflict_snapshot.is_some());
}
