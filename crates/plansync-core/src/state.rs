//! Sync state machine
//!
//! Holds the [`SyncState`] a session exposes to its UI and enforces the
//! transition rules:
//! - edits never mask an in-flight save or an unresolved conflict
//! - `mark_as_saved` is the only way into `synced` after a write, and it
//!   triggers exactly one cross-session notification
//! - results of superseded work are dropped, using a generation counter
//!   captured in a [`SaveTicket`]
//!
//! Every change is published on a `watch` channel so observers always see
//! a complete, consistent snapshot.

use crate::error::SyncError;
use crate::notifier::{DocumentSaved, SaveNotifier};
use crate::types::{ConflictSnapshot, SessionId, SyncState, SyncStatus};
use chrono::Utc;
use parking_lot::Mutex;
use plansync_document::{DesignPayload, DocumentId, Revision};
use std::sync::Arc;
use tokio::sync::watch;

/// Proof that a save or load started under a given generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveTicket {
    generation: u64,
    edit_seq: u64,
    believed_revision: Option<Revision>,
}

impl SaveTicket {
    /// Revision the session held when the ticket was issued
    #[inline]
    #[must_use]
    pub fn believed_revision(&self) -> Option<Revision> {
        self.believed_revision
    }

    /// Generation the ticket was issued under
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Whether a ticketed result was applied
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    Applied,
    /// A newer state change happened after the ticket was issued
    Superseded,
}

impl Commit {
    /// Map a dropped result to [`SyncError::Superseded`]
    ///
    /// # Errors
    /// Returns [`SyncError::Superseded`] for [`Commit::Superseded`]
    pub fn applied(self) -> Result<(), SyncError> {
        match self {
            Self::Applied => Ok(()),
            Self::Superseded => Err(SyncError::Superseded),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: SyncState,
    generation: u64,
    edit_seq: u64,
}

/// Single source of truth for a session's sync status
pub struct SyncStateMachine {
    inner: Mutex<Inner>,
    tx: watch::Sender<SyncState>,
    notifier: Arc<dyn SaveNotifier>,
    origin: SessionId,
}

impl std::fmt::Debug for SyncStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStateMachine")
            .field("origin", &self.origin)
            .field("state", &self.inner.lock().state)
            .finish_non_exhaustive()
    }
}

impl SyncStateMachine {
    /// Create machine in `local_only` with nothing pending
    #[must_use]
    pub fn new(origin: SessionId, notifier: Arc<dyn SaveNotifier>) -> Self {
        let state = SyncState::new();
        let (tx, _) = watch::channel(state.clone());
        Self {
            inner: Mutex::new(Inner {
                state,
                generation: 0,
                edit_seq: 0,
            }),
            tx,
            notifier,
            origin,
        }
    }

    /// Current snapshot
    #[must_use]
    pub fn state(&self) -> SyncState {
        self.inner.lock().state.clone()
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.inner.lock().state.status
    }

    /// Last revision observed from the store
    #[must_use]
    pub fn revision(&self) -> Option<Revision> {
        self.inner.lock().state.revision
    }

    /// Watch every state change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.tx.subscribe()
    }

    /// Session identity used as broadcast origin
    #[inline]
    #[must_use]
    pub fn origin(&self) -> SessionId {
        self.origin
    }

    /// Snapshot of the unresolved conflict, if the session is in one
    #[must_use]
    pub fn active_conflict(&self) -> Option<ConflictSnapshot> {
        let inner = self.inner.lock();
        match inner.state.status {
            SyncStatus::Conflict => inner.state.conflict_snapshot.clone(),
            _ => None,
        }
    }

    /// Ticket for work that does not change the status up front (loads,
    /// resolutions)
    #[must_use]
    pub fn ticket(&self) -> SaveTicket {
        let inner = self.inner.lock();
        Self::issue(&inner)
    }

    /// Check if no newer state change happened since `ticket`
    #[must_use]
    pub fn is_current(&self, ticket: &SaveTicket) -> bool {
        self.inner.lock().generation == ticket.generation
    }

    /// Enter `syncing`
    ///
    /// # Errors
    /// - [`SyncError::Conflict`] while a conflict is unresolved
    /// - [`SyncError::Offline`] while offline
    /// - [`SyncError::Busy`] if a save is already in flight
    pub fn begin_save(&self) -> Result<SaveTicket, SyncError> {
        let mut inner = self.inner.lock();
        match inner.state.status {
            SyncStatus::Conflict => {
                let server_revision = inner
                    .state
                    .conflict_snapshot
                    .as_ref()
                    .map(|snapshot| snapshot.revision)
                    .or(inner.state.revision)
                    .unwrap_or(Revision::INITIAL);
                return Err(SyncError::Conflict { server_revision });
            }
            SyncStatus::Offline => return Err(SyncError::Offline),
            SyncStatus::Syncing => return Err(SyncError::Busy),
            SyncStatus::LocalOnly | SyncStatus::Synced | SyncStatus::Error => {}
        }

        inner.state.status = SyncStatus::Syncing;
        inner.state.pending_changes = false;
        inner.state.error_message = None;
        self.publish(&inner);
        Ok(Self::issue(&inner))
    }

    /// Apply an accepted write if `ticket` is still current
    ///
    /// Runs [`mark_as_saved`](Self::mark_as_saved). Edits made after the
    /// ticket was issued are then recorded as a fresh `local_only` change.
    pub fn commit_saved(
        &self,
        ticket: &SaveTicket,
        document_id: DocumentId,
        revision: Revision,
    ) -> Commit {
        {
            let mut inner = self.inner.lock();
            if inner.generation != ticket.generation {
                tracing::debug!(
                    "Dropping superseded save result {} for {}",
                    revision,
                    document_id
                );
                return Commit::Superseded;
            }
            Self::apply_saved(&mut inner.state, revision);
            if inner.edit_seq != ticket.edit_seq {
                inner.state.status = SyncStatus::LocalOnly;
                inner.state.pending_changes = true;
            }
            self.publish(&inner);
        }
        self.broadcast(document_id, revision);
        Commit::Applied
    }

    /// Record an accepted revision and announce it
    ///
    /// Sets `synced`, clears pending changes, the error and any conflict
    /// snapshot, stamps `last_synced_at`, then attempts exactly one broadcast.
    /// Broadcast failures are logged and swallowed.
    pub fn mark_as_saved(&self, document_id: DocumentId, revision: Revision) {
        {
            let mut inner = self.inner.lock();
            Self::apply_saved(&mut inner.state, revision);
            self.publish(&inner);
        }
        self.broadcast(document_id, revision);
    }

    /// Enter `conflict` with the server's state if `ticket` is still current
    pub fn commit_conflict(
        &self,
        ticket: &SaveTicket,
        server_revision: Revision,
        server_payload: DesignPayload,
    ) -> Commit {
        let mut inner = self.inner.lock();
        if inner.generation != ticket.generation {
            return Commit::Superseded;
        }
        inner.state.status = SyncStatus::Conflict;
        inner.state.pending_changes = false;
        inner.state.error_message = None;
        inner.state.conflict_snapshot = Some(ConflictSnapshot {
            revision: server_revision,
            payload: server_payload,
            detected_at: Utc::now(),
        });
        self.publish(&inner);
        Commit::Applied
    }

    /// Enter `error` with `message` if `ticket` is still current
    ///
    /// The unsaved edits stay pending so a manual retry can push them.
    pub fn commit_failed(&self, ticket: &SaveTicket, message: impl Into<String>) -> Commit {
        let mut inner = self.inner.lock();
        if inner.generation != ticket.generation {
            return Commit::Superseded;
        }
        inner.state.status = SyncStatus::Error;
        inner.state.pending_changes = true;
        inner.state.error_message = Some(message.into());
        self.publish(&inner);
        Commit::Applied
    }

    /// Keep the conflict open but expose why resolving it failed
    pub fn note_resolution_failure(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        if inner.state.status == SyncStatus::Conflict {
            inner.state.error_message = Some(message.into());
            self.publish(&inner);
        }
    }

    /// Bind a freshly loaded revision if `ticket` is still current
    ///
    /// Resets to `synced` without broadcasting; supersedes older tickets.
    pub fn bind_loaded(&self, ticket: &SaveTicket, revision: Revision) -> Commit {
        let mut inner = self.inner.lock();
        if inner.generation != ticket.generation {
            return Commit::Superseded;
        }
        inner.generation += 1;
        let now = Utc::now();
        inner.state = SyncState {
            status: SyncStatus::Synced,
            pending_changes: false,
            revision: Some(revision),
            last_local_save_at: None,
            last_synced_at: Some(now),
            error_message: None,
            conflict_snapshot: None,
        };
        self.publish(&inner);
        Commit::Applied
    }

    /// Leave `conflict` for `synced`; no-op in any other status
    pub fn clear_conflict(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.status != SyncStatus::Conflict {
            return false;
        }
        inner.generation += 1;
        inner.state.status = SyncStatus::Synced;
        inner.state.pending_changes = false;
        inner.state.conflict_snapshot = None;
        inner.state.error_message = None;
        inner.state.last_synced_at = Some(Utc::now());
        self.publish(&inner);
        true
    }

    /// Explicit status override
    ///
    /// - `offline` is always accepted
    /// - from `conflict` only `offline` is accepted; leaving `offline` later
    ///   resurfaces the kept conflict
    /// - `synced` requires that nothing is pending (from `offline` with
    ///   pending edits the session lands in `local_only`)
    /// - `syncing` and `conflict` cannot be set directly
    ///
    /// Overriding an in-flight save supersedes it and keeps its edits pending.
    ///
    /// # Errors
    /// Returns [`SyncError::InvalidStatusOverride`] without mutating state
    pub fn set_status(&self, status: SyncStatus) -> Result<(), SyncError> {
        let mut inner = self.inner.lock();
        let from = inner.state.status;
        let reject = || Err(SyncError::InvalidStatusOverride { from, to: status });

        if status != SyncStatus::Offline {
            if from == SyncStatus::Conflict {
                return reject();
            }
            if matches!(status, SyncStatus::Syncing | SyncStatus::Conflict) {
                return reject();
            }
        }

        let pending = inner.state.pending_changes || from == SyncStatus::Syncing;
        let resurfaced = status != SyncStatus::Offline && inner.state.conflict_snapshot.is_some();

        let next = if resurfaced {
            SyncStatus::Conflict
        } else if status == SyncStatus::Synced && pending {
            if from != SyncStatus::Offline {
                return reject();
            }
            SyncStatus::LocalOnly
        } else {
            status
        };

        inner.generation += 1;
        inner.state.status = next;
        inner.state.pending_changes = next.may_hold_pending() && pending;
        if next == SyncStatus::Synced {
            inner.state.error_message = None;
        }
        tracing::debug!("Status override {} -> {} (requested {})", from, next, status);
        self.publish(&inner);
        Ok(())
    }

    /// Invalidate every outstanding ticket
    pub fn supersede(&self) {
        self.inner.lock().generation += 1;
    }

    /// Record a local edit
    ///
    /// Never changes the status while `syncing` or `conflict`. While
    /// `offline` the edit is kept pending without leaving `offline`.
    pub fn mark_dirty(&self) {
        let mut inner = self.inner.lock();
        inner.edit_seq += 1;
        inner.state.last_local_save_at = Some(Utc::now());
        match inner.state.status {
            SyncStatus::Syncing | SyncStatus::Conflict => {}
            SyncStatus::Offline => inner.state.pending_changes = true,
            SyncStatus::LocalOnly | SyncStatus::Synced | SyncStatus::Error => {
                inner.state.status = SyncStatus::LocalOnly;
                inner.state.pending_changes = true;
                inner.state.error_message = None;
            }
        }
        self.publish(&inner);
    }

    fn issue(inner: &Inner) -> SaveTicket {
        SaveTicket {
            generation: inner.generation,
            edit_seq: inner.edit_seq,
            believed_revision: inner.state.revision,
        }
    }

    fn apply_saved(state: &mut SyncState, revision: Revision) {
        state.status = SyncStatus::Synced;
        state.pending_changes = false;
        state.revision = Some(revision);
        state.error_message = None;
        state.conflict_snapshot = None;
        state.last_synced_at = Some(Utc::now());
    }

    fn publish(&self, inner: &Inner) {
        debug_assert!(inner.state.is_consistent(), "{:?}", inner.state);
        self.tx.send_replace(inner.state.clone());
    }

    fn broadcast(&self, document_id: DocumentId, revision: Revision) {
        let event = DocumentSaved::new(document_id, revision, self.origin);
        if let Err(e) = self.notifier.notify(&event) {
            tracing::debug!("Save notification for {} not delivered: {}", document_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::NotifyError;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingNotifier {
        calls: AtomicUsize,
        fail: bool,
    }

    impl SaveNotifier for CountingNotifier {
        fn notify(&self, _event: &DocumentSaved) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError::NoSubscribers)
            } else {
                Ok(())
            }
        }
    }

    fn machine() -> (SyncStateMachine, Arc<CountingNotifier>) {
        let notifier = Arc::new(CountingNotifier::default());
        (
            SyncStateMachine::new(SessionId::new(), notifier.clone()),
            notifier,
        )
    }

    fn into_conflict(machine: &SyncStateMachine) {
        let ticket = machine.begin_save().unwrap();
        machine
            .commit_conflict(&ticket, Revision::new(5), DesignPayload::empty())
            .applied()
            .unwrap();
    }

    #[test]
    fn edit_moves_to_local_only_with_pending() {
        let (machine, _) = machine();
        machine.mark_dirty();
        let state = machine.state();
        assert_eq!(state.status, SyncStatus::LocalOnly);
        assert!(state.pending_changes);
        assert!(state.last_local_save_at.is_some());
    }

    #[test]
    fn successful_save_reaches_synced_and_broadcasts_once() {
        let (machine, notifier) = machine();
        machine.mark_dirty();

        let ticket = machine.begin_save().unwrap();
        assert_eq!(machine.status(), SyncStatus::Syncing);
        machine
            .commit_saved(&ticket, DocumentId::new(), Revision::new(2))
            .applied()
            .unwrap();

        let state = machine.state();
        assert_eq!(state.status, SyncStatus::Synced);
        assert!(!state.pending_changes);
        assert_eq!(state.revision, Some(Revision::new(2)));
        assert!(state.last_synced_at.is_some());
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mark_as_saved_swallows_broadcast_failure() {
        let notifier = Arc::new(CountingNotifier {
            fail: true,
            ..CountingNotifier::default()
        });
        let machine = SyncStateMachine::new(SessionId::new(), notifier.clone());
        let ticket = machine.begin_save().unwrap();
        machine.commit_failed(&ticket, "boom").applied().unwrap();

        machine.mark_as_saved(DocumentId::new(), Revision::new(3));

        let state = machine.state();
        assert_eq!(state.status, SyncStatus::Synced);
        assert!(!state.pending_changes);
        assert_eq!(state.error_message, None);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn edit_during_save_stays_pending_after_commit() {
        let (machine, _) = machine();
        machine.mark_dirty();
        let ticket = machine.begin_save().unwrap();

        machine.mark_dirty();
        assert_eq!(machine.status(), SyncStatus::Syncing);

        machine
            .commit_saved(&ticket, DocumentId::new(), Revision::new(2))
            .applied()
            .unwrap();
        let state = machine.state();
        assert_eq!(state.status, SyncStatus::LocalOnly);
        assert!(state.pending_changes);
        assert_eq!(state.revision, Some(Revision::new(2)));
    }

    #[test]
    fn override_supersedes_in_flight_save() {
        let (machine, notifier) = machine();
        let ticket = machine.begin_save().unwrap();

        machine.set_status(SyncStatus::Offline).unwrap();

        assert_eq!(
            machine.commit_saved(&ticket, DocumentId::new(), Revision::new(2)),
            Commit::Superseded
        );
        let state = machine.state();
        assert_eq!(state.status, SyncStatus::Offline);
        assert!(state.pending_changes);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn conflict_only_yields_to_offline_and_resurfaces() {
        let (machine, _) = machine();
        into_conflict(&machine);

        assert!(matches!(
            machine.set_status(SyncStatus::LocalOnly),
            Err(SyncError::InvalidStatusOverride { .. })
        ));
        assert_eq!(machine.status(), SyncStatus::Conflict);

        machine.set_status(SyncStatus::Offline).unwrap();
        assert!(machine.active_conflict().is_none());
        machine.mark_dirty();

        machine.set_status(SyncStatus::LocalOnly).unwrap();
        let state = machine.state();
        assert_eq!(state.status, SyncStatus::Conflict);
        assert_eq!(
            state.conflict_snapshot.as_ref().map(|s| s.revision),
            Some(Revision::new(5))
        );
        assert!(state.is_consistent());
    }

    #[test]
    fn syncing_and_conflict_cannot_be_forced() {
        let (machine, _) = machine();
        assert!(machine.set_status(SyncStatus::Syncing).is_err());
        assert!(machine.set_status(SyncStatus::Conflict).is_err());
        assert_eq!(machine.state(), SyncState::new());
    }

    #[test]
    fn synced_override_requires_clean_state() {
        let (machine, _) = machine();
        machine.mark_dirty();
        assert!(machine.set_status(SyncStatus::Synced).is_err());

        machine.set_status(SyncStatus::Offline).unwrap();
        machine.set_status(SyncStatus::Synced).unwrap();
        let state = machine.state();
        assert_eq!(state.status, SyncStatus::LocalOnly);
        assert!(state.pending_changes);
    }

    #[test]
    fn begin_save_guards() {
        let (machine, _) = machine();
        let _ticket = machine.begin_save().unwrap();
        assert_eq!(machine.begin_save(), Err(SyncError::Busy));

        let (offline, _) = self::machine();
        offline.set_status(SyncStatus::Offline).unwrap();
        assert_eq!(offline.begin_save(), Err(SyncError::Offline));

        let (conflicted, _) = self::machine();
        into_conflict(&conflicted);
        assert_eq!(
            conflicted.begin_save(),
            Err(SyncError::Conflict {
                server_revision: Revision::new(5)
            })
        );
    }

    #[test]
    fn clear_conflict_is_noop_outside_conflict() {
        let (machine, _) = machine();
        machine.mark_dirty();
        assert!(!machine.clear_conflict());
        assert_eq!(machine.status(), SyncStatus::LocalOnly);

        let (conflicted, notifier) = self::machine();
        into_conflict(&conflicted);
        assert!(conflicted.clear_conflict());
        let state = conflicted.state();
        assert_eq!(state.status, SyncStatus::Synced);
        assert!(state.conflict_snapshot.is_none());
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn watchers_see_each_transition() {
        let (machine, _) = machine();
        let mut rx = machine.subscribe();

        machine.mark_dirty();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, SyncStatus::LocalOnly);

        let ticket = machine.begin_save().unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, SyncStatus::Syncing);

        machine
            .commit_conflict(&ticket, Revision::new(4), DesignPayload::empty())
            .applied()
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, SyncStatus::Conflict);
    }

    fn status_strategy() -> impl Strategy<Value = SyncStatus> {
        prop_oneof![
            Just(SyncStatus::LocalOnly),
            Just(SyncStatus::Synced),
            Just(SyncStatus::Error),
            Just(SyncStatus::Offline),
        ]
    }

    proptest! {
        #[test]
        fn dirty_never_changes_guarded_status(prior_pending: bool, edits in 1usize..5) {
            let (syncing, _) = machine();
            if prior_pending {
                syncing.mark_dirty();
            }
            let _ticket = syncing.begin_save().unwrap();
            for _ in 0..edits {
                syncing.mark_dirty();
                prop_assert_eq!(syncing.status(), SyncStatus::Syncing);
            }

            let (conflicted, _) = machine();
            if prior_pending {
                conflicted.mark_dirty();
            }
            into_conflict(&conflicted);
            for _ in 0..edits {
                conflicted.mark_dirty();
                prop_assert_eq!(conflicted.status(), SyncStatus::Conflict);
            }
        }

        #[test]
        fn overrides_keep_state_consistent(
            steps in proptest::collection::vec((status_strategy(), any::<bool>()), 1..20)
        ) {
            let (machine, _) = machine();
            for (status, edit) in steps {
                if edit {
                    machine.mark_dirty();
                }
                let before = machine.state();
                if machine.set_status(status).is_err() {
                    prop_assert_eq!(machine.state(), before);
                }
                prop_assert!(machine.state().is_consistent());
            }
        }
    }
}
