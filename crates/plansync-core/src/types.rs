//! Core types for the sync engine
//!
//! Defines:
//! - Session identity
//! - The observable [`SyncState`] and its status values
//! - Typed outcomes of save, load and conflict resolution

use crate::error::{SyncError, SyncErrorKind};
use chrono::{DateTime, Utc};
use plansync_document::{DesignPayload, DocumentId, DocumentMeta, Revision};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique session identifier, used as the broadcast origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate new session ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Synchronization status observed by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local edits not yet persisted (or nothing persisted yet)
    LocalOnly,
    /// A write is in flight
    Syncing,
    /// Local model matches the last accepted revision
    Synced,
    /// A write lost a revision race; see the conflict snapshot
    Conflict,
    /// Last save failed; `save()` may be re-invoked
    Error,
    /// Network writes suspended by the user or environment
    Offline,
}

impl SyncStatus {
    /// All statuses, in declaration order
    pub const ALL: [SyncStatus; 6] = [
        Self::LocalOnly,
        Self::Syncing,
        Self::Synced,
        Self::Conflict,
        Self::Error,
        Self::Offline,
    ];

    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalOnly => "local_only",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
            Self::Error => "error",
            Self::Offline => "offline",
        }
    }

    /// Statuses in which unsaved changes may be pending
    #[inline]
    #[must_use]
    pub fn may_hold_pending(&self) -> bool {
        matches!(self, Self::LocalOnly | Self::Error | Self::Offline)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server state captured when a write lost a revision race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSnapshot {
    pub revision: Revision,
    pub payload: DesignPayload,
    pub detected_at: DateTime<Utc>,
}

/// Single source of truth for a session's sync status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub status: SyncStatus,
    pub pending_changes: bool,
    /// Last revision this session observed from the store
    pub revision: Option<Revision>,
    pub last_local_save_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub conflict_snapshot: Option<ConflictSnapshot>,
}

impl SyncState {
    /// State of a fresh session
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: SyncStatus::LocalOnly,
            pending_changes: false,
            revision: None,
            last_local_save_at: None,
            last_synced_at: None,
            error_message: None,
            conflict_snapshot: None,
        }
    }

    /// Check the structural invariants
    ///
    /// - `conflict` always carries a snapshot
    /// - pending changes only in `local_only`, `error` or `offline`
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let conflict_ok =
            self.status != SyncStatus::Conflict || self.conflict_snapshot.is_some();
        let pending_ok = !self.pending_changes || self.status.may_hold_pending();
        conflict_ok && pending_ok
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of `save()` / `save_as()`
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// Write accepted
    Success { new_revision: Revision },
    /// Write lost a revision race
    Conflict {
        server_revision: Revision,
        server_payload: DesignPayload,
    },
    /// Write not performed or not accepted
    Error {
        kind: SyncErrorKind,
        message: String,
    },
}

impl SaveOutcome {
    /// Check if the write was accepted
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Error classification, if any
    #[must_use]
    pub fn error_kind(&self) -> Option<SyncErrorKind> {
        match self {
            Self::Success { .. } => None,
            Self::Conflict { .. } => Some(SyncErrorKind::Conflict),
            Self::Error { kind, .. } => Some(*kind),
        }
    }
}

impl From<&SyncError> for SaveOutcome {
    fn from(error: &SyncError) -> Self {
        Self::Error {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Result of `load()`
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// Session now holds this document
    Loaded { meta: DocumentMeta, revision: Revision },
    /// Nothing changed
    Failed {
        kind: SyncErrorKind,
        message: String,
    },
}

impl LoadOutcome {
    /// Check if the document was loaded
    #[inline]
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }
}

impl From<&SyncError> for LoadOutcome {
    fn from(error: &SyncError) -> Self {
        Self::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Conflict resolution policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStrategy {
    /// Overwrite the server with the local design
    KeepLocal,
    /// Discard local edits and adopt the server design
    KeepServer,
    /// Save the local design as a copy, then adopt the server design
    KeepBoth,
}

impl ResolveStrategy {
    /// All strategies
    pub const ALL: [ResolveStrategy; 3] = [Self::KeepLocal, Self::KeepServer, Self::KeepBoth];

    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepServer => "keep_server",
            Self::KeepBoth => "keep_both",
        }
    }
}

impl fmt::Display for ResolveStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolveStrategy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| SyncError::Validation(format!("unknown resolution strategy: {s}")))
    }
}

/// Result of `resolve_conflict()`
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    /// Session was not in conflict; nothing happened
    NotInConflict,
    /// Conflict cleared
    Resolved {
        strategy: ResolveStrategy,
        revision: Revision,
        /// Document created by `keep_both`
        copy: Option<DocumentId>,
        /// Whether the session re-read the document from the store; false
        /// for `keep_local` and when a reload failed and the session settled
        /// on the snapshot revision
        reloaded: bool,
    },
    /// `keep_local` met an even newer revision; still in conflict
    Conflict { server_revision: Revision },
    /// Resolution failed; still in conflict
    Failed {
        kind: SyncErrorKind,
        message: String,
    },
}

impl ResolutionOutcome {
    /// Check if the conflict was cleared
    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }
}

impl From<&SyncError> for ResolutionOutcome {
    fn from(error: &SyncError) -> Self {
        Self::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}
