//! Cross-session save notifications
//!
//! After every successful save a session announces `document_saved` on a
//! named channel. Delivery is at-most-once, unordered and unacknowledged:
//! receivers treat a message as a hint to re-read, never as state.

use crate::types::SessionId;
use chrono::Utc;
use plansync_document::{DocumentId, Revision};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity used by [`SessionBus::default`]
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// Broadcast message announcing an accepted save
///
/// Serialized as
/// `{"type":"document_saved","documentId":..,"revision":..,"originId":..,"timestamp":..}`
/// with `timestamp` in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "document_saved", rename_all = "camelCase")]
pub struct DocumentSaved {
    pub document_id: DocumentId,
    pub revision: Revision,
    pub origin_id: SessionId,
    pub timestamp: i64,
}

impl DocumentSaved {
    /// Message stamped with the current time
    #[must_use]
    pub fn new(document_id: DocumentId, revision: Revision, origin_id: SessionId) -> Self {
        Self {
            document_id,
            revision,
            origin_id,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Check if this save is newer than what a receiver holds for `document_id`
    #[must_use]
    pub fn supersedes(&self, document_id: &DocumentId, local: Option<Revision>) -> bool {
        self.document_id == *document_id && local.map_or(true, |local| self.revision > local)
    }
}

/// Notification errors; callers swallow them
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    /// Channel missing or closed
    #[error("notification channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// Nobody is listening
    #[error("no subscribers on the notification channel")]
    NoSubscribers,
}

/// Outbound port for save notifications
pub trait SaveNotifier: Send + Sync {
    /// Fire-and-forget delivery of one message
    ///
    /// # Errors
    /// Returns [`NotifyError`] if the message could not be handed off
    fn notify(&self, event: &DocumentSaved) -> Result<(), NotifyError>;
}

/// Named in-process multicast channel shared by sibling sessions
#[derive(Debug, Clone)]
pub struct SessionBus {
    name: Arc<str>,
    tx: broadcast::Sender<DocumentSaved>,
}

impl SessionBus {
    /// Create a bus; `capacity` bounds how far a slow receiver may lag
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            name: Arc::from(name.into()),
            tx,
        }
    }

    /// Channel name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Listen for saves; lagging receivers lose messages
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DocumentSaved> {
        self.tx.subscribe()
    }

    /// Number of live receivers
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SessionBus {
    fn default() -> Self {
        Self::new("plansync", DEFAULT_BUS_CAPACITY)
    }
}

impl SaveNotifier for SessionBus {
    fn notify(&self, event: &DocumentSaved) -> Result<(), NotifyError> {
        self.tx
            .send(event.clone())
            .map(|_| ())
            .map_err(|_| NotifyError::NoSubscribers)
    }
}

/// Notifier used when no channel is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledNotifier;

impl SaveNotifier for DisabledNotifier {
    fn notify(&self, _event: &DocumentSaved) -> Result<(), NotifyError> {
        Err(NotifyError::ChannelUnavailable("no channel configured".into()))
    }
}
