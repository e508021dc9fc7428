//! Error types for the sync engine
//!
//! Provides the error taxonomy surfaced to the application layer:
//! - Missing document / missing session binding
//! - Transport failures that outlived the retry budget
//! - Revision conflicts awaiting a user decision
//! - Validation rejections
//! - Single-flight and teardown refusals

use crate::model::ModelError;
use crate::retry::RetryError;
use crate::types::SyncStatus;
use plansync_document::{DocumentId, Revision};
use plansync_store::StoreError;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Error classification carried by outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncErrorKind {
    /// No active document
    NotFound,
    /// Transport failure (the only retryable class)
    Network,
    /// Revision mismatch, needs a user decision
    Conflict,
    /// Payload or input rejected
    Validation,
    /// Anything else, including panics inside a save attempt
    Unknown,
    /// Another save, load or resolution is in flight
    Busy,
    /// Session is in the offline override
    Offline,
    /// Result arrived after a newer state change or after teardown
    Superseded,
}

impl SyncErrorKind {
    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Network => "NETWORK",
            Self::Conflict => "CONFLICT",
            Self::Validation => "VALIDATION",
            Self::Unknown => "UNKNOWN",
            Self::Busy => "BUSY",
            Self::Offline => "OFFLINE",
            Self::Superseded => "SUPERSEDED",
        }
    }

    /// Check if a later retry of the same call may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::Busy)
    }
}

impl fmt::Display for SyncErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main sync error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Session has no associated document
    #[error("no document is associated with this session")]
    NoDocument,

    /// Store has no such document
    #[error("document not found: {0}")]
    DocumentNotFound(DocumentId),

    /// Transport failure after the retry budget
    #[error("network failure after {attempts} attempt(s): {message}")]
    Network { attempts: u32, message: String },

    /// Unresolved revision conflict
    #[error("revision conflict: server is at {server_revision}")]
    Conflict { server_revision: Revision },

    /// Rejected input or payload
    #[error("validation failed: {0}")]
    Validation(String),

    /// Status override not permitted
    #[error("cannot override status {from} with {to}")]
    InvalidStatusOverride { from: SyncStatus, to: SyncStatus },

    /// Single-flight gate held
    #[error("another save, load or resolution is in flight")]
    Busy,

    /// Network writes suspended
    #[error("session is offline")]
    Offline,

    /// Stale result dropped
    #[error("result superseded by a newer state change")]
    Superseded,

    /// Uncategorized failure
    #[error("unexpected failure: {0}")]
    Unknown(String),
}

impl SyncError {
    /// Classification of this error
    #[must_use]
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            Self::NoDocument | Self::DocumentNotFound(_) => SyncErrorKind::NotFound,
            Self::Network { .. } => SyncErrorKind::Network,
            Self::Conflict { .. } => SyncErrorKind::Conflict,
            Self::Validation(_) | Self::InvalidStatusOverride { .. } => SyncErrorKind::Validation,
            Self::Busy => SyncErrorKind::Busy,
            Self::Offline => SyncErrorKind::Offline,
            Self::Superseded => SyncErrorKind::Superseded,
            Self::Unknown(_) => SyncErrorKind::Unknown,
        }
    }

    /// UNKNOWN error for a panic caught while running `operation`
    pub(crate) fn from_panic(operation: &str, panic: &(dyn Any + Send)) -> Self {
        let detail = panic
            .downcast_ref::<&str>()
            .map(|message| (*message).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned());
        Self::Unknown(match detail {
            Some(message) => format!("{operation} attempt panicked: {message}"),
            None => format!("{operation} attempt panicked"),
        })
    }
}

impl From<StoreError> for SyncError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Transport(message) => Self::Network {
                attempts: 1,
                message,
            },
            StoreError::NotFound(id) => Self::DocumentNotFound(id),
            StoreError::Validation(message) => Self::Validation(message),
            StoreError::Internal(message) => Self::Unknown(message),
        }
    }
}

impl From<RetryError<StoreError>> for SyncError {
    fn from(error: RetryError<StoreError>) -> Self {
        match error {
            RetryError::Exhausted {
                attempts,
                last_error,
            } => Self::Network {
                attempts,
                message: last_error.to_string(),
            },
            RetryError::Permanent { error, .. } => Self::from(error),
        }
    }
}

impl From<ModelError> for SyncError {
    fn from(error: ModelError) -> Self {
        match error {
            ModelError::InvalidPayload(message) => Self::Validation(message),
            ModelError::Serialize(message) => Self::Unknown(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_unknown() {
        let boxed: Box<dyn Any + Send> = Box::new("renderer crashed");
        assert_eq!(
            SyncError::from_panic("save", &*boxed),
            SyncError::Unknown("save attempt panicked: renderer crashed".into())
        );
        let owned: Box<dyn Any + Send> = Box::new(String::from("disk gone"));
        assert_eq!(
            SyncError::from_panic("load", &*owned).to_string(),
            "unexpected failure: load attempt panicked: disk gone"
        );
        let opaque: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(
            SyncError::from_panic("resolve", &*opaque),
            SyncError::Unknown("resolve attempt panicked".into())
        );
    }

    #[test]
    fn kinds_serialize_screaming_snake() {
        let json = serde_json::to_string(&SyncErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"NOT_FOUND\"");
        assert_eq!(SyncErrorKind::Superseded.to_string(), "SUPERSEDED");
    }

    #[test]
    fn store_errors_map_to_kinds() {
        assert_eq!(
            SyncError::from(StoreError::transport("reset")).kind(),
            SyncErrorKind::Network
        );
        assert_eq!(
            SyncError::from(StoreError::NotFound(DocumentId::new())).kind(),
            SyncErrorKind::NotFound
        );
        assert_eq!(
            SyncError::from(StoreError::Validation("bad".into())).kind(),
            SyncErrorKind::Validation
        );
        assert_eq!(
            SyncError::from(StoreError::Internal("boom".into())).kind(),
            SyncErrorKind::Unknown
        );
    }

    #[test]
    fn exhausted_retries_keep_attempt_count() {
        let error = SyncError::from(RetryError::Exhausted {
            attempts: 3,
            last_error: StoreError::transport("timeout"),
        });
        assert_eq!(
            error,
            SyncError::Network {
                attempts: 3,
                message: "transport failure: timeout".into(),
            }
        );
        assert!(error.to_string().contains("3 attempt(s)"));
    }

    #[test]
    fn only_network_and_busy_are_retryable() {
        assert!(SyncErrorKind::Network.is_retryable());
        assert!(SyncErrorKind::Busy.is_retryable());
        assert!(!SyncErrorKind::Conflict.is_retryable());
        assert!(!SyncErrorKind::Validation.is_retryable());
        assert!(!SyncErrorKind::Unknown.is_retryable());
    }
}
