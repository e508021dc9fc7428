//! Error types for store and preview collaborators
//!
//! Business outcomes of a write (accepted, conflict, rejected) are not
//! errors; they travel in [`crate::WriteOutcome`]. Only failures to obtain
//! an outcome at all end up here.

use plansync_document::DocumentId;

/// Store call failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The request never got a definitive answer (connection reset,
    /// timeout, gateway error). Safe to retry.
    #[error("transport failure: {0}")]
    Transport(String),

    /// No document with this id
    #[error("document not found: {0}")]
    NotFound(DocumentId),

    /// Input rejected by the store
    #[error("validation failed: {0}")]
    Validation(String),

    /// Store-side fault that retrying will not fix
    #[error("store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Create transport error
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Check if error is transient (worth retrying)
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Preview generation failures
///
/// Never fatal to a save; callers log and continue without a preview.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreviewError {
    /// Renderer or scene not ready
    #[error("renderer unavailable: {0}")]
    Unavailable(String),

    /// Upload of the rendered image failed
    #[error("preview upload failed: {0}")]
    Upload(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_transient() {
        assert!(StoreError::transport("connection reset").is_transient());
        assert!(!StoreError::NotFound(DocumentId::new()).is_transient());
        assert!(!StoreError::Validation("too large".into()).is_transient());
        assert!(!StoreError::Internal("disk full".into()).is_transient());
    }

    #[test]
    fn store_error_display() {
        let err = StoreError::transport("timeout");
        assert!(err.to_string().contains("transport failure"));
    }
}
