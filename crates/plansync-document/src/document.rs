//! Persisted project documents
//!
//! A [`ProjectDocument`] is owned by the store. Sessions hold a cached
//! [`DocumentMeta`] plus the last [`Revision`] they observed.

use crate::payload::DesignPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique document identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    /// Generate new document ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| DocumentError::InvalidId(s.to_string()))
    }
}

/// Store-assigned document version
///
/// Strictly increases per document. Clients only ever echo a revision they
/// observed back to the store; they never compute one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    /// Revision of a freshly created document
    pub const INITIAL: Revision = Revision(1);

    /// Wrap a raw revision number
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw revision number
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Revision following this one
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A persisted design
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDocument {
    pub id: DocumentId,
    pub revision: Revision,
    pub name: String,
    pub description: String,
    pub payload: DesignPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub archived: bool,
}

impl ProjectDocument {
    /// Materialize a draft at [`Revision::INITIAL`]
    #[must_use]
    pub fn from_draft(id: DocumentId, draft: NewDocument, now: DateTime<Utc>) -> Self {
        Self {
            id,
            revision: Revision::INITIAL,
            name: draft.name,
            description: draft.description,
            payload: draft.payload,
            created_at: now,
            updated_at: now,
            last_opened_at: None,
            archived: false,
        }
    }

    /// Metadata without the payload
    #[must_use]
    pub fn meta(&self) -> DocumentMeta {
        DocumentMeta {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_opened_at: self.last_opened_at,
            archived: self.archived,
        }
    }
}

/// Session-side view of a document's metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    pub id: DocumentId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub archived: bool,
}

/// Input to a store `create`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub name: String,
    pub description: String,
    pub payload: DesignPayload,
}

impl NewDocument {
    /// Draft with a validated name
    ///
    /// # Errors
    /// Returns [`DocumentError::EmptyName`] if the trimmed name is empty
    pub fn new(name: impl Into<String>, payload: DesignPayload) -> Result<Self, DocumentError> {
        Ok(Self {
            name: validate_name(name)?,
            description: String::new(),
            payload,
        })
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Trim a document name and reject blanks
///
/// # Errors
/// Returns [`DocumentError::EmptyName`] if nothing remains after trimming
pub fn validate_name(name: impl Into<String>) -> Result<String, DocumentError> {
    let name = name.into();
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DocumentError::EmptyName);
    }
    Ok(trimmed.to_string())
}

/// Document model errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    /// Identifier is not a UUID
    #[error("invalid document id: {0}")]
    InvalidId(String),

    /// Name is empty after trimming
    #[error("document name must not be empty")]
    EmptyName,
}
