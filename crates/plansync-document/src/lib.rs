//! Project document model
//!
//! The persisted unit the sync engine moves between a session and the remote
//! store.
//!
//! # Core Concepts
//!
//! - [`ProjectDocument`]: A persisted design with its revision and metadata
//! - [`Revision`]: Monotonic version number assigned by the store
//! - [`DesignPayload`]: Opaque structured content of a design
//!
//! # Example
//!
//! ```rust,ignore
//! use plansync_document::{DesignPayload, NewDocument};
//!
//! let payload = DesignPayload::from_value(serde_json::json!({"cabinets": []}));
//! let draft = NewDocument::new("Kitchen", payload)?;
//! println!("{} bytes", draft.payload.encoded_len());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod document;
mod payload;

pub use document::{
    validate_name, DocumentError, DocumentId, DocumentMeta, NewDocument, ProjectDocument, Revision,
};
pub use payload::DesignPayload;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
