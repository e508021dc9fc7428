//! Store and preview ports for the plansync engine
//!
//! The remote store is an external collaborator; this crate defines the
//! contract the engine consumes and ships two implementations:
//!
//! - [`MemoryDocumentStore`]: atomic compare-and-swap writes in memory
//! - [`FaultInjectingStore`]: wraps any store and drops calls with transport
//!   failures, scripted or seeded-random
//!
//! # Example
//!
//! ```rust,ignore
//! use plansync_store::{MemoryDocumentStore, ProjectDocumentStore, WriteRequest, WriteOutcome};
//!
//! let store = MemoryDocumentStore::new();
//! let doc = store.create(draft).await?;
//! match store.write(WriteRequest::new(doc.id, doc.revision, payload)).await? {
//!     WriteOutcome::Accepted(doc) => println!("now at {}", doc.revision),
//!     WriteOutcome::Conflict { server_revision, .. } => println!("lost to {server_revision}"),
//!     WriteOutcome::Rejected { message } => println!("rejected: {message}"),
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod fault;
mod memory;
mod preview;
mod store;

pub use error::{PreviewError, StoreError};
pub use fault::{FaultInjectingStore, FaultPlan};
pub use memory::{MemoryDocumentStore, StoreLimits};
pub use preview::{PreviewGenerator, PreviewRef, PreviewRequest};
pub use store::{MetadataPatch, ProjectDocumentStore, WriteOutcome, WriteRequest};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
