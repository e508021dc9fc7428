//! PlanSync Core - project synchronization engine
//!
//! Keeps an in-memory design and its remote document in step:
//! - Revision-checked (compare-and-swap) saves with bounded retry
//! - A sync state machine the UI can watch
//! - Conflict resolution under three policies
//! - Best-effort notification of sibling sessions
//! - Loads that replace session state as a hard boundary
//!
//! # Example
//!
//! ```rust,ignore
//! use plansync_core::prelude::*;
//! use plansync_store::MemoryDocumentStore;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let session = ProjectSession::builder(Arc::new(MemoryDocumentStore::new())).build();
//! session.create_new(Some("Galley kitchen".into())).await.unwrap();
//! session.edit(|model| model.set("sink", serde_json::json!({ "x": 600 })));
//!
//! match session.save().await {
//!     SaveOutcome::Success { new_revision } => println!("saved {new_revision}"),
//!     other => println!("not saved: {other:?}"),
//! }
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
mod load;
pub mod model;
pub mod notifier;
mod resolver;
pub mod retry;
mod save;
pub mod session;
pub mod state;
pub mod types;

// Re-exports for convenience
pub use config::{ConfigError, SyncConfig};
pub use error::{SyncError, SyncErrorKind};
pub use model::{DesignModel, EditableModel, ModelError, HISTORY_LIMIT};
pub use notifier::{
    DisabledNotifier, DocumentSaved, NotifyError, SaveNotifier, SessionBus, DEFAULT_BUS_CAPACITY,
};
pub use retry::{RetryConfig, RetryError, RetryEvent, RetryHook, RetryPolicy, Transient};
pub use session::{ProjectSession, SessionBuilder};
pub use state::{Commit, SaveTicket, SyncStateMachine};
pub use types::{
    ConflictSnapshot, LoadOutcome, ResolutionOutcome, ResolveStrategy, SaveOutcome, SessionId,
    SyncState, SyncStatus,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a session
    pub use crate::{
        DesignModel, EditableModel, LoadOutcome, ProjectSession, ResolutionOutcome,
        ResolveStrategy, SaveOutcome, SessionBus, SyncConfig, SyncError, SyncErrorKind,
        SyncState, SyncStatus,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
