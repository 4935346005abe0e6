//! ---
//! cp_section: "01-core-runtime"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Keyed document storage with optimistic versioning."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! In-process keyed document store with optimistic concurrency.
//!
//! The durable engine behind the control plane is an external collaborator;
//! this crate pins down the contract the rest of the workspace programs
//! against — keyed CRUD, compare-and-swap on a monotonically increasing
//! version, and uniqueness guards executed under the collection lock — and
//! supplies the in-process implementation used by the daemon and tests.

/// Result alias used throughout the store crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),
    /// A document with the same key (or unique attribute) already exists.
    #[error("document already exists: {0}")]
    AlreadyExists(String),
    /// The document was modified concurrently; the caller must reload.
    #[error("version conflict on {key}: attempted {attempted}, stored {stored}")]
    VersionConflict {
        /// Key of the contended document.
        key: String,
        /// Version the caller attempted to update from.
        attempted: u64,
        /// Version currently stored.
        stored: u64,
    },
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub mod collection;

pub use collection::{Collection, Document};
