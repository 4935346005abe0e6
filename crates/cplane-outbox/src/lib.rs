//! ---
//! cp_section: "06-event-outbox"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Staged event delivery with retries and a dead-letter queue."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Transactional-outbox style event delivery.
//!
//! Producers stage [`FailureEvent`](cplane_common::FailureEvent)s through the
//! [`OutboxProducer`]; the [`OutboxDispatcher`] ships them downstream with
//! exponential backoff, claiming each entry with a compare-and-swap so a
//! second dispatcher can never double-send. Entries that exhaust their
//! retries land in the dead-letter queue for operator replay.

use thiserror::Error;

pub mod dispatcher;
pub mod entry;
pub mod hook;
pub mod producer;
pub mod publisher;

pub use dispatcher::{OutboxDispatcher, OutboxStats};
pub use entry::{OutboxEntry, OutboxStatus};
pub use hook::StateEventHook;
pub use producer::OutboxProducer;
pub use publisher::{EventPublisher, LoggingPublisher};

/// Errors surfaced by the outbox.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The underlying store rejected an operation.
    #[error(transparent)]
    Store(#[from] cplane_store::StoreError),
    /// An event with the same idempotency key was already staged.
    #[error("duplicate event id {0}")]
    DuplicateEvent(String),
    /// The referenced entry does not exist.
    #[error("outbox entry {0} not found")]
    EntryNotFound(String),
    /// The referenced entry is not in the dead-letter queue.
    #[error("outbox entry {0} is not dead-lettered (status {1})")]
    NotDeadLettered(String, String),
}

/// Outbox result alias.
pub type Result<T> = std::result::Result<T, OutboxError>;
