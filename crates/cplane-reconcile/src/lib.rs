//! ---
//! cp_section: "03-reconciliation"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Desired-state reconciliation with drift detection and convergence."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Desired-state reconciliation.
//!
//! Operators declare a [`DesiredSystemState`] per system; the
//! [`ReconcileEngine`] periodically compares it against the live context,
//! detects drift in a strict priority order, and converges with the least
//! invasive action available. Every detected drift is appended to a bounded
//! in-memory history.

use thiserror::Error;

pub mod desired;
pub mod drift;
pub mod engine;

pub use desired::{DesiredStateRepository, DesiredSystemState};
pub use drift::{DriftHistory, DriftRecord, DriftType};
pub use engine::ReconcileEngine;

/// Errors surfaced by the reconciliation engine.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The underlying store rejected an operation.
    #[error(transparent)]
    Store(#[from] cplane_store::StoreError),
    /// No connector is registered for the drifted system.
    #[error("no connector registered for {0}")]
    ConnectorMissing(cplane_common::SystemType),
    /// The connector failed while converging.
    #[error("connector call failed: {0}")]
    Connector(String),
}

/// Reconciliation result alias.
pub type Result<T> = std::result::Result<T, ReconcileError>;
