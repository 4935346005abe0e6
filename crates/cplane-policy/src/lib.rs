//! ---
//! cp_section: "05-policy-automation"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Declarative remediation policies and their evaluation engine."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Declarative remediation policies.
//!
//! A [`Policy`] binds a condition over a system's live state to a remediation
//! [`PolicyAction`]. The [`PolicyEvaluator`] matches policies against state
//! snapshots, enforces per-policy cooldowns, and records every execution;
//! the [`PolicySweeper`] drives periodic evaluation while a transition hook
//! re-evaluates immediately after every state change.

use thiserror::Error;

pub mod condition;
pub mod evaluator;
pub mod executor;
pub mod model;
pub mod repo;
pub mod sweep;

pub use condition::PolicyCondition;
pub use evaluator::{ExecutionRecord, PolicyEvaluator, PolicyTransitionHook, RecordQuery};
pub use executor::ActionExecutor;
pub use model::{Policy, PolicyAction, PolicySeverity, PolicyTarget};
pub use repo::PolicyRepository;
pub use sweep::{PolicySweeper, SweepStats};

/// Errors surfaced by the policy engine.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The underlying store rejected an operation.
    #[error(transparent)]
    Store(#[from] cplane_store::StoreError),
    /// Staging an event in the outbox failed.
    #[error(transparent)]
    Outbox(#[from] cplane_outbox::OutboxError),
    /// No connector is registered for the targeted system.
    #[error("no connector registered for {0}")]
    ConnectorMissing(cplane_common::SystemType),
    /// The connector failed while executing an action.
    #[error("connector call failed: {0}")]
    Connector(String),
}

/// Policy result alias.
pub type Result<T> = std::result::Result<T, PolicyError>;
