//! ---
//! cp_section: "04-chaos-engineering"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Controlled fault injection with experiment lifecycle management."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Controlled fault injection.
//!
//! A [`ChaosExperiment`] describes one deliberate fault against one managed
//! system. The [`ChaosOrchestrator`] owns the experiment lifecycle: it
//! delegates injection to the per-system [`FaultInjector`], schedules
//! cancellable auto-termination, and recovers persisted experiments after a
//! restart so no fault outlives its experiment. Faults that cannot be
//! realistically induced fail loudly, never silently degrade.

use thiserror::Error;

pub mod experiment;
pub mod injector;
pub mod orchestrator;
pub mod proxy;

pub use experiment::{ChaosExperiment, ExperimentSpec, ExperimentStatus, FaultType};
pub use injector::{FaultInjector, ProxyFaultInjector};
pub use orchestrator::{ChaosOrchestrator, ExperimentStats};
pub use proxy::{FaultProxyClient, Toxic};

/// Errors surfaced by the chaos subsystem.
#[derive(Debug, Error)]
pub enum ChaosError {
    /// The fault proxy is required for this fault and cannot be reached.
    #[error("fault proxy unavailable: {0}")]
    ProxyUnavailable(String),
    /// A fault-proxy call failed.
    #[error("fault proxy call failed: {0}")]
    Proxy(#[from] reqwest::Error),
    /// The experiment's parameters are invalid for the requested fault.
    #[error("invalid experiment: {0}")]
    InvalidExperiment(String),
    /// The referenced experiment does not exist.
    #[error("experiment {0} not found")]
    ExperimentNotFound(String),
    /// The experiment is not in a state that allows the operation.
    #[error("experiment {id} is {status}, expected {expected}")]
    InvalidStatus {
        /// Experiment id.
        id: String,
        /// Actual status.
        status: String,
        /// Status the operation requires.
        expected: String,
    },
    /// No injector is wired for the targeted system.
    #[error("no fault injector registered for {0}")]
    InjectorMissing(cplane_common::SystemType),
    /// The fault was reverted but the connection could not be restored.
    #[error("recovery for {system} failed: {detail}")]
    RecoveryFailed {
        /// System whose connection stayed down.
        system: cplane_common::SystemType,
        /// What the reconnect attempt reported.
        detail: String,
    },
    /// The underlying store rejected an operation.
    #[error(transparent)]
    Store(#[from] cplane_store::StoreError),
}

/// Chaos result alias.
pub type Result<T> = std::result::Result<T, ChaosError>;
