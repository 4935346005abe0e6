//! ---
//! cp_section: "01-core-runtime"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Shared types, domain events, and configuration."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Shared primitives used across the C-Plane workspace: the closed set of
//! managed system types, the failure-event domain model, and configuration.

pub mod config;
pub mod event;
pub mod system;

pub use config::AppConfig;
pub use event::{EventType, FailureEvent};
pub use system::SystemType;
