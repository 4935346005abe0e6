//! ---
//! cp_section: "07-observability"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Structured logging adapters and sinks."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Tracing subscriber setup shared by the daemon and tests.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

/// Initialize a baseline tracing subscriber suitable for development.
///
/// Respects `RUST_LOG`; defaults to INFO. Safe to call more than once.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Initialize with JSON output for machine-readable log shipping.
pub fn init_json() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().json())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
        tracing::info!(check = true, "logging initialized");
    }
}
