//! ---
//! cp_section: "02-state-machine"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Guarded per-system state machine."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::info;

use cplane_common::SystemType;

/// Per-system circuit breaker flags, forced open or closed by policy
/// actions.
///
/// State transitions into and out of `CIRCUIT_OPEN` go through the state
/// machine; this registry only tracks which breakers have been forced so
/// callers can short-circuit before dialing.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    open: RwLock<HashMap<SystemType, bool>>,
}

impl CircuitBreakerRegistry {
    /// Registry with every breaker closed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the breaker for `system` open.
    pub fn force_open(&self, system: SystemType) {
        self.open.write().insert(system, true);
        info!(system = %system, "circuit breaker forced open");
    }

    /// Force the breaker for `system` closed.
    pub fn force_close(&self, system: SystemType) {
        self.open.write().insert(system, false);
        info!(system = %system, "circuit breaker forced closed");
    }

    /// Whether the breaker for `system` is currently open.
    pub fn is_open(&self, system: SystemType) -> bool {
        self.open.read().get(&system).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakers_default_closed_and_toggle_independently() {
        let registry = CircuitBreakerRegistry::new();
        assert!(!registry.is_open(SystemType::Mysql));

        registry.force_open(SystemType::Mysql);
        assert!(registry.is_open(SystemType::Mysql));
        assert!(!registry.is_open(SystemType::Redis));

        registry.force_close(SystemType::Mysql);
        assert!(!registry.is_open(SystemType::Mysql));
    }
}
