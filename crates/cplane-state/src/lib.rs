//! ---
//! cp_section: "02-state-machine"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Guarded per-system state machine."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Per-system state machine with validated transitions.
//!
//! Every managed system is always in exactly one [`SystemState`]; the
//! [`StateMachine`] owns one context per system and is the only mutation
//! path. Invalid transitions are a contract violation: logged, counted, and
//! rejected without disturbing the current state.

use serde::{Deserialize, Serialize};
use strum::Display;

pub mod breaker;
pub mod context;
pub mod machine;

pub use breaker::CircuitBreakerRegistry;
pub use context::SystemStateContext;
pub use machine::{StateMachine, TransitionHook};

/// Canonical system state. Each system is always in exactly one state;
/// the edge set below is fixed and validated on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemState {
    /// Monitoring has begun, nothing attempted yet.
    Init,
    /// Actively establishing a connection.
    Connecting,
    /// Fully operational.
    Connected,
    /// Connected but impaired (latency, intermittent failures).
    Degraded,
    /// Re-attempting a connection after failure.
    Retrying,
    /// Circuit breaker open; calls are halted.
    CircuitOpen,
    /// Circuit half-open, probing recovery.
    Recovering,
    /// No active connection.
    Disconnected,
}

impl SystemState {
    /// Targets reachable from this state. Self-transitions are never valid.
    pub fn allowed_targets(self) -> &'static [SystemState] {
        use SystemState::*;
        match self {
            Init => &[Connecting],
            Connecting => &[Connected, Retrying, Disconnected],
            Connected => &[Degraded, Disconnected],
            Degraded => &[Connected, Retrying, CircuitOpen],
            Retrying => &[Connected, CircuitOpen, Disconnected],
            CircuitOpen => &[Recovering, Disconnected],
            Recovering => &[Connected, CircuitOpen],
            Disconnected => &[Connecting],
        }
    }

    /// Whether `target` is a valid next state.
    pub fn can_transition_to(self, target: SystemState) -> bool {
        self != target && self.allowed_targets().contains(&target)
    }

    /// A healthy, fully operational state.
    pub fn is_healthy(self) -> bool {
        self == SystemState::Connected
    }

    /// A failed state.
    pub fn is_unhealthy(self) -> bool {
        matches!(self, SystemState::Disconnected | SystemState::CircuitOpen)
    }

    /// A transitional or recovery state.
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            SystemState::Connecting | SystemState::Retrying | SystemState::Recovering
        )
    }
}
