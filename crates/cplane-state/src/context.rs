//! ---
//! cp_section: "02-state-machine"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Guarded per-system state machine."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use cplane_common::SystemType;

use crate::SystemState;

/// Live state record for one managed system.
///
/// Owned by the [`StateMachine`](crate::StateMachine); callers observe
/// snapshots. Counter side effects are applied by [`apply`](Self::apply) so
/// every mutation path agrees on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStateContext {
    /// System this context tracks.
    pub system_type: SystemType,
    /// Current state.
    pub current_state: SystemState,
    /// State before the last transition, if any has occurred.
    pub previous_state: Option<SystemState>,
    /// When the last transition was applied.
    pub last_transition_at: DateTime<Utc>,
    /// Human-readable reason for the last failure-ward transition.
    pub failure_reason: Option<String>,
    /// Consecutive reconnect attempts since the last successful connect.
    pub retry_count: u32,
    /// Consecutive degradation or breaker events since the last recovery.
    pub consecutive_failures: u32,
    /// Most recently observed call latency, if any.
    pub latency_ms: Option<u64>,
}

impl SystemStateContext {
    /// Fresh context in [`SystemState::Init`].
    pub fn initial(system_type: SystemType) -> Self {
        Self {
            system_type,
            current_state: SystemState::Init,
            previous_state: None,
            last_transition_at: Utc::now(),
            failure_reason: None,
            retry_count: 0,
            consecutive_failures: 0,
            latency_ms: None,
        }
    }

    /// Time spent in the current state.
    pub fn elapsed_in_state(&self) -> Duration {
        Utc::now() - self.last_transition_at
    }

    /// Whether the current state has been held at least `duration`.
    pub fn is_stable_for(&self, duration: Duration) -> bool {
        self.elapsed_in_state() >= duration
    }

    /// Apply a validated transition, including its counter side effects.
    pub(crate) fn apply(&mut self, target: SystemState, reason: Option<String>) {
        self.previous_state = Some(self.current_state);
        self.current_state = target;
        self.last_transition_at = Utc::now();
        match target {
            SystemState::Connected => {
                self.retry_count = 0;
                self.consecutive_failures = 0;
                self.failure_reason = None;
            }
            SystemState::Retrying => {
                self.retry_count += 1;
                self.failure_reason = reason.or(self.failure_reason.take());
            }
            SystemState::Degraded | SystemState::CircuitOpen => {
                self.consecutive_failures += 1;
                self.failure_reason = reason.or(self.failure_reason.take());
            }
            _ => {
                if reason.is_some() {
                    self.failure_reason = reason;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_resets_failure_bookkeeping() {
        let mut ctx = SystemStateContext::initial(SystemType::Mysql);
        ctx.apply(SystemState::Connecting, None);
        ctx.apply(SystemState::Retrying, Some("handshake timed out".into()));
        ctx.apply(SystemState::Retrying, None);
        assert_eq!(ctx.retry_count, 2);
        assert_eq!(ctx.failure_reason.as_deref(), Some("handshake timed out"));

        ctx.apply(SystemState::Connected, None);
        assert_eq!(ctx.retry_count, 0);
        assert_eq!(ctx.consecutive_failures, 0);
        assert!(ctx.failure_reason.is_none());
        assert_eq!(ctx.previous_state, Some(SystemState::Retrying));
    }

    #[test]
    fn degradation_and_breaker_count_consecutive_failures() {
        let mut ctx = SystemStateContext::initial(SystemType::Kafka);
        ctx.apply(SystemState::Connecting, None);
        ctx.apply(SystemState::Connected, None);
        ctx.apply(SystemState::Degraded, Some("latency spike".into()));
        ctx.apply(SystemState::CircuitOpen, None);
        assert_eq!(ctx.consecutive_failures, 2);
        assert_eq!(ctx.failure_reason.as_deref(), Some("latency spike"));
    }
}
