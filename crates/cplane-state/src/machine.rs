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
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use cplane_common::SystemType;
use cplane_metrics::StateMetrics;

use crate::{SystemState, SystemStateContext};

/// Observer invoked after every applied transition, outside any lock.
///
/// Hooks receive a snapshot of the post-transition context. Implementations
/// are free to drive further transitions; cooldowns keep the recursion
/// bounded.
#[async_trait]
pub trait TransitionHook: Send + Sync {
    /// React to an applied transition.
    async fn on_transition(&self, from: SystemState, ctx: &SystemStateContext);
}

/// Owner of one [`SystemStateContext`] per managed system.
///
/// Contexts exist for every system from construction; there is no
/// registration step and no way to observe a system without a context.
pub struct StateMachine {
    contexts: HashMap<SystemType, Mutex<SystemStateContext>>,
    hooks: Mutex<Vec<Arc<dyn TransitionHook>>>,
    metrics: Option<StateMetrics>,
}

impl StateMachine {
    /// Build a machine with every system in [`SystemState::Init`].
    pub fn new(metrics: Option<StateMetrics>) -> Self {
        let contexts = SystemType::ALL
            .iter()
            .map(|&system| (system, Mutex::new(SystemStateContext::initial(system))))
            .collect();
        Self {
            contexts,
            hooks: Mutex::new(Vec::new()),
            metrics,
        }
    }

    /// Register a hook to be notified after each applied transition.
    pub fn register_hook(&self, hook: Arc<dyn TransitionHook>) {
        self.hooks.lock().push(hook);
    }

    /// Snapshot of the current context for `system`.
    pub fn context(&self, system: SystemType) -> SystemStateContext {
        self.contexts[&system].lock().clone()
    }

    /// Snapshots for all systems.
    pub fn contexts(&self) -> Vec<SystemStateContext> {
        SystemType::ALL.iter().map(|&s| self.context(s)).collect()
    }

    /// Current state of `system`.
    pub fn current_state(&self, system: SystemType) -> SystemState {
        self.contexts[&system].lock().current_state
    }

    /// Record an observed call latency without transitioning.
    pub fn update_latency(&self, system: SystemType, latency_ms: u64) {
        self.contexts[&system].lock().latency_ms = Some(latency_ms);
    }

    /// Attempt a transition for `system`.
    ///
    /// A valid transition is applied under the context lock, then hooks are
    /// notified with the post-transition snapshot after the lock is
    /// released. An invalid transition is logged, counted, and leaves the
    /// context untouched; the unchanged snapshot is returned either way.
    pub async fn transition(
        &self,
        system: SystemType,
        target: SystemState,
        reason: Option<String>,
    ) -> SystemStateContext {
        let (from, snapshot) = {
            let mut ctx = self.contexts[&system].lock();
            let from = ctx.current_state;
            if !from.can_transition_to(target) {
                warn!(
                    system = %system,
                    from = %from,
                    to = %target,
                    "rejected invalid state transition"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_invalid_transition(&system.to_string());
                }
                return ctx.clone();
            }
            ctx.apply(target, reason);
            (from, ctx.clone())
        };

        info!(
            system = %system,
            from = %from,
            to = %target,
            retry_count = snapshot.retry_count,
            "state transition applied"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(&system.to_string(), &from.to_string(), &target.to_string());
        }

        let hooks: Vec<_> = self.hooks.lock().clone();
        for hook in hooks {
            hook.on_transition(from, &snapshot).await;
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn every_system_starts_in_init() {
        let machine = StateMachine::new(None);
        for system in SystemType::ALL {
            assert_eq!(machine.current_state(system), SystemState::Init);
        }
    }

    #[tokio::test]
    async fn invalid_transition_leaves_state_untouched() {
        let machine = StateMachine::new(None);
        let snapshot = machine
            .transition(SystemType::Mysql, SystemState::Connected, None)
            .await;
        assert_eq!(snapshot.current_state, SystemState::Init);
        assert!(snapshot.previous_state.is_none());
    }

    #[tokio::test]
    async fn valid_path_updates_context_and_counters() {
        let machine = StateMachine::new(None);
        machine
            .transition(SystemType::Redis, SystemState::Connecting, None)
            .await;
        machine
            .transition(SystemType::Redis, SystemState::Retrying, Some("refused".into()))
            .await;
        let snapshot = machine
            .transition(SystemType::Redis, SystemState::Connected, None)
            .await;
        assert_eq!(snapshot.current_state, SystemState::Connected);
        assert_eq!(snapshot.previous_state, Some(SystemState::Retrying));
        assert_eq!(snapshot.retry_count, 0);
        // Other systems are untouched.
        assert_eq!(machine.current_state(SystemType::Kafka), SystemState::Init);
    }

    struct CountingHook(AtomicUsize);

    #[async_trait]
    impl TransitionHook for CountingHook {
        async fn on_transition(&self, _from: SystemState, ctx: &SystemStateContext) {
            assert_eq!(ctx.current_state, SystemState::Connecting);
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn hooks_fire_only_for_applied_transitions() {
        let machine = StateMachine::new(None);
        let hook = Arc::new(CountingHook(AtomicUsize::new(0)));
        machine.register_hook(hook.clone());

        // Invalid: no hook call.
        machine
            .transition(SystemType::Mysql, SystemState::Degraded, None)
            .await;
        assert_eq!(hook.0.load(Ordering::SeqCst), 0);

        machine
            .transition(SystemType::Mysql, SystemState::Connecting, None)
            .await;
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
    }
}
