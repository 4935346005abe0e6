//! ---
//! cp_section: "06-event-outbox"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Staged event delivery with retries and a dead-letter queue."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use cplane_common::{EventType, FailureEvent};
use cplane_state::{SystemState, SystemStateContext, TransitionHook};

use crate::{OutboxError, OutboxProducer};

/// Stages a domain event for every health-relevant state entered.
///
/// Registered on the state machine so that event emission cannot be
/// forgotten by any caller driving a transition.
pub struct StateEventHook {
    producer: Arc<OutboxProducer>,
}

impl StateEventHook {
    /// Build a hook staging through `producer`.
    pub fn new(producer: Arc<OutboxProducer>) -> Self {
        Self { producer }
    }

    fn event_for(state: SystemState) -> Option<EventType> {
        match state {
            SystemState::Connected => Some(EventType::ConnectionEstablished),
            SystemState::Disconnected => Some(EventType::ConnectionLost),
            SystemState::CircuitOpen => Some(EventType::CircuitBreakerOpened),
            SystemState::Recovering => Some(EventType::CircuitBreakerClosed),
            SystemState::Retrying => Some(EventType::RetryAttempted),
            SystemState::Init | SystemState::Connecting | SystemState::Degraded => None,
        }
    }
}

#[async_trait]
impl TransitionHook for StateEventHook {
    async fn on_transition(&self, from: SystemState, ctx: &SystemStateContext) {
        let Some(event_type) = Self::event_for(ctx.current_state) else {
            return;
        };
        let message = match &ctx.failure_reason {
            Some(reason) => format!("{} -> {}: {reason}", from, ctx.current_state),
            None => format!("{} -> {}", from, ctx.current_state),
        };
        let event = FailureEvent::create(event_type, ctx.system_type, message);
        match self.producer.stage(event) {
            Ok(_) | Err(OutboxError::DuplicateEvent(_)) => {}
            Err(err) => {
                warn!(
                    system = %ctx.system_type,
                    error = %err,
                    "failed to stage transition event"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use cplane_common::SystemType;
    use cplane_state::StateMachine;
    use cplane_store::Collection;

    use crate::OutboxEntry;

    use super::*;

    #[tokio::test]
    async fn health_relevant_transitions_stage_events() {
        let entries: Arc<Collection<OutboxEntry>> = Arc::new(Collection::new("outbox"));
        let producer = Arc::new(OutboxProducer::new(entries.clone(), None));
        let machine = StateMachine::new(None);
        machine.register_hook(Arc::new(StateEventHook::new(producer)));

        machine
            .transition(SystemType::Mysql, SystemState::Connecting, None)
            .await;
        assert!(entries.is_empty(), "Connecting carries no event");

        machine
            .transition(SystemType::Mysql, SystemState::Connected, None)
            .await;
        machine
            .transition(SystemType::Mysql, SystemState::Disconnected, Some("cable pulled".into()))
            .await;

        let mut events: Vec<EventType> = entries
            .all()
            .iter()
            .map(|entry| entry.event.event_type)
            .collect();
        events.sort_by_key(|e| format!("{e}"));
        assert_eq!(
            events,
            vec![EventType::ConnectionEstablished, EventType::ConnectionLost]
        );
        let lost = entries
            .find(|e| e.event.event_type == EventType::ConnectionLost)
            .remove(0);
        assert!(lost.event.message.contains("cable pulled"));
        assert_eq!(lost.event.system, SystemType::Mysql);
    }
}
