//! ---
//! cp_section: "05-policy-automation"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Declarative remediation policies and their evaluation engine."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::sync::Arc;

use tracing::{info, warn};

use cplane_common::{EventType, FailureEvent, SystemType};
use cplane_connect::ConnectorRegistry;
use cplane_outbox::{OutboxError, OutboxProducer};
use cplane_state::{CircuitBreakerRegistry, StateMachine, SystemState};

use crate::model::{Policy, PolicyAction};
use crate::{PolicyError, Result};

/// Carries out policy actions against the state machine, breakers,
/// connectors, and the outbox.
///
/// Actions are idempotent where the domain allows: re-opening an already
/// open breaker or closing a closed one is a no-op, not an error. Events
/// tied to state changes (circuit opened/closed, retry attempted) are staged
/// by the state-event hook, not here.
pub struct ActionExecutor {
    machine: Arc<StateMachine>,
    connectors: ConnectorRegistry,
    breakers: Arc<CircuitBreakerRegistry>,
    outbox: Arc<OutboxProducer>,
}

impl ActionExecutor {
    /// Wire an executor to its collaborators.
    pub fn new(
        machine: Arc<StateMachine>,
        connectors: ConnectorRegistry,
        breakers: Arc<CircuitBreakerRegistry>,
        outbox: Arc<OutboxProducer>,
    ) -> Self {
        Self {
            machine,
            connectors,
            breakers,
            outbox,
        }
    }

    /// Execute `policy`'s action against `system`.
    pub async fn execute(&self, system: SystemType, policy: &Policy) -> Result<()> {
        info!(
            system = %system,
            action = %policy.action,
            policy = %policy.name,
            "executing policy action"
        );
        match policy.action {
            PolicyAction::ForceReconnect => self.force_reconnect(system, policy).await,
            PolicyAction::OpenCircuit => self.open_circuit(system, policy).await,
            PolicyAction::CloseCircuit => self.close_circuit(system, policy).await,
            PolicyAction::EmitAlert => self.emit_alert(system, policy),
            PolicyAction::MarkDegraded => self.mark_degraded(system, policy).await,
            PolicyAction::NoAction => Ok(()),
        }
    }

    async fn force_reconnect(&self, system: SystemType, policy: &Policy) -> Result<()> {
        let connector = self
            .connectors
            .get(system)
            .ok_or(PolicyError::ConnectorMissing(system))?;
        if self.machine.current_state(system) == SystemState::Disconnected {
            self.machine
                .transition(system, SystemState::Connecting, None)
                .await;
        }
        let reconnected = connector
            .reconnect()
            .await
            .map_err(|err| PolicyError::Connector(err.to_string()))?;
        if reconnected {
            self.machine
                .transition(system, SystemState::Connected, None)
                .await;
            self.stage_event(
                EventType::SystemReconnect,
                system,
                format!("reconnect forced by policy {}", policy.name),
            )?;
        } else {
            // The Retrying transition stages the retry event via the
            // state-event hook.
            self.machine
                .transition(
                    system,
                    SystemState::Retrying,
                    Some(format!("policy {} reconnect failed", policy.name)),
                )
                .await;
        }
        Ok(())
    }

    async fn open_circuit(&self, system: SystemType, policy: &Policy) -> Result<()> {
        if self.breakers.is_open(system) {
            return Ok(());
        }
        self.breakers.force_open(system);
        self.machine
            .transition(
                system,
                SystemState::CircuitOpen,
                Some(format!("circuit opened by policy {}", policy.name)),
            )
            .await;
        Ok(())
    }

    async fn close_circuit(&self, system: SystemType, policy: &Policy) -> Result<()> {
        if !self.breakers.is_open(system) {
            return Ok(());
        }
        self.breakers.force_close(system);
        if self.machine.current_state(system) == SystemState::CircuitOpen {
            self.machine
                .transition(
                    system,
                    SystemState::Recovering,
                    Some(format!("circuit closed by policy {}", policy.name)),
                )
                .await;
        }
        Ok(())
    }

    fn emit_alert(&self, system: SystemType, policy: &Policy) -> Result<()> {
        self.stage_event(
            EventType::SystemAlert,
            system,
            format!(
                "[{}] policy {} matched: {}",
                policy.severity,
                policy.name,
                policy.condition.describe()
            ),
        )
    }

    async fn mark_degraded(&self, system: SystemType, policy: &Policy) -> Result<()> {
        self.machine
            .transition(
                system,
                SystemState::Degraded,
                Some(format!("marked degraded by policy {}", policy.name)),
            )
            .await;
        Ok(())
    }

    fn stage_event(
        &self,
        event_type: EventType,
        system: SystemType,
        message: String,
    ) -> Result<()> {
        match self.outbox.stage(FailureEvent::create(event_type, system, message)) {
            Ok(_) => Ok(()),
            // A racing producer already staged the same event id.
            Err(OutboxError::DuplicateEvent(id)) => {
                warn!(event_id = %id, "event already staged");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cplane_connect::SimulatedConnector;
    use cplane_outbox::OutboxEntry;

    use crate::condition::PolicyCondition;
    use crate::model::{PolicySeverity, PolicyTarget};

    use super::*;

    fn policy(action: PolicyAction) -> Policy {
        Policy::new(
            "test-policy",
            PolicyTarget::All,
            PolicyCondition::state(SystemState::Disconnected),
            action,
            PolicySeverity::Warning,
            Duration::from_secs(60),
        )
    }

    fn executor() -> (
        ActionExecutor,
        Arc<StateMachine>,
        Arc<CircuitBreakerRegistry>,
        Arc<cplane_store::Collection<OutboxEntry>>,
        Arc<SimulatedConnector>,
    ) {
        let machine = Arc::new(StateMachine::new(None));
        let breakers = Arc::new(CircuitBreakerRegistry::new());
        let entries = Arc::new(cplane_store::Collection::new("outbox"));
        let outbox = Arc::new(OutboxProducer::new(entries.clone(), None));
        let connector = Arc::new(SimulatedConnector::new(SystemType::Mysql));
        let connectors = ConnectorRegistry::new().with(connector.clone());
        let executor = ActionExecutor::new(machine.clone(), connectors, breakers.clone(), outbox);
        (executor, machine, breakers, entries, connector)
    }

    async fn force_disconnected(machine: &StateMachine, system: SystemType) {
        machine
            .transition(system, SystemState::Connecting, None)
            .await;
        machine
            .transition(system, SystemState::Disconnected, None)
            .await;
    }

    #[tokio::test]
    async fn force_reconnect_restores_a_disconnected_system() {
        let (executor, machine, _, entries, _) = executor();
        force_disconnected(&machine, SystemType::Mysql).await;

        executor
            .execute(SystemType::Mysql, &policy(PolicyAction::ForceReconnect))
            .await
            .unwrap();

        assert_eq!(
            machine.current_state(SystemType::Mysql),
            SystemState::Connected
        );
        let events = entries.all();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.event_type, EventType::SystemReconnect);
    }

    #[tokio::test]
    async fn failed_reconnect_moves_to_retrying() {
        let (executor, machine, _, entries, connector) = executor();
        force_disconnected(&machine, SystemType::Mysql).await;
        connector.set_reachable(false);

        executor
            .execute(SystemType::Mysql, &policy(PolicyAction::ForceReconnect))
            .await
            .unwrap();

        assert_eq!(
            machine.current_state(SystemType::Mysql),
            SystemState::Retrying
        );
        // Event emission for the Retrying state rides on the transition
        // hook, which is not registered in this harness.
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn open_circuit_is_idempotent() {
        let (executor, machine, breakers, entries, _) = executor();
        machine
            .transition(SystemType::Mysql, SystemState::Connecting, None)
            .await;
        machine
            .transition(SystemType::Mysql, SystemState::Connected, None)
            .await;
        machine
            .transition(SystemType::Mysql, SystemState::Degraded, None)
            .await;

        let open = policy(PolicyAction::OpenCircuit);
        executor.execute(SystemType::Mysql, &open).await.unwrap();
        executor.execute(SystemType::Mysql, &open).await.unwrap();

        assert!(breakers.is_open(SystemType::Mysql));
        assert_eq!(
            machine.current_state(SystemType::Mysql),
            SystemState::CircuitOpen
        );
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn close_circuit_begins_recovery() {
        let (executor, machine, breakers, _, _) = executor();
        machine
            .transition(SystemType::Mysql, SystemState::Connecting, None)
            .await;
        machine
            .transition(SystemType::Mysql, SystemState::Connected, None)
            .await;
        machine
            .transition(SystemType::Mysql, SystemState::Degraded, None)
            .await;
        executor
            .execute(SystemType::Mysql, &policy(PolicyAction::OpenCircuit))
            .await
            .unwrap();

        executor
            .execute(SystemType::Mysql, &policy(PolicyAction::CloseCircuit))
            .await
            .unwrap();

        assert!(!breakers.is_open(SystemType::Mysql));
        assert_eq!(
            machine.current_state(SystemType::Mysql),
            SystemState::Recovering
        );
    }

    #[tokio::test]
    async fn alerts_carry_the_condition_description() {
        let (executor, _, _, entries, _) = executor();
        executor
            .execute(SystemType::Mysql, &policy(PolicyAction::EmitAlert))
            .await
            .unwrap();

        let events = entries.all();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.event_type, EventType::SystemAlert);
        assert!(events[0].event.message.contains("state == DISCONNECTED"));
        assert!(events[0].event.message.contains("WARNING"));
    }

    #[tokio::test]
    async fn missing_connector_is_an_error() {
        let (executor, machine, ..) = executor();
        force_disconnected(&machine, SystemType::Redis).await;
        let err = executor
            .execute(SystemType::Redis, &policy(PolicyAction::ForceReconnect))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::ConnectorMissing(SystemType::Redis)));
    }
}
