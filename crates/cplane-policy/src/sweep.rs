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
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use cplane_common::config::PolicyConfig;
use cplane_metrics::PolicyMetrics;

use crate::evaluator::PolicyEvaluator;
use crate::repo::PolicyRepository;

const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Counters for the periodic sweep, exposed for operators.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepStats {
    /// Whether the sweep is enabled at all.
    pub enabled: bool,
    /// Completed sweep cycles.
    pub cycles: u64,
    /// Policy executions triggered by sweeps.
    pub triggered: u64,
    /// Systems whose evaluation failed even after retries.
    pub failures: u64,
    /// When the last cycle finished.
    pub last_evaluation: Option<DateTime<Utc>>,
    /// Policies in the catalog at last read.
    pub total_policies: usize,
}

/// Periodic driver for policy evaluation across all configured systems.
///
/// A failing system is retried with a short backoff up to the configured
/// attempt count, then skipped for the rest of the cycle; one bad system
/// never starves the others.
pub struct PolicySweeper {
    evaluator: Arc<PolicyEvaluator>,
    repo: Arc<PolicyRepository>,
    config: PolicyConfig,
    stats: Mutex<SweepStats>,
    metrics: Option<PolicyMetrics>,
}

impl PolicySweeper {
    /// Build a sweeper over the shared evaluator.
    pub fn new(
        evaluator: Arc<PolicyEvaluator>,
        repo: Arc<PolicyRepository>,
        config: PolicyConfig,
        metrics: Option<PolicyMetrics>,
    ) -> Self {
        let stats = SweepStats {
            enabled: config.enabled,
            ..SweepStats::default()
        };
        Self {
            evaluator,
            repo,
            config,
            stats: Mutex::new(stats),
            metrics,
        }
    }

    /// Sweep loop. Runs one cycle per interval until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("policy sweep disabled by configuration");
            return;
        }
        let mut ticker = tokio::time::interval(self.config.interval);
        info!(
            interval = ?self.config.interval,
            systems = self.config.systems.len(),
            "policy sweeper started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                _ = shutdown.recv() => {
                    info!("policy sweeper stopping");
                    return;
                }
            }
        }
    }

    /// Evaluate every configured system once.
    pub async fn sweep_once(&self) {
        let mut triggered = 0;
        let mut failures = 0;
        for &system in &self.config.systems {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.evaluator.evaluate_system(system).await {
                    Ok(fired) => {
                        triggered += fired.len() as u64;
                        break;
                    }
                    Err(err) if attempt < self.config.max_retries => {
                        warn!(
                            system = %system,
                            attempt,
                            error = %err,
                            "policy evaluation failed, retrying"
                        );
                        tokio::time::sleep(RETRY_BACKOFF).await;
                    }
                    Err(err) => {
                        warn!(
                            system = %system,
                            attempts = attempt,
                            error = %err,
                            "policy evaluation gave up for this cycle"
                        );
                        failures += 1;
                        if let Some(metrics) = &self.metrics {
                            metrics.record_sweep_failure(&system.to_string());
                        }
                        break;
                    }
                }
            }
        }

        let total_policies = self.repo.all().len();
        let mut stats = self.stats.lock();
        stats.cycles += 1;
        stats.triggered += triggered;
        stats.failures += failures;
        stats.last_evaluation = Some(Utc::now());
        stats.total_policies = total_policies;
        if let Some(metrics) = &self.metrics {
            metrics.record_sweep();
        }
    }

    /// Current sweep counters.
    pub fn stats(&self) -> SweepStats {
        *self.stats.lock()
    }
}

#[cfg(test)]
mod tests {
    use cplane_common::SystemType;
    use cplane_connect::{ConnectorRegistry, SimulatedConnector};
    use cplane_outbox::{OutboxEntry, OutboxProducer};
    use cplane_state::{CircuitBreakerRegistry, StateMachine, SystemState};
    use cplane_store::Collection;

    use crate::condition::PolicyCondition;
    use crate::executor::ActionExecutor;
    use crate::model::{Policy, PolicyAction, PolicySeverity, PolicyTarget};

    use super::*;

    fn sweeper(
        config: PolicyConfig,
    ) -> (Arc<PolicySweeper>, Arc<StateMachine>, Arc<PolicyRepository>) {
        let machine = Arc::new(StateMachine::new(None));
        let repo = Arc::new(PolicyRepository::new(Arc::new(Collection::new("policies"))));
        let entries: Arc<Collection<OutboxEntry>> = Arc::new(Collection::new("outbox"));
        let outbox = Arc::new(OutboxProducer::new(entries, None));
        let connectors = ConnectorRegistry::new()
            .with(Arc::new(SimulatedConnector::new(SystemType::Mysql)))
            .with(Arc::new(SimulatedConnector::new(SystemType::Redis)))
            .with(Arc::new(SimulatedConnector::new(SystemType::Kafka)));
        let executor = Arc::new(ActionExecutor::new(
            machine.clone(),
            connectors,
            Arc::new(CircuitBreakerRegistry::new()),
            outbox,
        ));
        let evaluator = Arc::new(PolicyEvaluator::new(
            machine.clone(),
            repo.clone(),
            executor,
            Arc::new(Collection::new("policy_executions")),
            None,
        ));
        (
            Arc::new(PolicySweeper::new(evaluator, repo.clone(), config, None)),
            machine,
            repo,
        )
    }

    fn connecting_policy(name: &str, target: PolicyTarget) -> Policy {
        Policy::new(
            name,
            target,
            PolicyCondition::state(SystemState::Connecting),
            PolicyAction::NoAction,
            PolicySeverity::Info,
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn sweep_covers_every_configured_system() {
        // One policy per system: a single wildcard policy would fire once
        // and then sit in its own cooldown for the rest of the sweep.
        let (sweeper, machine, repo) = sweeper(PolicyConfig::default());
        repo.add(connecting_policy(
            "mysql-connecting",
            PolicyTarget::System(SystemType::Mysql),
        ))
        .unwrap();
        repo.add(connecting_policy(
            "redis-connecting",
            PolicyTarget::System(SystemType::Redis),
        ))
        .unwrap();
        machine
            .transition(SystemType::Mysql, SystemState::Connecting, None)
            .await;
        machine
            .transition(SystemType::Redis, SystemState::Connecting, None)
            .await;

        sweeper.sweep_once().await;

        let stats = sweeper.stats();
        assert!(stats.enabled);
        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.triggered, 2);
        assert_eq!(stats.failures, 0);
        assert_eq!(stats.total_policies, 2);
        assert!(stats.last_evaluation.is_some());
    }

    #[tokio::test]
    async fn wildcard_policy_fires_once_per_sweep_under_its_cooldown() {
        let (sweeper, machine, repo) = sweeper(PolicyConfig::default());
        repo.add(connecting_policy("any-connecting", PolicyTarget::All))
            .unwrap();
        machine
            .transition(SystemType::Mysql, SystemState::Connecting, None)
            .await;
        machine
            .transition(SystemType::Redis, SystemState::Connecting, None)
            .await;

        sweeper.sweep_once().await;

        // The cooldown is keyed by policy id, so the first match consumes
        // the whole sweep for this policy.
        let stats = sweeper.stats();
        assert_eq!(stats.triggered, 1);
    }

    #[tokio::test]
    async fn repeated_sweeps_respect_the_cooldown() {
        let (sweeper, machine, repo) = sweeper(PolicyConfig::default());
        repo.add(connecting_policy(
            "once",
            PolicyTarget::System(SystemType::Kafka),
        ))
        .unwrap();
        machine
            .transition(SystemType::Kafka, SystemState::Connecting, None)
            .await;

        for _ in 0..4 {
            sweeper.sweep_once().await;
        }
        let stats = sweeper.stats();
        assert_eq!(stats.cycles, 4);
        assert_eq!(stats.triggered, 1);
    }
}
