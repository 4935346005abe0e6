//! ---
//! cp_section: "03-reconciliation"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Desired-state reconciliation with drift detection and convergence."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use cplane_common::config::ReconciliationConfig;
use cplane_common::SystemType;
use cplane_connect::ConnectorRegistry;
use cplane_metrics::ReconcileMetrics;
use cplane_state::{CircuitBreakerRegistry, StateMachine, SystemState, SystemStateContext};

use crate::desired::{DesiredStateRepository, DesiredSystemState};
use crate::drift::{DriftHistory, DriftRecord, DriftType};
use crate::{ReconcileError, Result};

/// Convergence action recorded when the per-system cooldown suppressed one.
pub const ACTION_COOLDOWN_ACTIVE: &str = "COOLDOWN_ACTIVE";
/// Convergence action for a reconnect attempt.
pub const ACTION_RECONNECT_ATTEMPTED: &str = "RECONNECT_ATTEMPTED";
/// Convergence action for a circuit breaker reset.
pub const ACTION_CIRCUIT_RESET: &str = "CIRCUIT_RESET";
/// Convergence action marking a system degraded.
pub const ACTION_MARK_DEGRADED: &str = "MARK_DEGRADED";
/// Convergence action acknowledging a latency breach.
pub const ACTION_LATENCY_ACKNOWLEDGED: &str = "LATENCY_ACKNOWLEDGED";
/// Convergence action when drift was observed but no handler applies.
pub const ACTION_OBSERVED_ONLY: &str = "OBSERVED_ONLY";

/// Compares desired against observed state and converges on drift.
///
/// At most one drift fires per system per cycle, detected in strict priority
/// order. A fixed-window cooldown keeps convergence from fighting a system
/// that is already being nursed back.
pub struct ReconcileEngine {
    machine: Arc<StateMachine>,
    connectors: ConnectorRegistry,
    breakers: Arc<CircuitBreakerRegistry>,
    desired: Arc<DesiredStateRepository>,
    history: Arc<DriftHistory>,
    cooldowns: Mutex<HashMap<SystemType, DateTime<Utc>>>,
    config: ReconciliationConfig,
    metrics: Option<ReconcileMetrics>,
}

impl ReconcileEngine {
    /// Wire an engine to its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        machine: Arc<StateMachine>,
        connectors: ConnectorRegistry,
        breakers: Arc<CircuitBreakerRegistry>,
        desired: Arc<DesiredStateRepository>,
        history: Arc<DriftHistory>,
        config: ReconciliationConfig,
        metrics: Option<ReconcileMetrics>,
    ) -> Self {
        Self {
            machine,
            connectors,
            breakers,
            desired,
            history,
            cooldowns: Mutex::new(HashMap::new()),
            config,
            metrics,
        }
    }

    /// Reconciliation loop. Waits out the initial delay, then runs one cycle
    /// per interval until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            initial_delay = ?self.config.initial_delay,
            interval = ?self.config.interval,
            "reconciliation engine starting"
        );
        tokio::select! {
            _ = tokio::time::sleep(self.config.initial_delay) => {}
            _ = shutdown.recv() => {
                info!("reconciliation engine stopping before first cycle");
                return;
            }
        }
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.recv() => {
                    info!("reconciliation engine stopping");
                    return;
                }
            }
        }
    }

    /// Reconcile every system once. Per-system failures are logged and do
    /// not stop the cycle.
    pub async fn run_cycle(&self) {
        for system in SystemType::ALL {
            if let Err(err) = self.reconcile_system(system).await {
                warn!(system = %system, error = %err, "reconciliation failed for system");
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_cycle();
        }
    }

    /// Reconcile one system. Also serves as the manual trigger.
    ///
    /// Returns the appended [`DriftRecord`] when drift was detected, `None`
    /// when the system matches its declaration.
    pub async fn reconcile_system(&self, system: SystemType) -> Result<Option<DriftRecord>> {
        let desired = self.desired.get_or_default(system)?;
        let ctx = self.machine.context(system);
        let Some(drift_type) = Self::detect_drift(&desired, &ctx) else {
            debug!(system = %system, "no drift");
            return Ok(None);
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_drift(&system.to_string(), &drift_type.to_string());
        }

        if self.in_cooldown(system) {
            debug!(system = %system, drift = %drift_type, "drift observed during cooldown");
            return Ok(Some(self.record(
                &desired,
                &ctx,
                drift_type,
                ACTION_COOLDOWN_ACTIVE,
                false,
            )));
        }

        let (action, resolved) = self.converge(&desired, &ctx, drift_type).await?;
        self.cooldowns.lock().insert(system, Utc::now());
        info!(
            system = %system,
            drift = %drift_type,
            action,
            resolved,
            "drift converged"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_action(&system.to_string(), action);
        }
        Ok(Some(self.record(&desired, &ctx, drift_type, action, resolved)))
    }

    /// Drift history shared with operators.
    pub fn history(&self) -> Arc<DriftHistory> {
        self.history.clone()
    }

    /// Detect drift in strict priority order; the first match wins.
    fn detect_drift(
        desired: &DesiredSystemState,
        ctx: &SystemStateContext,
    ) -> Option<DriftType> {
        if ctx.current_state != desired.desired_state {
            return Some(DriftType::StateMismatch);
        }
        if ctx
            .latency_ms
            .is_some_and(|latency| latency > desired.max_latency_ms)
        {
            return Some(DriftType::LatencyExceeded);
        }
        if ctx.retry_count > desired.max_retry_count {
            return Some(DriftType::RetryExceeded);
        }
        if ctx.current_state == SystemState::CircuitOpen && desired.auto_recover {
            return Some(DriftType::CircuitStuckOpen);
        }
        None
    }

    async fn converge(
        &self,
        desired: &DesiredSystemState,
        ctx: &SystemStateContext,
        drift_type: DriftType,
    ) -> Result<(&'static str, bool)> {
        let system = ctx.system_type;
        match drift_type {
            DriftType::StateMismatch => {
                if desired.desired_state == SystemState::Connected
                    && ctx.current_state == SystemState::Disconnected
                {
                    let resolved = self.attempt_reconnect(system).await?;
                    Ok((ACTION_RECONNECT_ATTEMPTED, resolved))
                } else {
                    Ok((ACTION_OBSERVED_ONLY, false))
                }
            }
            DriftType::LatencyExceeded => Ok((ACTION_LATENCY_ACKNOWLEDGED, false)),
            DriftType::RetryExceeded => {
                self.machine
                    .transition(
                        system,
                        SystemState::Degraded,
                        Some(format!(
                            "retry count {} exceeded maximum {}",
                            ctx.retry_count, desired.max_retry_count
                        )),
                    )
                    .await;
                Ok((ACTION_MARK_DEGRADED, false))
            }
            DriftType::CircuitStuckOpen => {
                self.breakers.force_close(system);
                self.machine
                    .transition(
                        system,
                        SystemState::Recovering,
                        Some("circuit reset by reconciliation".into()),
                    )
                    .await;
                Ok((ACTION_CIRCUIT_RESET, false))
            }
        }
    }

    async fn attempt_reconnect(&self, system: SystemType) -> Result<bool> {
        let connector = self
            .connectors
            .get(system)
            .ok_or(ReconcileError::ConnectorMissing(system))?;
        self.machine
            .transition(system, SystemState::Connecting, None)
            .await;
        match connector.reconnect().await {
            Ok(true) => {
                self.machine
                    .transition(system, SystemState::Connected, None)
                    .await;
                Ok(true)
            }
            Ok(false) => {
                self.machine
                    .transition(
                        system,
                        SystemState::Retrying,
                        Some("reconciliation reconnect failed".into()),
                    )
                    .await;
                Ok(false)
            }
            Err(err) => {
                self.machine
                    .transition(
                        system,
                        SystemState::Retrying,
                        Some(format!("reconciliation reconnect error: {err}")),
                    )
                    .await;
                Err(ReconcileError::Connector(err.to_string()))
            }
        }
    }

    fn in_cooldown(&self, system: SystemType) -> bool {
        let cooldowns = self.cooldowns.lock();
        match cooldowns.get(&system) {
            Some(last) => match chrono::Duration::from_std(self.config.cooldown) {
                Ok(window) => Utc::now() - *last < window,
                Err(_) => false,
            },
            None => false,
        }
    }

    fn record(
        &self,
        desired: &DesiredSystemState,
        ctx: &SystemStateContext,
        drift_type: DriftType,
        action: &str,
        resolved: bool,
    ) -> DriftRecord {
        let record = DriftRecord {
            system_type: ctx.system_type,
            drift_type,
            desired: desired.desired_state,
            actual: ctx.current_state,
            detected_at: Utc::now(),
            action: action.to_owned(),
            resolved,
        };
        self.history.push(record.clone());
        record
    }
}
