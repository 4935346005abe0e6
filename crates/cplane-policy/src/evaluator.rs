//! ---
//! cp_section: "05-policy-automation"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Declarative remediation policies and their evaluation engine."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use cplane_common::SystemType;
use cplane_metrics::PolicyMetrics;
use cplane_state::{StateMachine, SystemState, SystemStateContext, TransitionHook};
use cplane_store::{Collection, Document};

use crate::executor::ActionExecutor;
use crate::model::{Policy, PolicyAction};
use crate::repo::PolicyRepository;
use crate::Result;

/// Audit record of one policy execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Store key.
    pub id: String,
    /// Policy that fired.
    pub policy_id: String,
    /// Policy name at execution time.
    pub policy_name: String,
    /// System the action targeted.
    pub system: SystemType,
    /// Action that was executed.
    pub action: PolicyAction,
    /// Whether the action completed without error.
    pub success: bool,
    /// Condition description on success, error message on failure.
    pub message: String,
    /// When the execution happened.
    pub executed_at: DateTime<Utc>,
    /// Wall-clock duration of the action.
    pub duration_ms: u64,
    /// Optimistic-concurrency version, managed by the store.
    pub version: u64,
}

impl Document for ExecutionRecord {
    fn key(&self) -> String {
        self.id.clone()
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// Filter for execution-history queries.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    /// Restrict to one system.
    pub system: Option<SystemType>,
    /// Restrict to one policy id.
    pub policy_id: Option<String>,
    /// Maximum records returned; `None` means unbounded.
    pub limit: Option<usize>,
}

/// Matches policies against live state and executes every eligible one.
///
/// Each policy carries its own cooldown, tracked from the moment an
/// execution is attempted, successful or not, so a flapping action cannot
/// run hot. Execution failures are absorbed into failed audit records and
/// never propagate out of evaluation.
pub struct PolicyEvaluator {
    machine: Arc<StateMachine>,
    repo: Arc<PolicyRepository>,
    executor: Arc<ActionExecutor>,
    records: Arc<Collection<ExecutionRecord>>,
    last_fired: Mutex<HashMap<String, DateTime<Utc>>>,
    metrics: Option<PolicyMetrics>,
}

impl PolicyEvaluator {
    /// Wire an evaluator to its collaborators.
    pub fn new(
        machine: Arc<StateMachine>,
        repo: Arc<PolicyRepository>,
        executor: Arc<ActionExecutor>,
        records: Arc<Collection<ExecutionRecord>>,
        metrics: Option<PolicyMetrics>,
    ) -> Self {
        Self {
            machine,
            repo,
            executor,
            records,
            last_fired: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Evaluate every enabled policy covering `system` against its current
    /// state. Each policy whose condition holds and whose cooldown has
    /// elapsed is executed and audited.
    pub async fn evaluate_system(&self, system: SystemType) -> Result<Vec<ExecutionRecord>> {
        let ctx = self.machine.context(system);
        let mut fired = Vec::new();
        for policy in self.repo.enabled_for(system) {
            if !policy.condition.evaluate(&ctx) {
                continue;
            }
            if self.in_cooldown(&policy) {
                debug!(
                    system = %system,
                    policy = %policy.name,
                    "policy matched but is cooling down"
                );
                continue;
            }
            fired.push(self.fire(system, &policy).await?);
        }
        Ok(fired)
    }

    /// Execution history matching `query`, newest first.
    pub fn records(&self, query: RecordQuery) -> Vec<ExecutionRecord> {
        let mut records = self.records.find(|record| {
            query.system.map_or(true, |system| record.system == system)
                && query
                    .policy_id
                    .as_deref()
                    .map_or(true, |policy_id| record.policy_id == policy_id)
        });
        records.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        records
    }

    fn in_cooldown(&self, policy: &Policy) -> bool {
        let last_fired = self.last_fired.lock();
        match last_fired.get(&policy.id) {
            Some(at) => match chrono::Duration::from_std(policy.cooldown) {
                Ok(cooldown) => Utc::now() - *at < cooldown,
                Err(_) => false,
            },
            None => false,
        }
    }

    async fn fire(&self, system: SystemType, policy: &Policy) -> Result<ExecutionRecord> {
        // Stamp the cooldown before executing so a slow or failing action
        // still counts against it.
        self.last_fired.lock().insert(policy.id.clone(), Utc::now());

        let started = Instant::now();
        let outcome = self.executor.execute(system, policy).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let success = outcome.is_ok();
        let message = match outcome {
            Ok(()) => policy.condition.describe(),
            Err(err) => {
                warn!(system = %system, policy = %policy.name, error = %err, "policy action failed");
                err.to_string()
            }
        };
        if success {
            info!(system = %system, policy = %policy.name, action = %policy.action, "policy fired");
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_execution(&system.to_string(), &policy.action.to_string(), success);
        }

        let record = ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            policy_id: policy.id.clone(),
            policy_name: policy.name.clone(),
            system,
            action: policy.action,
            success,
            message,
            executed_at: Utc::now(),
            duration_ms,
            version: 0,
        };
        Ok(self.records.insert(record)?)
    }
}

/// Re-evaluates a system's policies immediately after each state transition.
pub struct PolicyTransitionHook {
    evaluator: Arc<PolicyEvaluator>,
    metrics: Option<PolicyMetrics>,
}

impl PolicyTransitionHook {
    /// Build a hook over the shared evaluator.
    pub fn new(evaluator: Arc<PolicyEvaluator>, metrics: Option<PolicyMetrics>) -> Self {
        Self { evaluator, metrics }
    }
}

#[async_trait]
impl TransitionHook for PolicyTransitionHook {
    async fn on_transition(&self, _from: SystemState, ctx: &SystemStateContext) {
        if let Some(metrics) = &self.metrics {
            metrics.record_event_triggered(&ctx.system_type.to_string());
        }
        if let Err(err) = self.evaluator.evaluate_system(ctx.system_type).await {
            warn!(
                system = %ctx.system_type,
                error = %err,
                "event-triggered policy evaluation failed"
            );
        }
    }
}
