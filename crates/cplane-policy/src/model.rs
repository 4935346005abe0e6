//! ---
//! cp_section: "05-policy-automation"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Declarative remediation policies and their evaluation engine."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use uuid::Uuid;

use cplane_common::SystemType;
use cplane_store::Document;

use crate::condition::PolicyCondition;

/// Which systems a policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyTarget {
    /// Every managed system.
    All,
    /// One specific system.
    System(SystemType),
}

impl PolicyTarget {
    /// Whether this target covers `system`.
    pub fn matches(&self, system: SystemType) -> bool {
        match self {
            PolicyTarget::All => true,
            PolicyTarget::System(target) => *target == system,
        }
    }
}

/// Operator-facing severity of a policy firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicySeverity {
    /// Informational; routine automation.
    Info,
    /// Degradation worth watching.
    Warning,
    /// Requires operator attention.
    Critical,
}

/// Remediation performed when a policy's condition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyAction {
    /// Drive a reconnect through the system's connector.
    ForceReconnect,
    /// Force the circuit breaker open and halt calls.
    OpenCircuit,
    /// Force the circuit breaker closed and begin recovery probing.
    CloseCircuit,
    /// Raise an operator-facing alert event.
    EmitAlert,
    /// Mark the system degraded without further intervention.
    MarkDegraded,
    /// Match and record, but do nothing.
    NoAction,
}

/// One declarative remediation rule.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Store key.
    pub id: String,
    /// Operator-facing name, unique per deployment by convention.
    pub name: String,
    /// Systems this policy covers.
    pub target: PolicyTarget,
    /// Condition over the system's live state.
    pub condition: PolicyCondition,
    /// Remediation to perform when the condition holds.
    pub action: PolicyAction,
    /// Severity attached to executions of this policy.
    pub severity: PolicySeverity,
    /// Minimum time between two executions of this policy.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "cooldown_seconds")]
    pub cooldown: Duration,
    /// Disabled policies are never evaluated.
    pub enabled: bool,
    /// Free-form operator description.
    pub description: String,
    /// When the policy was created.
    pub created_at: DateTime<Utc>,
    /// When the policy was last changed.
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency version, managed by the store.
    pub version: u64,
}

impl Policy {
    /// Build an enabled policy with a fresh id.
    pub fn new(
        name: impl Into<String>,
        target: PolicyTarget,
        condition: PolicyCondition,
        action: PolicyAction,
        severity: PolicySeverity,
        cooldown: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            target,
            condition,
            action,
            severity,
            cooldown,
            enabled: true,
            description: String::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Attach an operator description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Build the policy disabled; an operator must enable it explicitly.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl Document for Policy {
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
