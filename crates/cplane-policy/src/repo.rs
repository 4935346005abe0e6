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

use chrono::Utc;
use tracing::info;

use cplane_common::SystemType;
use cplane_state::SystemState;
use cplane_store::{Collection, StoreError};

use crate::condition::PolicyCondition;
use crate::model::{Policy, PolicyAction, PolicySeverity, PolicyTarget};
use crate::Result;

/// Store-backed policy catalog.
pub struct PolicyRepository {
    policies: Arc<Collection<Policy>>,
}

impl PolicyRepository {
    /// Build a repository over the shared policy collection.
    pub fn new(policies: Arc<Collection<Policy>>) -> Self {
        Self { policies }
    }

    /// Persist a new policy.
    pub fn add(&self, policy: Policy) -> Result<Policy> {
        Ok(self.policies.insert(policy)?)
    }

    /// Fetch one policy.
    pub fn get(&self, id: &str) -> Option<Policy> {
        self.policies.get(id)
    }

    /// Replace a policy, stamping `updated_at` and honoring optimistic
    /// concurrency.
    pub fn update(&self, mut policy: Policy) -> Result<Policy> {
        policy.updated_at = Utc::now();
        Ok(self.policies.update(policy)?)
    }

    /// Enable or disable a policy in place.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<Policy> {
        let mut policy = self
            .policies
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        policy.enabled = enabled;
        let updated = self.update(policy)?;
        info!(policy = %updated.name, enabled, "policy toggled");
        Ok(updated)
    }

    /// Delete a policy, returning it when present.
    pub fn remove(&self, id: &str) -> Option<Policy> {
        self.policies.remove(id)
    }

    /// All policies, ordered by name.
    pub fn all(&self) -> Vec<Policy> {
        let mut policies = self.policies.all();
        policies.sort_by(|a, b| a.name.cmp(&b.name));
        policies
    }

    /// Enabled policies covering `system`, ordered by name for deterministic
    /// evaluation.
    pub fn enabled_for(&self, system: SystemType) -> Vec<Policy> {
        let mut matching = self
            .policies
            .find(|policy| policy.enabled && policy.target.matches(system));
        matching.sort_by(|a, b| a.name.cmp(&b.name));
        matching
    }

    /// Seed the built-in baseline policies when the catalog is empty. The
    /// seeds ship disabled; operators opt in per deployment.
    pub fn seed_defaults(&self) -> Result<usize> {
        if !self.policies.is_empty() {
            return Ok(0);
        }
        let defaults = Self::default_policies();
        let count = defaults.len();
        for policy in defaults {
            self.policies.insert(policy)?;
        }
        info!(count, "seeded default policies (disabled)");
        Ok(count)
    }

    /// Baseline remediation rules shipped with the control plane.
    pub fn default_policies() -> Vec<Policy> {
        vec![
            Policy::new(
                "reconnect-on-sustained-disconnect",
                PolicyTarget::All,
                PolicyCondition::state_held(
                    SystemState::Disconnected,
                    Duration::from_secs(30),
                ),
                PolicyAction::ForceReconnect,
                PolicySeverity::Warning,
                Duration::from_secs(120),
            )
            .with_description("Reconnect any system disconnected for 30s or more")
            .disabled(),
            Policy::new(
                "open-circuit-on-degraded-latency",
                PolicyTarget::All,
                PolicyCondition::And {
                    conditions: vec![
                        PolicyCondition::State {
                            state: Some(SystemState::Degraded),
                            duration: Some(Duration::from_secs(60)),
                            retry_count_threshold: None,
                            consecutive_failures_threshold: Some(2),
                        },
                        PolicyCondition::Latency { threshold_ms: 500 },
                    ],
                },
                PolicyAction::OpenCircuit,
                PolicySeverity::Critical,
                Duration::from_secs(300),
            )
            .with_description("Halt calls to a system degraded with sustained high latency")
            .disabled(),
            Policy::new(
                "alert-on-stuck-open-circuit",
                PolicyTarget::All,
                PolicyCondition::state_held(
                    SystemState::CircuitOpen,
                    Duration::from_secs(120),
                ),
                PolicyAction::EmitAlert,
                PolicySeverity::Critical,
                Duration::from_secs(600),
            )
            .with_description("Page when a circuit stays open for two minutes")
            .disabled(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> PolicyRepository {
        PolicyRepository::new(Arc::new(Collection::new("policies")))
    }

    #[test]
    fn seeding_is_idempotent_and_ships_disabled() {
        let repo = repo();
        assert_eq!(repo.seed_defaults().unwrap(), 3);
        assert_eq!(repo.seed_defaults().unwrap(), 0);
        assert_eq!(repo.all().len(), 3);
        assert!(repo.all().iter().all(|policy| !policy.enabled));
        assert!(repo.enabled_for(SystemType::Mysql).is_empty());
    }

    #[test]
    fn toggling_brings_a_seed_into_rotation() {
        let repo = repo();
        repo.seed_defaults().unwrap();
        let seed = &repo.all()[0];
        let enabled = repo.set_enabled(&seed.id, true).unwrap();
        assert!(enabled.enabled);
        assert_eq!(repo.enabled_for(SystemType::Kafka).len(), 1);
    }

    #[test]
    fn enabled_for_filters_by_target_and_flag() {
        let repo = repo();
        let mut kafka_only = Policy::new(
            "kafka-noop",
            PolicyTarget::System(SystemType::Kafka),
            PolicyCondition::Latency { threshold_ms: 1 },
            PolicyAction::NoAction,
            PolicySeverity::Info,
            Duration::from_secs(1),
        );
        repo.add(kafka_only.clone()).unwrap();
        kafka_only.id = "other".into();
        kafka_only.name = "kafka-disabled".into();
        kafka_only.enabled = false;
        repo.add(kafka_only).unwrap();

        assert!(repo.enabled_for(SystemType::Mysql).is_empty());
        let kafka = repo.enabled_for(SystemType::Kafka);
        assert_eq!(kafka.len(), 1);
        assert_eq!(kafka[0].name, "kafka-noop");
    }
}
