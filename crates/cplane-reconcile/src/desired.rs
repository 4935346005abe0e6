//! ---
//! cp_section: "03-reconciliation"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Desired-state reconciliation with drift detection and convergence."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use cplane_common::SystemType;
use cplane_state::SystemState;
use cplane_store::{Collection, Document, StoreError};

use crate::Result;

/// Declared target condition for one system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredSystemState {
    /// System this declaration covers. One declaration per system.
    pub system_type: SystemType,
    /// State the system should converge toward.
    pub desired_state: SystemState,
    /// Latency above which the system is considered drifted.
    pub max_latency_ms: u64,
    /// Retry count above which the system is considered drifted.
    pub max_retry_count: u32,
    /// Whether reconciliation may reset a stuck-open circuit breaker.
    pub auto_recover: bool,
    /// When the declaration was created.
    pub created_at: DateTime<Utc>,
    /// When the declaration was last changed.
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency version, managed by the store.
    pub version: u64,
}

impl DesiredSystemState {
    /// Baseline declaration: Connected, 1000 ms, 3 retries, auto-recover.
    pub fn default_for(system_type: SystemType) -> Self {
        let now = Utc::now();
        Self {
            system_type,
            desired_state: SystemState::Connected,
            max_latency_ms: 1000,
            max_retry_count: 3,
            auto_recover: true,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

impl Document for DesiredSystemState {
    fn key(&self) -> String {
        self.system_type.to_string()
    }
    fn version(&self) -> u64 {
        self.version
    }
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// Store-backed catalog of desired states, one per system.
pub struct DesiredStateRepository {
    states: Arc<Collection<DesiredSystemState>>,
}

impl DesiredStateRepository {
    /// Build a repository over the shared collection.
    pub fn new(states: Arc<Collection<DesiredSystemState>>) -> Self {
        Self { states }
    }

    /// Fetch the declaration for `system`, creating the baseline on first
    /// access.
    pub fn get_or_default(&self, system: SystemType) -> Result<DesiredSystemState> {
        if let Some(existing) = self.states.get(&system.to_string()) {
            return Ok(existing);
        }
        match self.states.insert(DesiredSystemState::default_for(system)) {
            Ok(created) => {
                info!(system = %system, "created default desired state");
                Ok(created)
            }
            // A concurrent reader created it first.
            Err(StoreError::AlreadyExists(_)) => self
                .states
                .get(&system.to_string())
                .ok_or_else(|| StoreError::NotFound(system.to_string()).into()),
            Err(err) => Err(err.into()),
        }
    }

    /// Replace a declaration, stamping `updated_at` and honoring optimistic
    /// concurrency.
    pub fn update(&self, mut desired: DesiredSystemState) -> Result<DesiredSystemState> {
        desired.updated_at = Utc::now();
        Ok(self.states.update(desired)?)
    }

    /// All declarations present in the store.
    pub fn all(&self) -> Vec<DesiredSystemState> {
        self.states.all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_access_creates_the_baseline() {
        let repo = DesiredStateRepository::new(Arc::new(Collection::new("desired")));
        let desired = repo.get_or_default(SystemType::Mysql).unwrap();
        assert_eq!(desired.desired_state, SystemState::Connected);
        assert_eq!(desired.max_latency_ms, 1000);
        assert_eq!(desired.max_retry_count, 3);
        assert!(desired.auto_recover);
        assert_eq!(desired.version, 1);

        // Second access returns the stored declaration, not a new one.
        let again = repo.get_or_default(SystemType::Mysql).unwrap();
        assert_eq!(again.version, 1);
        assert_eq!(repo.all().len(), 1);
    }

    #[test]
    fn updates_bump_version_and_timestamp() {
        let repo = DesiredStateRepository::new(Arc::new(Collection::new("desired")));
        let mut desired = repo.get_or_default(SystemType::Redis).unwrap();
        desired.max_latency_ms = 250;
        let updated = repo.update(desired).unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.max_latency_ms, 250);
        assert!(updated.updated_at >= updated.created_at);
    }
}
