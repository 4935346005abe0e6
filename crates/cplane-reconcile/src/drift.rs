//! ---
//! cp_section: "03-reconciliation"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Desired-state reconciliation with drift detection and convergence."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use cplane_common::SystemType;
use cplane_state::SystemState;

/// Category of detected drift, in detection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftType {
    /// Current state differs from the desired state.
    StateMismatch,
    /// Observed latency exceeds the declared maximum.
    LatencyExceeded,
    /// Retry count exceeds the declared maximum.
    RetryExceeded,
    /// The circuit breaker is open and auto-recovery is enabled.
    CircuitStuckOpen,
}

/// One detected drift and the action taken on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftRecord {
    /// System that drifted.
    pub system_type: SystemType,
    /// Category of the drift.
    pub drift_type: DriftType,
    /// Declared desired state at detection time.
    pub desired: SystemState,
    /// Observed state at detection time.
    pub actual: SystemState,
    /// When the drift was detected.
    pub detected_at: DateTime<Utc>,
    /// Convergence action taken, e.g. `RECONNECT_ATTEMPTED`.
    pub action: String,
    /// Whether the action restored the desired condition.
    pub resolved: bool,
}

/// Bounded in-memory drift history, newest entries evicting the oldest.
pub struct DriftHistory {
    records: Mutex<VecDeque<DriftRecord>>,
    capacity: usize,
}

impl DriftHistory {
    /// Default capacity of the drift history.
    pub const DEFAULT_CAPACITY: usize = 500;

    /// History bounded at [`Self::DEFAULT_CAPACITY`] records.
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// History bounded at `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a record, evicting the oldest when full.
    pub fn push(&self, record: DriftRecord) {
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Snapshot of the history, oldest first.
    pub fn all(&self) -> Vec<DriftRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Snapshot of the records for one system, oldest first.
    pub fn for_system(&self, system: SystemType) -> Vec<DriftRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.system_type == system)
            .cloned()
            .collect()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl Default for DriftHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: usize) -> DriftRecord {
        DriftRecord {
            system_type: SystemType::Mysql,
            drift_type: DriftType::StateMismatch,
            desired: SystemState::Connected,
            actual: SystemState::Disconnected,
            detected_at: Utc::now(),
            action: format!("action-{n}"),
            resolved: false,
        }
    }

    #[test]
    fn history_evicts_oldest_at_capacity() {
        let history = DriftHistory::with_capacity(3);
        for n in 0..5 {
            history.push(record(n));
        }
        let records = history.all();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].action, "action-2");
        assert_eq!(records[2].action, "action-4");
    }

    #[test]
    fn per_system_view_filters_records() {
        let history = DriftHistory::new();
        history.push(record(0));
        let mut redis = record(1);
        redis.system_type = SystemType::Redis;
        history.push(redis);

        assert_eq!(history.for_system(SystemType::Mysql).len(), 1);
        assert_eq!(history.for_system(SystemType::Redis).len(), 1);
        assert!(history.for_system(SystemType::Kafka).is_empty());
    }
}
