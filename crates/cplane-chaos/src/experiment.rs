//! ---
//! cp_section: "04-chaos-engineering"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Controlled fault injection with experiment lifecycle management."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cplane_common::SystemType;
use cplane_store::Document;

use crate::{ChaosError, Result};

/// Category of injectable fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultType {
    /// Sever the network path entirely.
    ConnectionLoss,
    /// Delay every call by a configured amount.
    LatencyInjection,
    /// Fail a configured percentage of calls.
    PartialFailure,
    /// Hang calls until they time out.
    Timeout,
    /// Reset connections at the network level.
    NetworkPartition,
}

impl FaultType {
    /// Whether this fault can only be induced through the network fault
    /// proxy. Faults in this set fail loudly when the proxy is down.
    pub fn requires_proxy(self) -> bool {
        matches!(
            self,
            FaultType::ConnectionLoss | FaultType::Timeout | FaultType::NetworkPartition
        )
    }
}

/// Lifecycle status of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentStatus {
    /// Persisted, fault not yet applied.
    Created,
    /// Fault is active (or pending recovery).
    Running,
    /// Ended normally, fault reverted.
    Completed,
    /// Injection or re-injection failed.
    Failed,
    /// Abandoned before the fault was applied.
    Cancelled,
}

impl ExperimentStatus {
    /// Whether the experiment has reached a terminal status.
    pub fn is_ended(self) -> bool {
        matches!(
            self,
            ExperimentStatus::Completed | ExperimentStatus::Failed | ExperimentStatus::Cancelled
        )
    }
}

/// Parameters for creating an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSpec {
    /// Operator-facing name.
    pub name: String,
    /// System to disturb.
    pub system_type: SystemType,
    /// Fault to apply.
    pub fault_type: FaultType,
    /// How long the fault runs; 0 means until manually stopped.
    pub duration_seconds: u64,
    /// Injected delay for latency faults.
    #[serde(default)]
    pub latency_ms: u64,
    /// Share of calls failed for partial-failure faults.
    #[serde(default)]
    pub failure_rate_percent: u32,
    /// Free-form operator description.
    #[serde(default)]
    pub description: String,
}

impl ExperimentSpec {
    /// Validate the fault-specific parameters.
    pub fn validate(&self) -> Result<()> {
        match self.fault_type {
            FaultType::LatencyInjection if self.latency_ms == 0 => Err(
                ChaosError::InvalidExperiment("latency injection requires latency_ms > 0".into()),
            ),
            FaultType::PartialFailure
                if self.failure_rate_percent == 0 || self.failure_rate_percent > 100 =>
            {
                Err(ChaosError::InvalidExperiment(
                    "partial failure requires a failure rate between 1 and 100".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// One persisted chaos experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosExperiment {
    /// Store key.
    pub id: String,
    /// Operator-facing name.
    pub name: String,
    /// System being disturbed.
    pub system_type: SystemType,
    /// Fault being applied.
    pub fault_type: FaultType,
    /// How long the fault runs; 0 means until manually stopped.
    pub duration_seconds: u64,
    /// Injected delay for latency faults.
    pub latency_ms: u64,
    /// Share of calls failed for partial-failure faults.
    pub failure_rate_percent: u32,
    /// Lifecycle status.
    pub status: ExperimentStatus,
    /// When the experiment was created.
    pub created_at: DateTime<Utc>,
    /// When the fault was applied.
    pub started_at: Option<DateTime<Utc>>,
    /// When the experiment reached a terminal status.
    pub ended_at: Option<DateTime<Utc>>,
    /// When auto-termination is due; absent for unbounded experiments.
    pub scheduled_end_at: Option<DateTime<Utc>>,
    /// Outcome summary, set on every terminal status.
    pub result: Option<String>,
    /// Free-form operator description.
    pub description: String,
    /// Optimistic-concurrency version, managed by the store.
    pub version: u64,
}

impl ChaosExperiment {
    /// Build a Created experiment from a validated spec.
    pub fn from_spec(spec: ExperimentSpec) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: spec.name,
            system_type: spec.system_type,
            fault_type: spec.fault_type,
            duration_seconds: spec.duration_seconds,
            latency_ms: spec.latency_ms,
            failure_rate_percent: spec.failure_rate_percent,
            status: ExperimentStatus::Created,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            scheduled_end_at: None,
            result: None,
            description: spec.description,
            version: 0,
        }
    }

    /// Mark the experiment running as of `now`, deriving the scheduled end.
    pub(crate) fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = ExperimentStatus::Running;
        self.started_at = Some(now);
        self.scheduled_end_at = if self.duration_seconds > 0 {
            Some(now + Duration::seconds(self.duration_seconds as i64))
        } else {
            None
        };
    }

    /// Mark the experiment ended with `status` and a result summary.
    pub(crate) fn mark_ended(&mut self, status: ExperimentStatus, result: impl Into<String>) {
        self.status = status;
        self.ended_at = Some(Utc::now());
        self.result = Some(result.into());
    }

    /// Time remaining until the scheduled end, if any is still ahead.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        let end = self.scheduled_end_at?;
        (end > now).then(|| (end - now).to_std().unwrap_or_default())
    }
}

impl Document for ChaosExperiment {
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
