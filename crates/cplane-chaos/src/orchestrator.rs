//! ---
//! cp_section: "04-chaos-engineering"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Controlled fault injection with experiment lifecycle management."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use cplane_common::SystemType;
use cplane_metrics::ChaosMetrics;
use cplane_store::Collection;

use crate::experiment::{ChaosExperiment, ExperimentSpec, ExperimentStatus, FaultType};
use crate::injector::FaultInjector;
use crate::{ChaosError, Result};

/// Aggregate view over the experiment collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentStats {
    /// Experiments ever created.
    pub total: usize,
    /// Experiments whose fault is currently active.
    pub running: usize,
    /// Experiments that ended normally.
    pub completed: usize,
    /// Experiments whose injection or re-injection failed.
    pub failed: usize,
    /// Experiments abandoned before injection.
    pub cancelled: usize,
    /// Experiment count per targeted system.
    pub by_system: HashMap<SystemType, usize>,
}

type TerminationMap = Arc<Mutex<HashMap<String, JoinHandle<()>>>>;

/// Owns the experiment lifecycle: creation, injection, cancellable
/// auto-termination, manual stop, and restart recovery.
///
/// Every status change is persisted before the orchestrator acts on it, so a
/// restart can always reconstruct which faults are live.
pub struct ChaosOrchestrator {
    experiments: Arc<Collection<ChaosExperiment>>,
    injectors: HashMap<SystemType, Arc<dyn FaultInjector>>,
    terminations: TerminationMap,
    metrics: Option<ChaosMetrics>,
}

impl ChaosOrchestrator {
    /// Build an orchestrator with no injectors wired yet.
    pub fn new(
        experiments: Arc<Collection<ChaosExperiment>>,
        metrics: Option<ChaosMetrics>,
    ) -> Self {
        Self {
            experiments,
            injectors: HashMap::new(),
            terminations: Arc::new(Mutex::new(HashMap::new())),
            metrics,
        }
    }

    /// Wire the injector for its system.
    pub fn with_injector(mut self, injector: Arc<dyn FaultInjector>) -> Self {
        self.injectors.insert(injector.system_type(), injector);
        self
    }

    fn injector(&self, system: SystemType) -> Result<&Arc<dyn FaultInjector>> {
        self.injectors
            .get(&system)
            .ok_or(ChaosError::InjectorMissing(system))
    }

    fn load(&self, id: &str) -> Result<ChaosExperiment> {
        self.experiments
            .get(id)
            .ok_or_else(|| ChaosError::ExperimentNotFound(id.to_owned()))
    }

    /// Validate a spec and persist it as a Created experiment.
    pub fn create_experiment(&self, spec: ExperimentSpec) -> Result<ChaosExperiment> {
        spec.validate()?;
        self.injector(spec.system_type)?;
        let experiment = self.experiments.insert(ChaosExperiment::from_spec(spec))?;
        info!(
            experiment = %experiment.id,
            system = %experiment.system_type,
            fault = %experiment.fault_type,
            "experiment created"
        );
        Ok(experiment)
    }

    /// Inject a Created experiment's fault and schedule auto-termination.
    ///
    /// A failed injection is persisted as a Failed experiment before the
    /// error is returned, so the catalog never claims a fault is live that
    /// was never applied.
    pub async fn start_experiment(&self, id: &str) -> Result<ChaosExperiment> {
        let mut experiment = self.load(id)?;
        if experiment.status != ExperimentStatus::Created {
            return Err(ChaosError::InvalidStatus {
                id: experiment.id,
                status: experiment.status.to_string(),
                expected: ExperimentStatus::Created.to_string(),
            });
        }
        let injector = Arc::clone(self.injector(experiment.system_type)?);

        if let Err(err) = injector.inject(&experiment).await {
            let summary = match &err {
                ChaosError::ProxyUnavailable(detail) => {
                    format!("injection skipped, fault proxy unavailable: {detail}")
                }
                other => format!("injection failed: {other}"),
            };
            error!(experiment = %experiment.id, error = %err, "fault injection failed");
            experiment.mark_ended(ExperimentStatus::Failed, summary);
            let experiment = self.experiments.update(experiment)?;
            record_finished(self.metrics.as_ref(), &experiment);
            return Err(err);
        }

        experiment.mark_running(Utc::now());
        let experiment = self.experiments.update(experiment)?;
        if let Some(metrics) = &self.metrics {
            metrics.record_started(
                &experiment.system_type.to_string(),
                &experiment.fault_type.to_string(),
            );
            metrics.record_injected(
                &experiment.system_type.to_string(),
                &experiment.fault_type.to_string(),
            );
        }
        self.schedule_termination(&experiment, injector);
        Ok(experiment)
    }

    /// Stop an experiment: cancel its timer, revert its fault, persist the
    /// terminal status. Stopping an already ended experiment is a no-op.
    pub async fn stop_experiment(&self, id: &str) -> Result<ChaosExperiment> {
        if let Some(handle) = self.terminations.lock().remove(id) {
            handle.abort();
        }
        let experiment = self.load(id)?;
        match experiment.status {
            status if status.is_ended() => Ok(experiment),
            ExperimentStatus::Created => {
                let mut experiment = experiment;
                experiment.mark_ended(ExperimentStatus::Cancelled, "cancelled before injection");
                let experiment = self.experiments.update(experiment)?;
                record_finished(self.metrics.as_ref(), &experiment);
                Ok(experiment)
            }
            _ => {
                let injector = Arc::clone(self.injector(experiment.system_type)?);
                recover_and_complete(
                    &self.experiments,
                    &injector,
                    self.metrics.as_ref(),
                    experiment,
                )
                .await
            }
        }
    }

    /// Create and immediately start a one-off experiment with default fault
    /// parameters.
    pub async fn quick_inject(
        &self,
        system: SystemType,
        fault_type: FaultType,
        duration_seconds: u64,
    ) -> Result<ChaosExperiment> {
        let spec = ExperimentSpec {
            name: format!("quick-{fault_type}-{system}"),
            system_type: system,
            fault_type,
            duration_seconds,
            latency_ms: 500,
            failure_rate_percent: 50,
            description: "ad-hoc injection".into(),
        };
        let experiment = self.create_experiment(spec)?;
        self.start_experiment(&experiment.id).await
    }

    /// Every experiment, newest first.
    pub fn list(&self) -> Vec<ChaosExperiment> {
        let mut all = self.experiments.all();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Experiments whose fault is currently active.
    pub fn active(&self) -> Vec<ChaosExperiment> {
        self.experiments
            .find(|exp| exp.status == ExperimentStatus::Running)
    }

    /// Aggregate counts over the experiment collection.
    pub fn stats(&self) -> ExperimentStats {
        let mut stats = ExperimentStats::default();
        for experiment in self.experiments.all() {
            stats.total += 1;
            *stats.by_system.entry(experiment.system_type).or_default() += 1;
            match experiment.status {
                ExperimentStatus::Running => stats.running += 1,
                ExperimentStatus::Completed => stats.completed += 1,
                ExperimentStatus::Failed => stats.failed += 1,
                ExperimentStatus::Cancelled => stats.cancelled += 1,
                ExperimentStatus::Created => {}
            }
        }
        stats
    }

    /// Reconcile persisted Running experiments after a restart.
    ///
    /// Experiments whose scheduled end passed during the downtime are closed
    /// out with a best-effort recovery; the rest get their fault re-applied
    /// (in-process faults do not survive a restart) and their termination
    /// timer rescheduled. One misbehaving experiment never blocks the rest.
    pub async fn startup_recovery(&self) -> usize {
        let now = Utc::now();
        let running = self
            .experiments
            .find(|exp| exp.status == ExperimentStatus::Running);
        let mut handled = 0;
        for mut experiment in running {
            handled += 1;
            let injector = match self.injector(experiment.system_type) {
                Ok(injector) => Arc::clone(injector),
                Err(err) => {
                    error!(experiment = %experiment.id, error = %err, "cannot recover experiment");
                    continue;
                }
            };
            let expired = experiment
                .scheduled_end_at
                .map(|end| end <= now)
                .unwrap_or(false);
            if expired {
                if let Err(err) = injector.recover(&experiment).await {
                    warn!(experiment = %experiment.id, error = %err, "best-effort recovery failed");
                }
                experiment.mark_ended(ExperimentStatus::Completed, "expired during restart");
                match self.experiments.update(experiment) {
                    Ok(experiment) => {
                        record_finished(self.metrics.as_ref(), &experiment);
                        info!(experiment = %experiment.id, "expired experiment closed out");
                    }
                    Err(err) => error!(error = %err, "failed to persist expired experiment"),
                }
                continue;
            }

            match injector.inject(&experiment).await {
                Ok(()) => {
                    info!(experiment = %experiment.id, "fault re-applied after restart");
                    self.schedule_termination(&experiment, injector);
                }
                Err(err) => {
                    error!(experiment = %experiment.id, error = %err, "re-injection failed after restart");
                    experiment.mark_ended(
                        ExperimentStatus::Failed,
                        format!("re-injection after restart failed: {err}"),
                    );
                    match self.experiments.update(experiment) {
                        Ok(experiment) => record_finished(self.metrics.as_ref(), &experiment),
                        Err(err) => error!(error = %err, "failed to persist re-injection failure"),
                    }
                }
            }
        }
        handled
    }

    fn schedule_termination(
        &self,
        experiment: &ChaosExperiment,
        injector: Arc<dyn FaultInjector>,
    ) {
        let Some(delay) = experiment.remaining(Utc::now()) else {
            return;
        };
        let experiments = Arc::clone(&self.experiments);
        let terminations = Arc::clone(&self.terminations);
        let metrics = self.metrics.clone();
        let id = experiment.id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            terminations.lock().remove(&id);
            let Some(experiment) = experiments.get(&id) else {
                warn!(experiment = %id, "experiment vanished before auto-termination");
                return;
            };
            if experiment.status.is_ended() {
                return;
            }
            if let Err(err) =
                recover_and_complete(&experiments, &injector, metrics.as_ref(), experiment).await
            {
                error!(experiment = %id, error = %err, "auto-termination failed");
            }
        });
        self.terminations
            .lock()
            .insert(experiment.id.clone(), handle);
    }
}

/// Revert a running experiment's fault and persist it as Completed.
async fn recover_and_complete(
    experiments: &Collection<ChaosExperiment>,
    injector: &Arc<dyn FaultInjector>,
    metrics: Option<&ChaosMetrics>,
    mut experiment: ChaosExperiment,
) -> Result<ChaosExperiment> {
    if let Err(err) = injector.recover(&experiment).await {
        error!(experiment = %experiment.id, error = %err, "fault recovery failed");
        experiment.mark_ended(ExperimentStatus::Failed, format!("recovery failed: {err}"));
        let experiment = experiments.update(experiment)?;
        record_finished(metrics, &experiment);
        return Err(err);
    }
    let active_seconds = experiment
        .started_at
        .map(|started| (Utc::now() - started).num_milliseconds() as f64 / 1000.0)
        .unwrap_or_default();
    experiment.mark_ended(
        ExperimentStatus::Completed,
        format!("fault recovered after {active_seconds:.1}s"),
    );
    let experiment = experiments.update(experiment)?;
    if let Some(metrics) = metrics {
        metrics.record_recovered(
            &experiment.system_type.to_string(),
            &experiment.fault_type.to_string(),
            active_seconds,
        );
    }
    record_finished(metrics, &experiment);
    info!(experiment = %experiment.id, "experiment completed");
    Ok(experiment)
}

fn record_finished(metrics: Option<&ChaosMetrics>, experiment: &ChaosExperiment) {
    if let Some(metrics) = metrics {
        metrics.record_finished(
            &experiment.system_type.to_string(),
            &experiment.fault_type.to_string(),
            &experiment.status.to_string(),
        );
    }
}
