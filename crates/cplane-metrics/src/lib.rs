//! ---
//! cp_section: "07-observability"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Metrics collection and export utilities."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
    TEXT_FORMAT,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the control plane.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .context("failed to configure metrics listener as non-blocking")?;
    let listener = TcpListener::from_std(std_listener)
        .context("failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics exporter starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics exporter encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT))],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the state machine.
#[derive(Clone)]
pub struct StateMetrics {
    transitions: IntCounterVec,
    invalid_transitions: IntCounterVec,
}

impl StateMetrics {
    /// Register the state-machine metric family on the shared registry.
    pub fn new(registry: &SharedRegistry) -> Result<Self> {
        let transitions = IntCounterVec::new(
            Opts::new(
                "cplane_state_transitions_total",
                "Count of applied state transitions by system and edge",
            ),
            &["system", "from", "to"],
        )?;
        registry.register(Box::new(transitions.clone()))?;

        let invalid_transitions = IntCounterVec::new(
            Opts::new(
                "cplane_state_invalid_transitions_total",
                "Count of rejected state transitions by system",
            ),
            &["system"],
        )?;
        registry.register(Box::new(invalid_transitions.clone()))?;

        Ok(Self {
            transitions,
            invalid_transitions,
        })
    }

    /// Record an applied transition.
    pub fn record_transition(&self, system: &str, from: &str, to: &str) {
        self.transitions.with_label_values(&[system, from, to]).inc();
    }

    /// Record a rejected transition.
    pub fn record_invalid_transition(&self, system: &str) {
        self.invalid_transitions.with_label_values(&[system]).inc();
    }
}

/// Metrics recorded by the reconciliation engine.
#[derive(Clone)]
pub struct ReconcileMetrics {
    cycles: IntCounter,
    drift_detected: IntCounterVec,
    actions_taken: IntCounterVec,
}

impl ReconcileMetrics {
    /// Register the reconciliation metric family on the shared registry.
    pub fn new(registry: &SharedRegistry) -> Result<Self> {
        let cycles = IntCounter::with_opts(Opts::new(
            "cplane_reconcile_cycles_total",
            "Count of completed reconciliation cycles",
        ))?;
        registry.register(Box::new(cycles.clone()))?;

        let drift_detected = IntCounterVec::new(
            Opts::new(
                "cplane_reconcile_drift_detected_total",
                "Count of detected drift occurrences by system and drift type",
            ),
            &["system", "drift"],
        )?;
        registry.register(Box::new(drift_detected.clone()))?;

        let actions_taken = IntCounterVec::new(
            Opts::new(
                "cplane_reconcile_actions_total",
                "Count of convergence actions by system and action",
            ),
            &["system", "action"],
        )?;
        registry.register(Box::new(actions_taken.clone()))?;

        Ok(Self {
            cycles,
            drift_detected,
            actions_taken,
        })
    }

    /// Record a finished cycle.
    pub fn record_cycle(&self) {
        self.cycles.inc();
    }

    /// Record one detected drift.
    pub fn record_drift(&self, system: &str, drift: &str) {
        self.drift_detected.with_label_values(&[system, drift]).inc();
    }

    /// Record one executed convergence action.
    pub fn record_action(&self, system: &str, action: &str) {
        self.actions_taken.with_label_values(&[system, action]).inc();
    }
}

/// Metrics recorded by the policy engine.
#[derive(Clone)]
pub struct PolicyMetrics {
    executions: IntCounterVec,
    sweep_cycles: IntCounter,
    sweep_failures: IntCounterVec,
    event_triggered: IntCounterVec,
}

impl PolicyMetrics {
    /// Register the policy metric family on the shared registry.
    pub fn new(registry: &SharedRegistry) -> Result<Self> {
        let executions = IntCounterVec::new(
            Opts::new(
                "cplane_policy_executions_total",
                "Count of policy action executions by system, action, and outcome",
            ),
            &["system", "action", "outcome"],
        )?;
        registry.register(Box::new(executions.clone()))?;

        let sweep_cycles = IntCounter::with_opts(Opts::new(
            "cplane_policy_sweep_cycles_total",
            "Count of completed periodic policy sweeps",
        ))?;
        registry.register(Box::new(sweep_cycles.clone()))?;

        let sweep_failures = IntCounterVec::new(
            Opts::new(
                "cplane_policy_sweep_failures_total",
                "Count of per-system evaluation failures during sweeps",
            ),
            &["system"],
        )?;
        registry.register(Box::new(sweep_failures.clone()))?;

        let event_triggered = IntCounterVec::new(
            Opts::new(
                "cplane_policy_event_triggered_total",
                "Count of event-triggered evaluations by system",
            ),
            &["system"],
        )?;
        registry.register(Box::new(event_triggered.clone()))?;

        Ok(Self {
            executions,
            sweep_cycles,
            sweep_failures,
            event_triggered,
        })
    }

    /// Record one policy execution outcome.
    pub fn record_execution(&self, system: &str, action: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.executions
            .with_label_values(&[system, action, outcome])
            .inc();
    }

    /// Record a completed sweep.
    pub fn record_sweep(&self) {
        self.sweep_cycles.inc();
    }

    /// Record a sweep failure for one system.
    pub fn record_sweep_failure(&self, system: &str) {
        self.sweep_failures.with_label_values(&[system]).inc();
    }

    /// Record an event-triggered evaluation.
    pub fn record_event_triggered(&self, system: &str) {
        self.event_triggered.with_label_values(&[system]).inc();
    }
}

/// Metrics recorded by the chaos subsystem.
#[derive(Clone)]
pub struct ChaosMetrics {
    experiments_started: IntCounterVec,
    experiments_finished: IntCounterVec,
    faults_injected: IntCounterVec,
    faults_recovered: IntCounterVec,
    recovery_seconds: Histogram,
}

impl ChaosMetrics {
    /// Register the chaos metric family on the shared registry.
    pub fn new(registry: &SharedRegistry) -> Result<Self> {
        let experiments_started = IntCounterVec::new(
            Opts::new(
                "cplane_chaos_experiments_started_total",
                "Count of started chaos experiments by system and fault type",
            ),
            &["system", "fault"],
        )?;
        registry.register(Box::new(experiments_started.clone()))?;

        let experiments_finished = IntCounterVec::new(
            Opts::new(
                "cplane_chaos_experiments_finished_total",
                "Count of finished chaos experiments by system, fault type, and status",
            ),
            &["system", "fault", "status"],
        )?;
        registry.register(Box::new(experiments_finished.clone()))?;

        let faults_injected = IntCounterVec::new(
            Opts::new(
                "cplane_chaos_faults_injected_total",
                "Count of successfully injected faults",
            ),
            &["system", "fault"],
        )?;
        registry.register(Box::new(faults_injected.clone()))?;

        let faults_recovered = IntCounterVec::new(
            Opts::new(
                "cplane_chaos_faults_recovered_total",
                "Count of successfully reversed faults",
            ),
            &["system", "fault"],
        )?;
        registry.register(Box::new(faults_recovered.clone()))?;

        let buckets = prometheus::exponential_buckets(0.01, 2.0, 14)
            .context("failed to construct histogram buckets")?;
        let recovery_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "cplane_chaos_fault_recovery_seconds",
                "Time between fault injection and recovery",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(recovery_seconds.clone()))?;

        Ok(Self {
            experiments_started,
            experiments_finished,
            faults_injected,
            faults_recovered,
            recovery_seconds,
        })
    }

    /// Record an experiment start.
    pub fn record_started(&self, system: &str, fault: &str) {
        self.experiments_started
            .with_label_values(&[system, fault])
            .inc();
    }

    /// Record an experiment reaching a terminal status.
    pub fn record_finished(&self, system: &str, fault: &str, status: &str) {
        self.experiments_finished
            .with_label_values(&[system, fault, status])
            .inc();
    }

    /// Record a successful injection.
    pub fn record_injected(&self, system: &str, fault: &str) {
        self.faults_injected.with_label_values(&[system, fault]).inc();
    }

    /// Record a successful recovery and its duration since injection.
    pub fn record_recovered(&self, system: &str, fault: &str, seconds: f64) {
        self.faults_recovered
            .with_label_values(&[system, fault])
            .inc();
        self.recovery_seconds.observe(seconds);
    }
}

/// Metrics recorded by the outbox dispatcher.
#[derive(Clone)]
pub struct OutboxMetrics {
    pending: IntGauge,
    processing: IntGauge,
    dlq: IntGauge,
    delivered: IntCounter,
    retries: IntCounter,
    dead_lettered: IntCounter,
    duplicates: IntCounter,
    stale_resets: IntCounter,
    send_seconds: Histogram,
}

impl OutboxMetrics {
    /// Register the outbox metric family on the shared registry.
    pub fn new(registry: &SharedRegistry) -> Result<Self> {
        let pending = IntGauge::with_opts(Opts::new(
            "cplane_outbox_pending",
            "Number of outbox entries waiting for dispatch",
        ))?;
        registry.register(Box::new(pending.clone()))?;

        let processing = IntGauge::with_opts(Opts::new(
            "cplane_outbox_processing",
            "Number of outbox entries currently claimed by a dispatcher",
        ))?;
        registry.register(Box::new(processing.clone()))?;

        let dlq = IntGauge::with_opts(Opts::new(
            "cplane_outbox_dlq",
            "Number of outbox entries in the dead-letter queue",
        ))?;
        registry.register(Box::new(dlq.clone()))?;

        let delivered = IntCounter::with_opts(Opts::new(
            "cplane_outbox_delivered_total",
            "Count of successfully delivered events",
        ))?;
        registry.register(Box::new(delivered.clone()))?;

        let retries = IntCounter::with_opts(Opts::new(
            "cplane_outbox_retries_total",
            "Count of delivery retries scheduled",
        ))?;
        registry.register(Box::new(retries.clone()))?;

        let dead_lettered = IntCounter::with_opts(Opts::new(
            "cplane_outbox_dead_lettered_total",
            "Count of events moved to the dead-letter queue",
        ))?;
        registry.register(Box::new(dead_lettered.clone()))?;

        let duplicates = IntCounter::with_opts(Opts::new(
            "cplane_outbox_duplicates_total",
            "Count of duplicate event submissions suppressed",
        ))?;
        registry.register(Box::new(duplicates.clone()))?;

        let stale_resets = IntCounter::with_opts(Opts::new(
            "cplane_outbox_stale_resets_total",
            "Count of stuck Processing entries reset to Pending",
        ))?;
        registry.register(Box::new(stale_resets.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let send_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "cplane_outbox_send_seconds",
                "Time spent delivering one event downstream",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(send_seconds.clone()))?;

        Ok(Self {
            pending,
            processing,
            dlq,
            delivered,
            retries,
            dead_lettered,
            duplicates,
            stale_resets,
            send_seconds,
        })
    }

    /// Refresh the backlog gauges.
    pub fn set_backlog(&self, pending: i64, processing: i64, dlq: i64) {
        self.pending.set(pending);
        self.processing.set(processing);
        self.dlq.set(dlq);
    }

    /// Record one delivered event and its send duration.
    pub fn record_delivered(&self, seconds: f64) {
        self.delivered.inc();
        self.send_seconds.observe(seconds);
    }

    /// Record a scheduled retry.
    pub fn record_retry(&self) {
        self.retries.inc();
    }

    /// Record a dead-lettered event.
    pub fn record_dead_lettered(&self) {
        self.dead_lettered.inc();
    }

    /// Record a suppressed duplicate submission.
    pub fn record_duplicate(&self) {
        self.duplicates.inc();
    }

    /// Record stale entries reset to Pending.
    pub fn record_stale_resets(&self, count: u64) {
        self.stale_resets.inc_by(count);
    }
}

pub use prometheus;
