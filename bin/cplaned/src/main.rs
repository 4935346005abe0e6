//! ---
//! cp_section: "01-core-runtime"
//! cp_subsection: "binary"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Binary entrypoint for the C-Plane daemon."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use cplane_chaos::{ChaosOrchestrator, FaultInjector, FaultProxyClient, ProxyFaultInjector};
use cplane_common::config::AppConfig;
use cplane_common::SystemType;
use cplane_connect::{ConnectorRegistry, InjectionHooks, SimulatedConnector};
use cplane_metrics::{
    new_registry, spawn_http_server, ChaosMetrics, OutboxMetrics, PolicyMetrics, ReconcileMetrics,
    StateMetrics,
};
use cplane_outbox::{LoggingPublisher, OutboxDispatcher, OutboxProducer, StateEventHook};
use cplane_policy::{
    ActionExecutor, PolicyEvaluator, PolicyRepository, PolicySweeper, PolicyTransitionHook,
};
use cplane_reconcile::{DesiredStateRepository, DriftHistory, ReconcileEngine};
use cplane_state::{CircuitBreakerRegistry, StateMachine, SystemState};
use cplane_store::Collection;

#[derive(Debug, Parser)]
#[command(author, version, about = "C-Plane daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Emit logs as JSON")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.json_logs {
        cplane_logging::init_json();
    } else {
        cplane_logging::init();
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/cplane.toml"));
    candidates.push(PathBuf::from("configs/cplane.dev.toml"));
    let config = AppConfig::load(&candidates)?;

    run_daemon(config).await
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let registry = new_registry();
    let metrics_server = if config.metrics.enabled {
        Some(spawn_http_server(registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let state_metrics = StateMetrics::new(&registry)?;
    let reconcile_metrics = ReconcileMetrics::new(&registry)?;
    let policy_metrics = PolicyMetrics::new(&registry)?;
    let chaos_metrics = ChaosMetrics::new(&registry)?;
    let outbox_metrics = OutboxMetrics::new(&registry)?;

    // One shared hook set per system so the chaos injectors and the
    // connectors observe the same armed faults.
    let mut hooks_by_system = std::collections::HashMap::new();
    let mut connectors = ConnectorRegistry::new();
    for system in SystemType::ALL {
        let hooks = Arc::new(InjectionHooks::new());
        let connector = Arc::new(SimulatedConnector::with_hooks(system, Arc::clone(&hooks)));
        connectors = connectors.with(connector);
        hooks_by_system.insert(system, hooks);
    }

    let machine = Arc::new(StateMachine::new(Some(state_metrics)));
    let breakers = Arc::new(CircuitBreakerRegistry::new());

    let outbox_entries = Arc::new(Collection::new("outbox_entries"));
    let producer = Arc::new(OutboxProducer::new(
        Arc::clone(&outbox_entries),
        Some(outbox_metrics.clone()),
    ));
    machine.register_hook(Arc::new(StateEventHook::new(Arc::clone(&producer))));

    let policies = Arc::new(Collection::new("policies"));
    let repo = Arc::new(PolicyRepository::new(policies));
    if config.policy.seed_defaults {
        let seeded = repo.seed_defaults()?;
        if seeded > 0 {
            info!(seeded, "default policies seeded (disabled)");
        }
    }
    let executor = Arc::new(ActionExecutor::new(
        Arc::clone(&machine),
        connectors.clone(),
        Arc::clone(&breakers),
        Arc::clone(&producer),
    ));
    let records = Arc::new(Collection::new("execution_records"));
    let evaluator = Arc::new(PolicyEvaluator::new(
        Arc::clone(&machine),
        Arc::clone(&repo),
        executor,
        records,
        Some(policy_metrics.clone()),
    ));
    machine.register_hook(Arc::new(PolicyTransitionHook::new(
        Arc::clone(&evaluator),
        Some(policy_metrics.clone()),
    )));

    let desired = Arc::new(DesiredStateRepository::new(Arc::new(Collection::new(
        "desired_states",
    ))));
    let history = Arc::new(DriftHistory::new());
    let engine = Arc::new(ReconcileEngine::new(
        Arc::clone(&machine),
        connectors.clone(),
        Arc::clone(&breakers),
        desired,
        history,
        config.reconciliation.clone(),
        Some(reconcile_metrics),
    ));

    let proxy = Arc::new(FaultProxyClient::new(&config.chaos)?);
    let mut orchestrator = ChaosOrchestrator::new(
        Arc::new(Collection::new("chaos_experiments")),
        Some(chaos_metrics),
    );
    for system in SystemType::ALL {
        let Some(connector) = connectors.get(system) else {
            warn!(system = %system, "no connector registered; skipping fault injector");
            continue;
        };
        let injector: Arc<dyn FaultInjector> = Arc::new(ProxyFaultInjector::new(
            system,
            Arc::clone(&proxy),
            Arc::clone(&hooks_by_system[&system]),
            Arc::clone(&machine),
            connector,
        ));
        orchestrator = orchestrator.with_injector(injector);
    }
    let orchestrator = Arc::new(orchestrator);

    // Reconcile persisted experiments before any loop can observe their
    // systems; a fault must never outlive its experiment unnoticed.
    let recovered = orchestrator.startup_recovery().await;
    if recovered > 0 {
        info!(recovered, "running experiments reconciled after restart");
    }

    bootstrap_connections(&machine, &connectors).await;

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(
        Arc::clone(&engine).run(shutdown_tx.subscribe()),
    ));

    if config.policy.enabled {
        let sweeper = Arc::new(PolicySweeper::new(
            evaluator,
            repo,
            config.policy.clone(),
            Some(policy_metrics),
        ));
        tasks.push(tokio::spawn(sweeper.run(shutdown_tx.subscribe())));
    } else {
        info!("policy sweep disabled by configuration");
    }

    if config.outbox.enabled {
        let dispatcher = Arc::new(OutboxDispatcher::new(
            outbox_entries,
            Arc::new(LoggingPublisher),
            config.outbox.clone(),
            Some(outbox_metrics),
        ));
        tasks.push(tokio::spawn(dispatcher.run(shutdown_tx.subscribe())));
    } else {
        info!("outbox dispatch disabled by configuration");
    }

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    let _ = shutdown_tx.send(());
    for task in tasks {
        if let Err(err) = task.await {
            warn!(error = %err, "background task aborted");
        }
    }
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

/// Drive every system through its initial connection attempt.
async fn bootstrap_connections(machine: &Arc<StateMachine>, connectors: &ConnectorRegistry) {
    for system in SystemType::ALL {
        let Some(connector) = connectors.get(system) else {
            warn!(system = %system, "no connector registered; leaving in INIT");
            continue;
        };
        machine
            .transition(system, SystemState::Connecting, Some("startup".into()))
            .await;
        match connector.connect().await {
            Ok(()) => {
                machine
                    .transition(
                        system,
                        SystemState::Connected,
                        Some("initial connection established".into()),
                    )
                    .await;
            }
            Err(err) => {
                warn!(system = %system, error = %err, "initial connection failed");
                machine
                    .transition(
                        system,
                        SystemState::Disconnected,
                        Some(format!("initial connection failed: {err}")),
                    )
                    .await;
            }
        }
    }
}
