//! ---
//! cp_section: "04-chaos-engineering"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Controlled fault injection with experiment lifecycle management."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use cplane_common::SystemType;
use cplane_connect::{InjectionHooks, SystemConnector};
use cplane_state::{StateMachine, SystemState};

use crate::experiment::{ChaosExperiment, FaultType};
use crate::proxy::{FaultProxyClient, Toxic};
use crate::{ChaosError, Result};

/// Applies and reverts one experiment's fault against one system.
#[async_trait]
pub trait FaultInjector: Send + Sync {
    /// System this injector disturbs.
    fn system_type(&self) -> SystemType;

    /// Apply the experiment's fault.
    async fn inject(&self, experiment: &ChaosExperiment) -> Result<()>;

    /// Revert the experiment's fault.
    async fn recover(&self, experiment: &ChaosExperiment) -> Result<()>;
}

/// Injector backed by the network fault proxy, with in-process hooks as the
/// latency fallback and the partial-failure mechanism.
///
/// Network-level faults (connection loss, timeout, partition) exist only
/// through the proxy; when it is unreachable they fail with
/// [`ChaosError::ProxyUnavailable`] instead of degrading to something that
/// would not resemble the declared fault.
pub struct ProxyFaultInjector {
    system: SystemType,
    proxy: Arc<FaultProxyClient>,
    hooks: Arc<InjectionHooks>,
    machine: Arc<StateMachine>,
    connector: Arc<dyn SystemConnector>,
}

impl ProxyFaultInjector {
    /// Build an injector for `system`. The connector is the one the rest of
    /// the control plane uses for that system; recovery reconnects through
    /// it once the network path is repaired.
    pub fn new(
        system: SystemType,
        proxy: Arc<FaultProxyClient>,
        hooks: Arc<InjectionHooks>,
        machine: Arc<StateMachine>,
        connector: Arc<dyn SystemConnector>,
    ) -> Self {
        Self {
            system,
            proxy,
            hooks,
            machine,
            connector,
        }
    }

    async fn require_proxy(&self, fault: FaultType) -> Result<()> {
        if self.proxy.is_available().await {
            Ok(())
        } else {
            Err(ChaosError::ProxyUnavailable(format!(
                "{fault} against {} needs the network proxy at {}",
                self.system,
                self.proxy.base_url()
            )))
        }
    }

    fn toxic_name(experiment: &ChaosExperiment) -> String {
        format!("chaos-{}", experiment.id)
    }

    /// Re-establish the connection through the repaired path. When the
    /// system left Connected during the fault, walk it back through
    /// Connecting; a system that never left Connected only gets the
    /// reconnect.
    async fn restore_connection(&self, experiment: &ChaosExperiment) -> Result<()> {
        let was_connected = self.machine.current_state(self.system) == SystemState::Connected;
        if !was_connected {
            self.machine
                .transition(
                    self.system,
                    SystemState::Connecting,
                    Some(format!("chaos experiment {}: reconnecting", experiment.id)),
                )
                .await;
        }
        match self.connector.reconnect().await {
            Ok(true) => {
                if !was_connected {
                    self.machine
                        .transition(
                            self.system,
                            SystemState::Connected,
                            Some(format!(
                                "chaos experiment {}: connection restored",
                                experiment.id
                            )),
                        )
                        .await;
                }
                Ok(())
            }
            outcome => {
                let detail = match outcome {
                    Err(err) => err.to_string(),
                    _ => "connector reports the connection unusable".to_owned(),
                };
                self.machine
                    .transition(
                        self.system,
                        SystemState::Disconnected,
                        Some(format!(
                            "chaos experiment {}: reconnect failed: {detail}",
                            experiment.id
                        )),
                    )
                    .await;
                Err(ChaosError::RecoveryFailed {
                    system: self.system,
                    detail,
                })
            }
        }
    }
}

#[async_trait]
impl FaultInjector for ProxyFaultInjector {
    fn system_type(&self) -> SystemType {
        self.system
    }

    async fn inject(&self, experiment: &ChaosExperiment) -> Result<()> {
        let proxy_name = self.system.proxy_name();
        match experiment.fault_type {
            FaultType::ConnectionLoss => {
                self.require_proxy(experiment.fault_type).await?;
                self.proxy.set_proxy_enabled(proxy_name, false).await?;
                self.machine
                    .transition(
                        self.system,
                        SystemState::Disconnected,
                        Some(format!("chaos experiment {}: connection loss", experiment.id)),
                    )
                    .await;
            }
            FaultType::LatencyInjection => {
                if self.proxy.is_available().await {
                    let toxic = Toxic::latency(
                        Self::toxic_name(experiment),
                        experiment.latency_ms,
                        experiment.latency_ms / 10,
                    );
                    self.proxy.add_toxic(proxy_name, &toxic).await?;
                } else {
                    warn!(
                        system = %self.system,
                        latency_ms = experiment.latency_ms,
                        "fault proxy unavailable, arming in-process latency instead"
                    );
                    self.hooks.arm_latency(experiment.latency_ms);
                }
            }
            FaultType::PartialFailure => {
                self.hooks
                    .arm_partial_failure(experiment.failure_rate_percent);
            }
            FaultType::Timeout => {
                self.require_proxy(experiment.fault_type).await?;
                let toxic = Toxic::timeout(Self::toxic_name(experiment), 0);
                self.proxy.add_toxic(proxy_name, &toxic).await?;
            }
            FaultType::NetworkPartition => {
                self.require_proxy(experiment.fault_type).await?;
                let toxic = Toxic::reset_peer(Self::toxic_name(experiment), 0);
                self.proxy.add_toxic(proxy_name, &toxic).await?;
            }
        }
        info!(
            system = %self.system,
            fault = %experiment.fault_type,
            experiment = %experiment.id,
            "fault injected"
        );
        Ok(())
    }

    async fn recover(&self, experiment: &ChaosExperiment) -> Result<()> {
        let proxy_name = self.system.proxy_name();
        match experiment.fault_type {
            FaultType::ConnectionLoss => {
                self.proxy.set_proxy_enabled(proxy_name, true).await?;
                self.restore_connection(experiment).await?;
            }
            FaultType::LatencyInjection => {
                // Disarm both paths; whichever one injection used, the other
                // is a no-op (a missing toxic is tolerated).
                self.hooks.disarm_latency();
                if self.proxy.is_available().await {
                    self.proxy
                        .remove_toxic(proxy_name, &Self::toxic_name(experiment))
                        .await?;
                }
            }
            FaultType::PartialFailure => {
                self.hooks.disarm_partial_failure();
            }
            FaultType::Timeout | FaultType::NetworkPartition => {
                self.proxy
                    .remove_toxic(proxy_name, &Self::toxic_name(experiment))
                    .await?;
                self.restore_connection(experiment).await?;
            }
        }
        info!(
            system = %self.system,
            fault = %experiment.fault_type,
            experiment = %experiment.id,
            "fault recovered"
        );
        Ok(())
    }
}
