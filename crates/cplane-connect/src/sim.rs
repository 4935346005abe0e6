//! ---
//! cp_section: "01-core-runtime"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Connector seams and simulated connectors."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use cplane_common::SystemType;

use crate::hooks::InjectionHooks;
use crate::SystemConnector;

/// In-process connector used in simulation mode and tests.
///
/// Tracks a connected flag and a reachability flag. Reachability models the
/// network path: while unreachable (e.g. a chaos experiment disabled the
/// proxy), connect and reconnect fail the way a real driver would.
pub struct SimulatedConnector {
    system: SystemType,
    connected: AtomicBool,
    reachable: AtomicBool,
    reconnect_attempts: AtomicU64,
    hooks: Arc<InjectionHooks>,
}

impl SimulatedConnector {
    /// Build a reachable, disconnected connector.
    pub fn new(system: SystemType) -> Self {
        Self::with_hooks(system, Arc::new(InjectionHooks::new()))
    }

    /// Build a connector sharing the provided injection hooks.
    pub fn with_hooks(system: SystemType, hooks: Arc<InjectionHooks>) -> Self {
        Self {
            system,
            connected: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
            reconnect_attempts: AtomicU64::new(0),
            hooks,
        }
    }

    /// Injection hooks consulted before each simulated call.
    pub fn hooks(&self) -> Arc<InjectionHooks> {
        self.hooks.clone()
    }

    /// Simulate the network path going down or coming back.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
        if !reachable {
            self.connected.store(false, Ordering::SeqCst);
        }
        debug!(system = %self.system, reachable, "simulated reachability changed");
    }

    /// Number of reconnect attempts observed so far.
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SystemConnector for SimulatedConnector {
    fn system_type(&self) -> SystemType {
        self.system
    }

    async fn connect(&self) -> Result<()> {
        self.hooks
            .before_call()
            .await
            .map_err(anyhow::Error::new)?;
        if !self.reachable.load(Ordering::SeqCst) {
            bail!("{} is unreachable", self.system);
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(system = %self.system, "simulated connection established");
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        info!(system = %self.system, "simulated connection dropped");
    }

    async fn reconnect(&self) -> Result<bool> {
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.hooks.before_call().await {
            warn!(system = %self.system, error = %err, "simulated reconnect intercepted");
            return Ok(false);
        }
        if !self.reachable.load(Ordering::SeqCst) {
            warn!(system = %self.system, "simulated reconnect failed: unreachable");
            return Ok(false);
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(system = %self.system, "simulated reconnect succeeded");
        Ok(true)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reconnect_fails_while_unreachable_and_recovers() {
        let connector = SimulatedConnector::new(SystemType::Redis);
        connector.connect().await.unwrap();
        assert!(connector.is_connected());

        connector.set_reachable(false);
        assert!(!connector.is_connected());
        assert!(!connector.reconnect().await.unwrap());

        connector.set_reachable(true);
        assert!(connector.reconnect().await.unwrap());
        assert!(connector.is_connected());
        assert_eq!(connector.reconnect_attempts(), 2);
    }

    #[tokio::test]
    async fn induced_failures_turn_reconnect_into_a_miss() {
        let connector = SimulatedConnector::new(SystemType::Mysql);
        connector.hooks().arm_partial_failure(100);
        assert!(!connector.reconnect().await.unwrap());
        connector.hooks().disarm_partial_failure();
        assert!(connector.reconnect().await.unwrap());
    }
}
