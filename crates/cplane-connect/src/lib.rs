//! ---
//! cp_section: "01-core-runtime"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Connector seams and simulated connectors."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Connector interfaces for the managed external systems.
//!
//! Real connectors (database drivers, cache clients, messaging producers)
//! live outside the control plane; this crate defines the seam they plug
//! into, the registry that wires one connector per [`SystemType`], and the
//! simulated connector used in simulation mode and tests.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use cplane_common::SystemType;

pub mod hooks;
pub mod sim;

pub use hooks::{InducedFailure, InjectionHooks};
pub use sim::SimulatedConnector;

/// Seam implemented by each per-system connector.
///
/// All operations are blocking network I/O from the control plane's point of
/// view and must carry their own timeouts; callers never hold a state lock
/// across them.
#[async_trait]
pub trait SystemConnector: Send + Sync {
    /// System this connector serves.
    fn system_type(&self) -> SystemType;

    /// Establish the connection.
    async fn connect(&self) -> Result<()>;

    /// Tear the connection down.
    async fn disconnect(&self);

    /// Attempt to re-establish the connection. Returns whether the
    /// connection is usable afterwards.
    async fn reconnect(&self) -> Result<bool>;

    /// Whether the connection is currently believed usable.
    fn is_connected(&self) -> bool;
}

/// Immutable mapping from system type to its connector, wired at
/// construction time.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<SystemType, Arc<dyn SystemConnector>>,
}

impl ConnectorRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector for its system type, replacing any previous one.
    pub fn with(mut self, connector: Arc<dyn SystemConnector>) -> Self {
        self.connectors.insert(connector.system_type(), connector);
        self
    }

    /// Look up the connector for a system.
    pub fn get(&self, system: SystemType) -> Option<Arc<dyn SystemConnector>> {
        self.connectors.get(&system).cloned()
    }

    /// All registered system types.
    pub fn systems(&self) -> Vec<SystemType> {
        self.connectors.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_wires_one_connector_per_system() {
        let registry = ConnectorRegistry::new()
            .with(Arc::new(SimulatedConnector::new(SystemType::Mysql)))
            .with(Arc::new(SimulatedConnector::new(SystemType::Redis)));

        assert!(registry.get(SystemType::Mysql).is_some());
        assert!(registry.get(SystemType::Kafka).is_none());

        let mysql = registry.get(SystemType::Mysql).unwrap();
        assert_eq!(mysql.system_type(), SystemType::Mysql);
        mysql.connect().await.unwrap();
        assert!(mysql.is_connected());
    }
}
