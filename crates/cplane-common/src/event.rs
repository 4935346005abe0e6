//! ---
//! cp_section: "01-core-runtime"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Shared types, domain events, and configuration."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::system::SystemType;

/// Category of a domain event published by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A system lost its connection.
    ConnectionLost,
    /// A system (re)established its connection.
    ConnectionEstablished,
    /// The circuit breaker opened for a system.
    CircuitBreakerOpened,
    /// The circuit breaker closed again.
    CircuitBreakerClosed,
    /// A reconnection attempt was made.
    RetryAttempted,
    /// A reconnect was driven by automation.
    SystemReconnect,
    /// A policy raised an operator-facing alert.
    SystemAlert,
}

/// Domain event describing a health-relevant occurrence for one system.
///
/// Events are staged in the outbox and shipped downstream asynchronously;
/// `event_id` is the global idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEvent {
    /// Globally unique idempotency key.
    pub event_id: String,
    /// Event category.
    pub event_type: EventType,
    /// System the event refers to.
    pub system: SystemType,
    /// Human-readable summary.
    pub message: String,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

impl FailureEvent {
    /// Create an event with a fresh idempotency key.
    pub fn create(event_type: EventType, system: SystemType, message: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            system,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create an event with a caller-chosen idempotency key.
    pub fn with_event_id(
        event_id: impl Into<String>,
        event_type: EventType,
        system: SystemType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type,
            system,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_assigns_unique_event_ids() {
        let a = FailureEvent::create(EventType::ConnectionLost, SystemType::Mysql, "gone");
        let b = FailureEvent::create(EventType::ConnectionLost, SystemType::Mysql, "gone");
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn event_type_serializes_screaming_snake() {
        let json = serde_json::to_string(&EventType::CircuitBreakerOpened).unwrap();
        assert_eq!(json, "\"CIRCUIT_BREAKER_OPENED\"");
        assert_eq!(EventType::ConnectionLost.to_string(), "CONNECTION_LOST");
    }
}
