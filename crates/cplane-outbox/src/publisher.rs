//! ---
//! cp_section: "06-event-outbox"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Staged event delivery with retries and a dead-letter queue."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use async_trait::async_trait;
use tracing::info;

use cplane_common::FailureEvent;

/// Downstream sink for dispatched events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Deliver one event. An error leaves the entry pending for retry.
    async fn publish(&self, event: &FailureEvent) -> anyhow::Result<()>;
}

/// Publisher that emits each event as a structured log line.
///
/// The default sink when no external consumer is wired up.
#[derive(Debug, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl EventPublisher for LoggingPublisher {
    async fn publish(&self, event: &FailureEvent) -> anyhow::Result<()> {
        info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            system = %event.system,
            message = %event.message,
            "event published"
        );
        Ok(())
    }
}
