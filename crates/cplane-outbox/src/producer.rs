//! ---
//! cp_section: "06-event-outbox"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Staged event delivery with retries and a dead-letter queue."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use std::sync::Arc;

use tracing::{debug, warn};

use cplane_common::FailureEvent;
use cplane_metrics::OutboxMetrics;
use cplane_store::{Collection, StoreError};

use crate::{OutboxEntry, OutboxError, Result};

/// Write side of the outbox.
///
/// Staging is idempotent on `event_id`: the uniqueness guard runs under the
/// collection's write lock, so two producers racing on the same event id
/// cannot both stage it.
pub struct OutboxProducer {
    entries: Arc<Collection<OutboxEntry>>,
    metrics: Option<OutboxMetrics>,
}

impl OutboxProducer {
    /// Build a producer over the shared entry collection.
    pub fn new(entries: Arc<Collection<OutboxEntry>>, metrics: Option<OutboxMetrics>) -> Self {
        Self { entries, metrics }
    }

    /// Stage `event` for asynchronous delivery.
    ///
    /// Returns [`OutboxError::DuplicateEvent`] when an entry with the same
    /// event id already exists, in any status.
    pub fn stage(&self, event: FailureEvent) -> Result<OutboxEntry> {
        let event_id = event.event_id.clone();
        let entry = OutboxEntry::stage(event);
        match self
            .entries
            .insert_unique(entry, |existing| existing.event.event_id == event_id)
        {
            Ok(stored) => {
                debug!(
                    entry_id = %stored.id,
                    event_id = %event_id,
                    event_type = %stored.event.event_type,
                    system = %stored.event.system,
                    "event staged for dispatch"
                );
                Ok(stored)
            }
            Err(StoreError::AlreadyExists(_)) => {
                warn!(event_id = %event_id, "duplicate event id rejected");
                if let Some(metrics) = &self.metrics {
                    metrics.record_duplicate();
                }
                Err(OutboxError::DuplicateEvent(event_id))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use cplane_common::{EventType, SystemType};

    use super::*;

    fn producer() -> (OutboxProducer, Arc<Collection<OutboxEntry>>) {
        let entries = Arc::new(Collection::new("outbox"));
        (OutboxProducer::new(entries.clone(), None), entries)
    }

    #[test]
    fn staging_persists_a_pending_entry() {
        let (producer, entries) = producer();
        let event = FailureEvent::create(EventType::ConnectionLost, SystemType::Mysql, "gone");
        let staged = producer.stage(event).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(staged.version, 1);
    }

    #[test]
    fn same_event_id_is_staged_once() {
        let (producer, entries) = producer();
        let event = FailureEvent::with_event_id(
            "evt-1",
            EventType::CircuitBreakerOpened,
            SystemType::Kafka,
            "breaker opened",
        );
        producer.stage(event.clone()).unwrap();
        let err = producer.stage(event).unwrap_err();
        assert!(matches!(err, OutboxError::DuplicateEvent(id) if id == "evt-1"));
        assert_eq!(entries.len(), 1);
    }
}
