//! ---
//! cp_section: "06-event-outbox"
//! cp_subsection: "module"
//! cp_type: "source"
//! cp_scope: "code"
//! cp_description: "Staged event delivery with retries and a dead-letter queue."
//! cp_version: "v0.1.0-alpha"
//! cp_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cplane_common::FailureEvent;
use cplane_store::Document;

/// Lifecycle of one staged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    /// Waiting for dispatch.
    Pending,
    /// Claimed by a dispatcher cycle.
    Processing,
    /// Delivered downstream.
    Delivered,
    /// Retries exhausted; waiting for operator replay.
    #[serde(rename = "DLQ")]
    #[strum(serialize = "DLQ")]
    DeadLetter,
}

/// One staged event with its delivery bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Store key for this entry.
    pub id: String,
    /// The staged domain event. Its `event_id` is the idempotency key.
    pub event: FailureEvent,
    /// Delivery lifecycle state.
    pub status: OutboxStatus,
    /// Failed delivery attempts so far.
    pub retry_count: u32,
    /// Earliest time the next attempt may run; `None` means immediately.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// When the current Processing claim was taken.
    pub processing_since: Option<DateTime<Utc>>,
    /// Message from the most recent failed attempt.
    pub last_error: Option<String>,
    /// When delivery succeeded.
    pub delivered_at: Option<DateTime<Utc>>,
    /// When the entry was staged.
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency version, managed by the store.
    pub version: u64,
}

impl OutboxEntry {
    /// Stage a fresh entry for `event`.
    pub fn stage(event: FailureEvent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event,
            status: OutboxStatus::Pending,
            retry_count: 0,
            next_attempt_at: None,
            processing_since: None,
            last_error: None,
            delivered_at: None,
            created_at: Utc::now(),
            version: 0,
        }
    }

    /// Whether the entry is pending and its backoff window has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Pending
            && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

impl Document for OutboxEntry {
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

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use cplane_common::{EventType, SystemType};

    use super::*;

    #[test]
    fn freshly_staged_entries_are_due_immediately() {
        let entry = OutboxEntry::stage(FailureEvent::create(
            EventType::ConnectionLost,
            SystemType::Mysql,
            "gone",
        ));
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert!(entry.is_due(Utc::now()));
    }

    #[test]
    fn backoff_window_defers_due_time() {
        let mut entry = OutboxEntry::stage(FailureEvent::create(
            EventType::RetryAttempted,
            SystemType::Redis,
            "retrying",
        ));
        let now = Utc::now();
        entry.next_attempt_at = Some(now + Duration::seconds(30));
        assert!(!entry.is_due(now));
        assert!(entry.is_due(now + Duration::seconds(31)));
    }
}
