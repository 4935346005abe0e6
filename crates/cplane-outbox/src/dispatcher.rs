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
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use cplane_common::config::OutboxConfig;
use cplane_metrics::OutboxMetrics;
use cplane_store::{Collection, StoreError};

use crate::{EventPublisher, OutboxEntry, OutboxError, OutboxStatus, Result};

/// Backlog counts per status, exposed for operators.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OutboxStats {
    /// Entries waiting for dispatch.
    pub pending: usize,
    /// Entries claimed by a running cycle.
    pub processing: usize,
    /// Entries delivered downstream.
    pub delivered: usize,
    /// Entries parked in the dead-letter queue.
    pub dead_letter: usize,
}

/// Read side of the outbox: polls due entries and ships them downstream.
///
/// Each entry is claimed with a compare-and-swap from Pending to Processing,
/// so concurrent dispatchers contend on the version and at most one wins.
pub struct OutboxDispatcher {
    entries: Arc<Collection<OutboxEntry>>,
    publisher: Arc<dyn EventPublisher>,
    config: OutboxConfig,
    metrics: Option<OutboxMetrics>,
}

impl OutboxDispatcher {
    /// Build a dispatcher over the shared entry collection.
    pub fn new(
        entries: Arc<Collection<OutboxEntry>>,
        publisher: Arc<dyn EventPublisher>,
        config: OutboxConfig,
        metrics: Option<OutboxMetrics>,
    ) -> Self {
        Self {
            entries,
            publisher,
            config,
            metrics,
        }
    }

    /// Dispatch loop. Runs one cycle per poll interval until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        info!(
            poll_interval = ?self.config.poll_interval,
            batch_size = self.config.batch_size,
            "outbox dispatcher started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.dispatch_cycle().await;
                }
                _ = shutdown.recv() => {
                    info!("outbox dispatcher stopping");
                    return;
                }
            }
        }
    }

    /// One full dispatch cycle: reclaim orphans, then deliver due entries
    /// oldest-first up to the batch size.
    pub async fn dispatch_cycle(&self) {
        let reclaimed = self.reset_stale_processing();
        if reclaimed > 0 {
            warn!(count = reclaimed, "reset orphaned processing entries");
            if let Some(metrics) = &self.metrics {
                metrics.record_stale_resets(reclaimed);
            }
        }

        let now = Utc::now();
        let mut due = self.entries.find(|entry| entry.is_due(now));
        due.sort_by_key(|entry| entry.created_at);
        due.truncate(self.config.batch_size);

        for entry in due {
            let Some(claimed) = self.claim(entry) else {
                continue;
            };
            self.deliver(claimed).await;
        }

        if let Some(metrics) = &self.metrics {
            let stats = self.stats();
            metrics.set_backlog(
                stats.pending as i64,
                stats.processing as i64,
                stats.dead_letter as i64,
            );
        }
    }

    /// Claim one entry Pending -> Processing. A version conflict means
    /// another dispatcher got there first.
    fn claim(&self, mut entry: OutboxEntry) -> Option<OutboxEntry> {
        entry.status = OutboxStatus::Processing;
        entry.processing_since = Some(Utc::now());
        match self.entries.update(entry) {
            Ok(claimed) => Some(claimed),
            Err(StoreError::VersionConflict { key, .. }) => {
                debug!(entry_id = %key, "entry claimed elsewhere, skipping");
                None
            }
            Err(err) => {
                error!(error = %err, "failed to claim outbox entry");
                None
            }
        }
    }

    async fn deliver(&self, mut entry: OutboxEntry) {
        let started = Instant::now();
        match self.publisher.publish(&entry.event).await {
            Ok(()) => {
                entry.status = OutboxStatus::Delivered;
                entry.processing_since = None;
                entry.last_error = None;
                entry.delivered_at = Some(Utc::now());
                if let Err(err) = self.entries.update(entry.clone()) {
                    error!(entry_id = %entry.id, error = %err, "failed to mark entry delivered");
                    return;
                }
                debug!(
                    entry_id = %entry.id,
                    event_id = %entry.event.event_id,
                    "event delivered"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_delivered(started.elapsed().as_secs_f64());
                }
            }
            Err(err) => self.record_failure(entry, err.to_string()),
        }
    }

    fn record_failure(&self, mut entry: OutboxEntry, reason: String) {
        entry.retry_count += 1;
        entry.processing_since = None;
        entry.last_error = Some(reason.clone());
        if entry.retry_count >= self.config.max_retries {
            entry.status = OutboxStatus::DeadLetter;
            entry.next_attempt_at = None;
            warn!(
                entry_id = %entry.id,
                event_id = %entry.event.event_id,
                retries = entry.retry_count,
                error = %reason,
                "entry moved to dead-letter queue"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_dead_lettered();
            }
        } else {
            let delay = self.backoff_delay(entry.retry_count);
            entry.status = OutboxStatus::Pending;
            entry.next_attempt_at = Some(Utc::now() + delay);
            warn!(
                entry_id = %entry.id,
                retry_count = entry.retry_count,
                delay_ms = delay.num_milliseconds(),
                error = %reason,
                "delivery failed, scheduling retry"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_retry();
            }
        }
        if let Err(err) = self.entries.update(entry) {
            error!(error = %err, "failed to record delivery failure");
        }
    }

    /// Exponential backoff: base doubled per prior failure, capped at the
    /// configured maximum.
    fn backoff_delay(&self, retry_count: u32) -> ChronoDuration {
        let base_ms = self.config.base_backoff.as_millis() as u64;
        let max_ms = self.config.max_backoff.as_millis() as u64;
        let exp = retry_count.saturating_sub(1).min(20);
        let delay_ms = base_ms.saturating_mul(1 << exp).min(max_ms);
        ChronoDuration::milliseconds(delay_ms as i64)
    }

    /// Return Processing entries whose claim outlived the stale window to
    /// Pending, preserving their retry count.
    fn reset_stale_processing(&self) -> u64 {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(self.config.stale_after)
                .unwrap_or_else(|_| ChronoDuration::seconds(300));
        let stale = self.entries.find(|entry| {
            entry.status == OutboxStatus::Processing
                && entry.processing_since.is_some_and(|since| since < cutoff)
        });
        let mut reclaimed = 0;
        for mut entry in stale {
            entry.status = OutboxStatus::Pending;
            entry.processing_since = None;
            // A conflict means the claim owner finished after all.
            if self.entries.update(entry).is_ok() {
                reclaimed += 1;
            }
        }
        reclaimed
    }

    /// Move one dead-lettered entry back to Pending for immediate redelivery.
    pub fn retry_dlq_entry(&self, entry_id: &str) -> Result<OutboxEntry> {
        let mut entry = self
            .entries
            .get(entry_id)
            .ok_or_else(|| OutboxError::EntryNotFound(entry_id.to_owned()))?;
        if entry.status != OutboxStatus::DeadLetter {
            return Err(OutboxError::NotDeadLettered(
                entry_id.to_owned(),
                entry.status.to_string(),
            ));
        }
        entry.status = OutboxStatus::Pending;
        entry.retry_count = 0;
        entry.next_attempt_at = None;
        entry.last_error = None;
        let updated = self.entries.update(entry)?;
        info!(entry_id = %entry_id, "dead-lettered entry requeued");
        Ok(updated)
    }

    /// Current backlog counts per status.
    pub fn stats(&self) -> OutboxStats {
        let mut stats = OutboxStats::default();
        for entry in self.entries.all() {
            match entry.status {
                OutboxStatus::Pending => stats.pending += 1,
                OutboxStatus::Processing => stats.processing += 1,
                OutboxStatus::Delivered => stats.delivered += 1,
                OutboxStatus::DeadLetter => stats.dead_letter += 1,
            }
        }
        stats
    }
}
