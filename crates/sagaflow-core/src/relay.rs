//! Transactional outbox relay.
//!
//! Moves pending outbox events into the read cache, oldest first. Delivery
//! is at-least-once: a crash between the cache write and `mark_processed`
//! redelivers, and the cache's last-writer-wins rule makes the redelivery
//! harmless. Terminal-status cache entries therefore never regress to
//! earlier statuses.

use sagaflow_types::trace::TraceEvent;

use crate::repository::{CacheStore, OutboxStore};
use crate::tracer::ExecutionTracer;

/// Outcome of one relay pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    /// Events marked processed this pass.
    pub relayed: u32,
    /// Events whose cache write was skipped as stale (still marked
    /// processed).
    pub skipped_stale: u32,
}

/// Drains pending outbox events into the cache.
pub struct OutboxRelay<O, C> {
    outbox: O,
    cache: C,
    batch_size: u32,
    tracer: ExecutionTracer,
}

impl<O: OutboxStore, C: CacheStore> OutboxRelay<O, C> {
    pub fn new(outbox: O, cache: C, batch_size: u32, tracer: ExecutionTracer) -> Self {
        Self {
            outbox,
            cache,
            batch_size,
            tracer,
        }
    }

    /// Relay up to one batch of pending events. Returns what happened so
    /// callers can decide whether to run another pass immediately.
    pub async fn run_once(&self) -> Result<RelayReport, sagaflow_types::error::RepositoryError> {
        let pending = self.outbox.fetch_pending(self.batch_size).await?;
        let mut report = RelayReport {
            relayed: 0,
            skipped_stale: 0,
        };

        for event in pending {
            let written = self
                .cache
                .apply(
                    &event.payload.cache_key,
                    &event.payload.value,
                    event.payload.updated_at,
                )
                .await?;
            // Processed either way; a stale event is done, not retryable.
            self.outbox.mark_processed(&event.id).await?;

            if written {
                report.relayed += 1;
            } else {
                report.skipped_stale += 1;
                report.relayed += 1;
            }
            self.tracer.emit(
                "outbox-relay",
                TraceEvent::OutboxRelayed {
                    event_id: event.id,
                    cache_key: event.payload.cache_key.clone(),
                },
            );
        }

        if report.relayed > 0 {
            tracing::debug!(
                relayed = report.relayed,
                skipped_stale = report.skipped_stale,
                "outbox relay pass"
            );
        }
        Ok(report)
    }

    /// Events still waiting for relay.
    pub async fn backlog(&self) -> Result<u64, sagaflow_types::error::RepositoryError> {
        self.outbox.count_pending().await
    }
}
