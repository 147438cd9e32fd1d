//! Execution tracer.
//!
//! Broadcast channel of [`TraceEntry`] values, one per engine decision,
//! correlated by trace id. Mirrors every entry to `tracing` so the log
//! stream and the per-request trace stay consistent. Publishing with no
//! subscribers is a no-op.

use sagaflow_types::trace::{TraceEntry, TraceEvent};
use tokio::sync::broadcast;

/// Multi-consumer tracer for execution events.
///
/// Cloning shares the underlying channel, allowing multiple producers and
/// consumers.
pub struct ExecutionTracer {
    sender: broadcast::Sender<TraceEntry>,
}

impl ExecutionTracer {
    /// Create a tracer with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future trace entries.
    pub fn subscribe(&self) -> broadcast::Receiver<TraceEntry> {
        self.sender.subscribe()
    }

    /// Emit an event under the given trace id.
    pub fn emit(&self, trace_id: &str, event: TraceEvent) {
        tracing::debug!(trace_id, event = ?event, "trace");
        let _ = self.sender.send(TraceEntry::new(trace_id, event));
    }
}

impl Clone for ExecutionTracer {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for ExecutionTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionTracer")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

/// Drain all buffered entries matching `trace_id` from a subscription.
///
/// Used by the API layer after the synchronous part of a request to collect
/// the trace for the response body.
pub fn drain_matching(
    rx: &mut broadcast::Receiver<TraceEntry>,
    trace_id: &str,
) -> Vec<TraceEntry> {
    let mut entries = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(entry) if entry.trace_id == trace_id => entries.push(entry),
            Ok(_) => continue,
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn emit_and_subscribe_delivers_entry() {
        let tracer = ExecutionTracer::new(16);
        let mut rx = tracer.subscribe();

        tracer.emit(
            "tr-1",
            TraceEvent::ExecutionCompleted {
                execution_id: Uuid::now_v7(),
            },
        );

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.trace_id, "tr-1");
        assert!(matches!(entry.event, TraceEvent::ExecutionCompleted { .. }));
    }

    #[tokio::test]
    async fn emit_with_no_subscribers_does_not_panic() {
        let tracer = ExecutionTracer::new(16);
        tracer.emit(
            "tr-1",
            TraceEvent::ExecutionCancelled {
                execution_id: Uuid::now_v7(),
            },
        );
    }

    #[tokio::test]
    async fn drain_matching_filters_by_trace_id() {
        let tracer = ExecutionTracer::new(16);
        let mut rx = tracer.subscribe();
        let id = Uuid::now_v7();

        tracer.emit("tr-a", TraceEvent::ExecutionCompleted { execution_id: id });
        tracer.emit("tr-b", TraceEvent::ExecutionCancelled { execution_id: id });
        tracer.emit("tr-a", TraceEvent::ExecutionFailed {
            execution_id: id,
            error: "x".to_string(),
        });

        let entries = drain_matching(&mut rx, "tr-a");
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.trace_id == "tr-a"));
    }

    #[tokio::test]
    async fn clone_shares_channel() {
        let tracer = ExecutionTracer::new(16);
        let tracer2 = tracer.clone();
        let mut rx = tracer.subscribe();

        tracer2.emit(
            "tr-1",
            TraceEvent::ExecutionCompleted {
                execution_id: Uuid::now_v7(),
            },
        );
        assert!(rx.try_recv().is_ok());
    }
}
