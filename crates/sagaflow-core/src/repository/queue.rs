//! Step trigger queue trait.

use sagaflow_types::error::QueueError;
use sagaflow_types::execution::StepTriggerMessage;
use uuid::Uuid;

/// A message claimed by a worker, invisible to others until acked, nacked,
/// or the visibility timeout lapses.
#[derive(Debug, Clone)]
pub struct ClaimedMessage {
    pub id: Uuid,
    pub message: StepTriggerMessage,
}

/// At-least-once delivery queue of step trigger messages.
///
/// Delivery may duplicate; the scheduler's idempotency lock makes redelivery
/// harmless. Ordering within one execution follows enqueue order because the
/// scheduler only enqueues step N+1 after step N's state is persisted.
pub trait StepQueue: Send + Sync {
    /// Enqueue a trigger, optionally delayed by `delay_ms`.
    fn enqueue(
        &self,
        message: &StepTriggerMessage,
        delay_ms: u64,
    ) -> impl std::future::Future<Output = Result<(), QueueError>> + Send;

    /// Claim the next available message, or `None` when the queue is idle.
    fn claim_next(
        &self,
        owner: &str,
    ) -> impl std::future::Future<Output = Result<Option<ClaimedMessage>, QueueError>> + Send;

    /// Acknowledge a claimed message as handled.
    fn ack(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), QueueError>> + Send;

    /// Return a claimed message to the queue after `delay_ms`.
    fn nack(
        &self,
        id: &Uuid,
        delay_ms: u64,
    ) -> impl std::future::Future<Output = Result<(), QueueError>> + Send;

    /// Number of messages currently pending (unclaimed).
    fn pending_count(
        &self,
    ) -> impl std::future::Future<Output = Result<u64, QueueError>> + Send;
}
