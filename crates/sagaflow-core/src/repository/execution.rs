//! Execution state store trait.

use sagaflow_types::error::RepositoryError;
use sagaflow_types::execution::ExecutionState;
use sagaflow_types::outbox::OutboxEvent;
use uuid::Uuid;

/// Durable store for execution states.
///
/// `save` optionally writes an outbox event in the same transaction as the
/// state upsert. That atomicity is the whole point of the outbox pattern:
/// the state change and the cache-update intent either both persist or
/// neither does.
pub trait ExecutionStateStore: Send + Sync {
    /// Upsert the state under `exec:<id>` with a TTL, optionally recording
    /// an outbox event atomically alongside it.
    fn save(
        &self,
        state: &ExecutionState,
        ttl_seconds: u64,
        outbox: Option<&OutboxEvent>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load a state by execution id. `None` when absent or expired.
    fn load(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ExecutionState>, RepositoryError>> + Send;

    /// List the most recent states, newest first.
    fn list_recent(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionState>, RepositoryError>> + Send;
}
