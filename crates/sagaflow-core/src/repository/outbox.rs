//! Outbox store and read-cache traits.

use chrono::{DateTime, Utc};
use sagaflow_types::error::RepositoryError;
use sagaflow_types::outbox::OutboxEvent;
use uuid::Uuid;

/// Durable store for outbox events.
///
/// Insertion happens through [`super::ExecutionStateStore::save`] so it
/// shares the state's transaction; this trait covers the relay side.
pub trait OutboxStore: Send + Sync {
    /// Fetch pending events, oldest first, up to `limit`.
    fn fetch_pending(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<OutboxEvent>, RepositoryError>> + Send;

    /// Mark an event processed. Rows are retained, never deleted.
    fn mark_processed(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Count events still pending.
    fn count_pending(
        &self,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}

/// Fast read cache fed by the outbox relay.
///
/// Writes are last-writer-wins on the payload's `updated_at`; an out-of-order
/// relay of an older event must not clobber a newer cached value.
pub trait CacheStore: Send + Sync {
    /// Apply a cache write if `updated_at` is newer than what is cached.
    /// Returns whether the write was applied.
    fn apply(
        &self,
        key: &str,
        value: &serde_json::Value,
        updated_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Read a cached value.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<serde_json::Value>, RepositoryError>> + Send;
}

impl<C: CacheStore> CacheStore for std::sync::Arc<C> {
    fn apply(
        &self,
        key: &str,
        value: &serde_json::Value,
        updated_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send {
        self.as_ref().apply(key, value, updated_at)
    }

    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<serde_json::Value>, RepositoryError>> + Send
    {
        self.as_ref().get(key)
    }
}
