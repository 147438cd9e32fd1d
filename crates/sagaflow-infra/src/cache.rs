//! In-process read cache fed by the outbox relay.
//!
//! DashMap-backed, last-writer-wins on the payload timestamp. Reads are
//! eventually consistent with the durable store; the authoritative record
//! is always the execution state row.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sagaflow_core::repository::CacheStore;
use sagaflow_types::error::RepositoryError;

/// In-memory implementation of `CacheStore`.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, (serde_json::Value, DateTime<Utc>)>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryCacheStore {
    async fn apply(
        &self,
        key: &str,
        value: &serde_json::Value,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert((value.clone(), updated_at));
                Ok(true)
            }
            dashmap::mapref::entry::Entry::Occupied(mut e) => {
                if updated_at > e.get().1 {
                    e.insert((value.clone(), updated_at));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        Ok(self.entries.get(key).map(|e| e.value().0.clone()))
    }
}
