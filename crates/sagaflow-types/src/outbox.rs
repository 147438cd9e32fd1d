//! Transactional outbox event types.
//!
//! An outbox event is written in the same database transaction as the state
//! change it describes, then relayed to the read cache asynchronously.
//! Processed rows are retained for audit, never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Relay status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processed,
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboxStatus::Pending => f.write_str("pending"),
            OutboxStatus::Processed => f.write_str("processed"),
        }
    }
}

/// The cache write an outbox event carries.
///
/// `updated_at` is the authoritative write timestamp; the relay applies
/// last-writer-wins by comparing it against the cached entry's timestamp, so
/// out-of-order relays can never roll a newer value back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxPayload {
    /// Cache key, e.g. `exec:<id>`.
    pub cache_key: String,
    /// Serialized value to place in the cache.
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// One row of the transactional outbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    pub id: Uuid,
    pub payload: OutboxPayload,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// New pending event for a cache write.
    pub fn new(cache_key: impl Into<String>, value: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            payload: OutboxPayload {
                cache_key: cache_key.into(),
                value,
                updated_at: now,
            },
            status: OutboxStatus::Pending,
            created_at: now,
            processed_at: None,
        }
    }
}
