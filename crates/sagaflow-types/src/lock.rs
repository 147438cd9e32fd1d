//! Distributed step-lock record types.
//!
//! A lock is created with an atomic set-if-absent, proven by owner-token
//! equality (never by caller identity), and destroyed on owner-checked
//! release or TTL expiry. Locks whose age exceeds `ttl + grace` are treated
//! as abandoned and reclaimed lazily on the next acquisition attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for a held step lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Full lock key, e.g. `exec:<id>:step:<n>:lock`.
    pub lock_key: String,
    /// Opaque owner token generated at acquisition.
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    /// What the holder is doing (e.g. "step", "compensation").
    pub operation: String,
    pub trace_id: String,
}

impl LockRecord {
    /// Age of the lock in whole seconds (0 for future-dated clocks).
    pub fn age_seconds(&self, now: DateTime<Utc>) -> u64 {
        (now - self.acquired_at).num_seconds().max(0) as u64
    }

    /// Whether the lock's recorded age exceeds its own TTL.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.age_seconds(now) > self.ttl_seconds
    }

    /// Whether the lock is past `ttl + grace` and may be forcibly reclaimed.
    pub fn is_abandoned(&self, now: DateTime<Utc>, grace_seconds: u64) -> bool {
        self.age_seconds(now) > self.ttl_seconds + grace_seconds
    }
}

/// Outcome of an acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquisition {
    /// The lock was acquired; the token proves ownership for release/extend.
    Acquired { owner_token: String },
    /// Another holder owns the key (or an identical step already completed).
    Held,
}

impl LockAcquisition {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockAcquisition::Acquired { .. })
    }
}
