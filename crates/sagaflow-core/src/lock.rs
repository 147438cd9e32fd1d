//! Distributed idempotency lock manager.
//!
//! One lock per (execution, step), keyed `exec:<id>:step:<n>:lock`.
//! Acquisition is an atomic set-if-absent in the backing store; ownership is
//! proven by a UUIDv7 token, never by caller identity. A lock whose age
//! exceeds `ttl + grace` is treated as abandoned by a crashed worker and is
//! forcibly reclaimed on the next acquisition attempt.

use chrono::Utc;
use sagaflow_types::error::LockError;
use sagaflow_types::lock::{LockAcquisition, LockRecord};
use uuid::Uuid;

use crate::tracer::ExecutionTracer;
use sagaflow_types::trace::TraceEvent;

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Backing store for locks. SQLite in production, a map in tests.
pub trait LockStore: Send + Sync {
    /// Atomically insert the record if the key is absent or the existing
    /// record has expired. Returns `true` on insert, `false` when a live
    /// holder already owns the key.
    fn try_insert(
        &self,
        record: &LockRecord,
    ) -> impl std::future::Future<Output = Result<bool, LockError>> + Send;

    /// Read a lock record.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<LockRecord>, LockError>> + Send;

    /// Delete the record only if `owner` matches. Returns whether deleted.
    fn remove_if_owner(
        &self,
        key: &str,
        owner: &str,
    ) -> impl std::future::Future<Output = Result<bool, LockError>> + Send;

    /// Unconditionally delete the record (stale reclamation).
    fn force_remove(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<(), LockError>> + Send;

    /// Refresh the TTL window if `owner` matches. Returns whether extended.
    fn update_ttl_if_owner(
        &self,
        key: &str,
        owner: &str,
        ttl_seconds: u64,
    ) -> impl std::future::Future<Output = Result<bool, LockError>> + Send;

    /// List all records whose key starts with `prefix`.
    fn scan(
        &self,
        prefix: &str,
    ) -> impl std::future::Future<Output = Result<Vec<LockRecord>, LockError>> + Send;
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Lock key for a step of an execution.
pub fn step_lock_key(execution_id: &Uuid, step_index: u32) -> String {
    format!("exec:{execution_id}:step:{step_index}:lock")
}

/// Locks matching a key pattern whose recorded age exceeds their TTL.
#[derive(Debug, Clone)]
pub struct DeadlockReport {
    pub pattern: String,
    pub holders: Vec<LockRecord>,
}

/// Acquires, extends, and releases step locks with stale reclamation.
pub struct LockManager<S> {
    store: S,
    ttl_seconds: u64,
    grace_seconds: u64,
    tracer: ExecutionTracer,
}

impl<S: LockStore> LockManager<S> {
    pub fn new(store: S, ttl_seconds: u64, grace_seconds: u64, tracer: ExecutionTracer) -> Self {
        Self {
            store,
            ttl_seconds,
            grace_seconds,
            tracer,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Try to acquire `key`.
    ///
    /// When the key is held, the holder's age decides: within `ttl + grace`
    /// the attempt reports [`LockAcquisition::Held`]; past it the stale
    /// record is forcibly removed and acquisition is retried once.
    pub async fn acquire(
        &self,
        key: &str,
        operation: &str,
        trace_id: &str,
    ) -> Result<LockAcquisition, LockError> {
        let record = self.new_record(key, operation, trace_id);
        if self.store.try_insert(&record).await? {
            return Ok(LockAcquisition::Acquired {
                owner_token: record.owner_id,
            });
        }

        // Contended. Reclaim only if the holder is past ttl + grace.
        if let Some(existing) = self.store.get(key).await? {
            let now = Utc::now();
            if existing.is_abandoned(now, self.grace_seconds) {
                let age = existing.age_seconds(now);
                tracing::warn!(key, age_seconds = age, "reclaiming abandoned lock");
                self.tracer.emit(
                    trace_id,
                    TraceEvent::LockReclaimed {
                        lock_key: key.to_string(),
                        age_seconds: age,
                    },
                );
                self.store.force_remove(key).await?;

                let retry = self.new_record(key, operation, trace_id);
                if self.store.try_insert(&retry).await? {
                    return Ok(LockAcquisition::Acquired {
                        owner_token: retry.owner_id,
                    });
                }
            }
        }

        Ok(LockAcquisition::Held)
    }

    /// Release `key` if `owner_token` still owns it. A lost race (expired
    /// and reclaimed) is not an error.
    pub async fn release(&self, key: &str, owner_token: &str) -> Result<(), LockError> {
        let removed = self.store.remove_if_owner(key, owner_token).await?;
        if !removed {
            tracing::debug!(key, "release skipped, lock no longer owned");
        }
        Ok(())
    }

    /// Extend the TTL of a held lock for a long-running step.
    pub async fn extend(&self, key: &str, owner_token: &str) -> Result<bool, LockError> {
        self.store
            .update_ttl_if_owner(key, owner_token, self.ttl_seconds)
            .await
    }

    /// List live locks under a key prefix.
    pub async fn list(&self, prefix: &str) -> Result<Vec<LockRecord>, LockError> {
        self.store.scan(prefix).await
    }

    /// Administrative scan for locks matching `pattern` held past their TTL.
    ///
    /// Reporting only: the engine's ordered, per-execution locking cannot
    /// deadlock by construction, and recovery stays lazy-on-acquire. A stale
    /// holder here means a worker died (or wedged) mid-step and nothing has
    /// contended for the key since.
    pub async fn detect_deadlocks(&self, pattern: &str) -> Result<Option<DeadlockReport>, LockError> {
        let now = Utc::now();
        let holders: Vec<LockRecord> = self
            .store
            .scan(pattern)
            .await?
            .into_iter()
            .filter(|record| record.is_expired(now))
            .collect();
        if holders.is_empty() {
            return Ok(None);
        }
        Ok(Some(DeadlockReport {
            pattern: pattern.to_string(),
            holders,
        }))
    }

    fn new_record(&self, key: &str, operation: &str, trace_id: &str) -> LockRecord {
        LockRecord {
            lock_key: key.to_string(),
            owner_id: Uuid::now_v7().to_string(),
            acquired_at: Utc::now(),
            ttl_seconds: self.ttl_seconds,
            operation: operation.to_string(),
            trace_id: trace_id.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
