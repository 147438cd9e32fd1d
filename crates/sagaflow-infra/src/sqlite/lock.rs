//! SQLite lock store.
//!
//! Acquisition is a conditional upsert: the INSERT takes the key when free,
//! and the ON CONFLICT arm steals it only when the existing row has passed
//! its expiry. The single-writer pool serializes the statement, which is
//! what makes "check and take" atomic across workers.

use chrono::{DateTime, Utc};
use sagaflow_core::lock::LockStore;
use sagaflow_types::error::LockError;
use sagaflow_types::lock::LockRecord;
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `LockStore`.
#[derive(Clone)]
pub struct SqliteLockStore {
    pool: DatabasePool,
}

impl SqliteLockStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, LockError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LockError::Backend(format!("invalid datetime: {e}")))
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<LockRecord, LockError> {
    let acquired_at: String = row
        .try_get("acquired_at")
        .map_err(|e| LockError::Backend(e.to_string()))?;
    Ok(LockRecord {
        lock_key: row
            .try_get("key")
            .map_err(|e| LockError::Backend(e.to_string()))?,
        owner_id: row
            .try_get("owner")
            .map_err(|e| LockError::Backend(e.to_string()))?,
        acquired_at: parse_datetime(&acquired_at)?,
        ttl_seconds: row
            .try_get::<i64, _>("ttl_seconds")
            .map_err(|e| LockError::Backend(e.to_string()))? as u64,
        operation: row
            .try_get("operation")
            .map_err(|e| LockError::Backend(e.to_string()))?,
        trace_id: row
            .try_get("trace_id")
            .map_err(|e| LockError::Backend(e.to_string()))?,
    })
}

impl LockStore for SqliteLockStore {
    async fn try_insert(&self, record: &LockRecord) -> Result<bool, LockError> {
        let acquired_epoch = record.acquired_at.timestamp();
        let expires_at_epoch = acquired_epoch + record.ttl_seconds as i64;
        let now_epoch = Utc::now().timestamp();

        let result = sqlx::query(
            r#"INSERT INTO step_locks
               (key, owner, acquired_at, acquired_epoch, expires_at_epoch, ttl_seconds, operation, trace_id)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (key) DO UPDATE SET
                   owner = excluded.owner,
                   acquired_at = excluded.acquired_at,
                   acquired_epoch = excluded.acquired_epoch,
                   expires_at_epoch = excluded.expires_at_epoch,
                   ttl_seconds = excluded.ttl_seconds,
                   operation = excluded.operation,
                   trace_id = excluded.trace_id
               WHERE step_locks.expires_at_epoch <= ?"#,
        )
        .bind(&record.lock_key)
        .bind(&record.owner_id)
        .bind(record.acquired_at.to_rfc3339())
        .bind(acquired_epoch)
        .bind(expires_at_epoch)
        .bind(record.ttl_seconds as i64)
        .bind(&record.operation)
        .bind(&record.trace_id)
        .bind(now_epoch)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| LockError::Backend(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<LockRecord>, LockError> {
        let row = sqlx::query("SELECT * FROM step_locks WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn remove_if_owner(&self, key: &str, owner: &str) -> Result<bool, LockError> {
        let result = sqlx::query("DELETE FROM step_locks WHERE key = ? AND owner = ?")
            .bind(key)
            .bind(owner)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn force_remove(&self, key: &str) -> Result<(), LockError> {
        sqlx::query("DELETE FROM step_locks WHERE key = ?")
            .bind(key)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn update_ttl_if_owner(
        &self,
        key: &str,
        owner: &str,
        ttl_seconds: u64,
    ) -> Result<bool, LockError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"UPDATE step_locks
               SET acquired_at = ?, acquired_epoch = ?, expires_at_epoch = ?, ttl_seconds = ?
               WHERE key = ? AND owner = ?"#,
        )
        .bind(now.to_rfc3339())
        .bind(now.timestamp())
        .bind(now.timestamp() + ttl_seconds as i64)
        .bind(ttl_seconds as i64)
        .bind(key)
        .bind(owner)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<LockRecord>, LockError> {
        let rows = sqlx::query("SELECT * FROM step_locks WHERE key LIKE ? ORDER BY key")
            .bind(format!("{prefix}%"))
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;

        rows.iter().map(record_from_row).collect()
    }
}
