//! SQLite outbox store (relay side).
//!
//! Rows are inserted by `SqliteExecutionStore::save` inside the state's
//! transaction; this store fetches pending rows for the relay and flips
//! them to processed. Rows are never deleted.

use chrono::{DateTime, Utc};
use sagaflow_core::repository::OutboxStore;
use sagaflow_types::error::RepositoryError;
use sagaflow_types::outbox::{OutboxEvent, OutboxStatus};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `OutboxStore`.
#[derive(Clone)]
pub struct SqliteOutboxStore {
    pool: DatabasePool,
}

impl SqliteOutboxStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Database(format!("invalid datetime: {e}")))
}

fn event_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<OutboxEvent, RepositoryError> {
    let id: String = row
        .try_get("id")
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
    let payload_json: String = row
        .try_get("payload")
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
    let processed_at: Option<String> = row
        .try_get("processed_at")
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

    Ok(OutboxEvent {
        id: Uuid::parse_str(&id)
            .map_err(|e| RepositoryError::Database(format!("invalid event id: {e}")))?,
        payload: serde_json::from_str(&payload_json)?,
        status: match status.as_str() {
            "processed" => OutboxStatus::Processed,
            _ => OutboxStatus::Pending,
        },
        created_at: parse_datetime(&created_at)?,
        processed_at: processed_at.as_deref().map(parse_datetime).transpose()?,
    })
}

impl OutboxStore for SqliteOutboxStore {
    async fn fetch_pending(&self, limit: u32) -> Result<Vec<OutboxEvent>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM outbox_events
               WHERE status = 'pending'
               ORDER BY created_at, id
               LIMIT ?"#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(event_from_row).collect()
    }

    async fn mark_processed(&self, id: &Uuid) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE outbox_events SET status = 'processed', processed_at = ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn count_pending(&self) -> Result<u64, RepositoryError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM outbox_events WHERE status = 'pending'")
                .fetch_one(&self.pool.reader)
                .await
                .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::test_pool;
    use serde_json::json;

    async fn insert_event(pool: &DatabasePool, event: &OutboxEvent) {
        sqlx::query(
            r#"INSERT INTO outbox_events (id, cache_key, payload, status, created_at)
               VALUES (?, ?, ?, 'pending', ?)"#,
        )
        .bind(event.id.to_string())
        .bind(&event.payload.cache_key)
        .bind(serde_json::to_string(&event.payload).unwrap())
        .bind(event.created_at.to_rfc3339())
        .execute(&pool.writer)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_fetch_pending_oldest_first() {
        let pool = test_pool().await;
        let store = SqliteOutboxStore::new(pool.clone());

        let first = OutboxEvent::new("exec:a", json!({"n": 1}));
        insert_event(&pool, &first).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = OutboxEvent::new("exec:a", json!({"n": 2}));
        insert_event(&pool, &second).await;

        let pending = store.fetch_pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first.id);
        assert_eq!(pending[1].id, second.id);
        assert_eq!(pending[0].payload.value["n"], 1);
    }

    #[tokio::test]
    async fn test_mark_processed_retains_the_row() {
        let pool = test_pool().await;
        let store = SqliteOutboxStore::new(pool.clone());

        let event = OutboxEvent::new("exec:a", json!({}));
        insert_event(&pool, &event).await;
        store.mark_processed(&event.id).await.unwrap();

        assert_eq!(store.count_pending().await.unwrap(), 0);
        assert!(store.fetch_pending(10).await.unwrap().is_empty());

        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM outbox_events")
            .fetch_one(&pool.reader)
            .await
            .unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_fetch_respects_limit() {
        let pool = test_pool().await;
        let store = SqliteOutboxStore::new(pool.clone());
        for i in 0..5 {
            insert_event(&pool, &OutboxEvent::new("exec:a", json!({"i": i}))).await;
        }
        assert_eq!(store.fetch_pending(3).await.unwrap().len(), 3);
        assert_eq!(store.count_pending().await.unwrap(), 5);
    }
}
