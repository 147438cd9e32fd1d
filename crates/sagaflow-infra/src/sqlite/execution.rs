//! SQLite execution state store.
//!
//! States are stored as JSON documents under `exec:<id>` keys with a TTL.
//! `save` writes the state row and the optional outbox row in one
//! transaction on the single-writer pool.

use chrono::{Duration, Utc};
use sagaflow_core::repository::ExecutionStateStore;
use sagaflow_types::error::RepositoryError;
use sagaflow_types::execution::ExecutionState;
use sagaflow_types::outbox::OutboxEvent;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ExecutionStateStore`.
#[derive(Clone)]
pub struct SqliteExecutionStore {
    pool: DatabasePool,
}

impl SqliteExecutionStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn state_key(execution_id: &Uuid) -> String {
    format!("exec:{execution_id}")
}

impl ExecutionStateStore for SqliteExecutionStore {
    async fn save(
        &self,
        state: &ExecutionState,
        ttl_seconds: u64,
        outbox: Option<&OutboxEvent>,
    ) -> Result<(), RepositoryError> {
        let state_json = serde_json::to_string(state)?;
        let now = Utc::now();
        let expires = now + Duration::seconds(ttl_seconds as i64);

        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO execution_states
               (key, execution_id, status, state, created_at, updated_at, expires_at, expires_at_epoch)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (key) DO UPDATE SET
                   status = excluded.status,
                   state = excluded.state,
                   updated_at = excluded.updated_at,
                   expires_at = excluded.expires_at,
                   expires_at_epoch = excluded.expires_at_epoch"#,
        )
        .bind(state_key(&state.execution_id))
        .bind(state.execution_id.to_string())
        .bind(state.status.to_string())
        .bind(&state_json)
        .bind(state.created_at.to_rfc3339())
        .bind(state.updated_at.to_rfc3339())
        .bind(expires.to_rfc3339())
        .bind(expires.timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if let Some(event) = outbox {
            let payload_json = serde_json::to_string(&event.payload)?;
            sqlx::query(
                r#"INSERT INTO outbox_events (id, cache_key, payload, status, created_at)
                   VALUES (?, ?, ?, 'pending', ?)"#,
            )
            .bind(event.id.to_string())
            .bind(&event.payload.cache_key)
            .bind(&payload_json)
            .bind(event.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn load(
        &self,
        execution_id: &Uuid,
    ) -> Result<Option<ExecutionState>, RepositoryError> {
        let row = sqlx::query(
            "SELECT state FROM execution_states WHERE execution_id = ? AND expires_at_epoch > ?",
        )
        .bind(execution_id.to_string())
        .bind(Utc::now().timestamp())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        match row {
            Some(row) => {
                let state_json: String = row
                    .try_get("state")
                    .map_err(|e| RepositoryError::Database(e.to_string()))?;
                Ok(Some(serde_json::from_str(&state_json)?))
            }
            None => Ok(None),
        }
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<ExecutionState>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT state FROM execution_states WHERE expires_at_epoch > ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(Utc::now().timestamp())
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let mut states = Vec::with_capacity(rows.len());
        for row in &rows {
            let state_json: String = row
                .try_get("state")
                .map_err(|e| RepositoryError::Database(e.to_string()))?;
            states.push(serde_json::from_str(&state_json)?);
        }
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::test_pool;
    use sagaflow_types::execution::ExecutionStatus;
    use sagaflow_types::plan::{Plan, PlanStep, ToolCategory};
    use serde_json::json;

    fn sample_state() -> ExecutionState {
        let plan = Plan {
            id: Uuid::now_v7(),
            steps: vec![PlanStep {
                id: "s0".to_string(),
                tool_name: "lookup".to_string(),
                category: ToolCategory::Query,
                parameters: json!({}),
                requires_confirmation: false,
                risk_score: 0,
                compensation: None,
            }],
        };
        ExecutionState::new(Uuid::now_v7(), plan, "tr-1".to_string(), false)
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let store = SqliteExecutionStore::new(test_pool().await);
        let state = sample_state();

        store.save(&state, 3600, None).await.unwrap();

        let loaded = store.load(&state.execution_id).await.unwrap().unwrap();
        assert_eq!(loaded.execution_id, state.execution_id);
        assert_eq!(loaded.status, ExecutionStatus::Received);
        assert_eq!(loaded.plan.steps[0].tool_name, "lookup");
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let store = SqliteExecutionStore::new(test_pool().await);
        assert!(store.load(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_state_is_invisible() {
        let store = SqliteExecutionStore::new(test_pool().await);
        let state = sample_state();

        store.save(&state, 0, None).await.unwrap();

        // ttl 0 means expires_at == now; the load predicate is strict.
        let loaded = store.load(&state.execution_id).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_save_upserts() {
        let store = SqliteExecutionStore::new(test_pool().await);
        let mut state = sample_state();

        store.save(&state, 3600, None).await.unwrap();
        state.status = ExecutionStatus::Executing;
        state.current_step_index = 1;
        store.save(&state, 3600, None).await.unwrap();

        let loaded = store.load(&state.execution_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Executing);
        assert_eq!(loaded.current_step_index, 1);
    }

    #[tokio::test]
    async fn test_save_with_outbox_is_atomic() {
        let pool = test_pool().await;
        let store = SqliteExecutionStore::new(pool.clone());
        let state = sample_state();

        let event = OutboxEvent::new(
            format!("exec:{}", state.execution_id),
            json!({"status": "RECEIVED"}),
        );
        store.save(&state, 3600, Some(&event)).await.unwrap();

        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM outbox_events WHERE status = 'pending'")
                .fetch_one(&pool.reader)
                .await
                .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_list_recent_orders_newest_first() {
        let store = SqliteExecutionStore::new(test_pool().await);

        let older = sample_state();
        store.save(&older, 3600, None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = sample_state();
        store.save(&newer, 3600, None).await.unwrap();

        let recent = store.list_recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].execution_id, newer.execution_id);

        let limited = store.list_recent(1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
