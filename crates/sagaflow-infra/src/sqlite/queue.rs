//! SQLite step trigger queue.
//!
//! At-least-once delivery with claim-based visibility. A claim is a
//! conditional UPDATE on the single-writer pool, so two workers can never
//! claim the same row; a worker that dies mid-claim loses the row back to
//! pending when its claim expiry lapses.

use chrono::Utc;
use sagaflow_core::repository::{ClaimedMessage, StepQueue};
use sagaflow_types::error::QueueError;
use sagaflow_types::execution::StepTriggerMessage;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `StepQueue`.
#[derive(Clone)]
pub struct SqliteStepQueue {
    pool: DatabasePool,
    visibility_timeout_ms: u64,
}

impl SqliteStepQueue {
    pub fn new(pool: DatabasePool, visibility_timeout_ms: u64) -> Self {
        Self {
            pool,
            visibility_timeout_ms,
        }
    }

    /// Return expired claims to pending. Runs at the start of every claim
    /// attempt, so redelivery needs no background sweeper.
    async fn release_expired_claims(&self, now_ms: i64) -> Result<(), QueueError> {
        sqlx::query(
            r#"UPDATE queue_messages
               SET status = 'pending', owner = NULL, claim_expires_at_epoch_ms = NULL
               WHERE status = 'claimed' AND claim_expires_at_epoch_ms <= ?"#,
        )
        .bind(now_ms)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(())
    }
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StepTriggerMessage, QueueError> {
    let execution_id: String = row
        .try_get("execution_id")
        .map_err(|e| QueueError::Backend(e.to_string()))?;
    Ok(StepTriggerMessage {
        execution_id: Uuid::parse_str(&execution_id)
            .map_err(|e| QueueError::Malformed(format!("invalid execution_id: {e}")))?,
        step_index: row
            .try_get::<i64, _>("step_index")
            .map_err(|e| QueueError::Backend(e.to_string()))? as u32,
        attempt_count: row
            .try_get::<i64, _>("attempt_count")
            .map_err(|e| QueueError::Backend(e.to_string()))? as u32,
        max_attempts: row
            .try_get::<i64, _>("max_attempts")
            .map_err(|e| QueueError::Backend(e.to_string()))? as u32,
        trace_id: row
            .try_get("trace_id")
            .map_err(|e| QueueError::Backend(e.to_string()))?,
    })
}

impl StepQueue for SqliteStepQueue {
    async fn enqueue(
        &self,
        message: &StepTriggerMessage,
        delay_ms: u64,
    ) -> Result<(), QueueError> {
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO queue_messages
               (id, execution_id, step_index, attempt_count, max_attempts, trace_id,
                status, owner, available_at_epoch_ms, created_at)
               VALUES (?, ?, ?, ?, ?, ?, 'pending', NULL, ?, ?)"#,
        )
        .bind(Uuid::now_v7().to_string())
        .bind(message.execution_id.to_string())
        .bind(message.step_index as i64)
        .bind(message.attempt_count as i64)
        .bind(message.max_attempts as i64)
        .bind(&message.trace_id)
        .bind(now.timestamp_millis() + delay_ms as i64)
        .bind(now.to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn claim_next(&self, owner: &str) -> Result<Option<ClaimedMessage>, QueueError> {
        let now_ms = Utc::now().timestamp_millis();
        self.release_expired_claims(now_ms).await?;

        let candidate = sqlx::query(
            r#"SELECT id FROM queue_messages
               WHERE status = 'pending' AND owner IS NULL AND available_at_epoch_ms <= ?
               ORDER BY available_at_epoch_ms, created_at
               LIMIT 1"#,
        )
        .bind(now_ms)
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?;

        let Some(candidate) = candidate else {
            return Ok(None);
        };
        let id: String = candidate
            .try_get("id")
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        // Conditional claim; a concurrent worker claiming the same row makes
        // this a no-op and we simply report an idle pass.
        let claimed = sqlx::query(
            r#"UPDATE queue_messages
               SET status = 'claimed', owner = ?, claim_expires_at_epoch_ms = ?
               WHERE id = ? AND status = 'pending' AND owner IS NULL"#,
        )
        .bind(owner)
        .bind(now_ms + self.visibility_timeout_ms as i64)
        .bind(&id)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?;

        if claimed.rows_affected() != 1 {
            return Ok(None);
        }

        let row = sqlx::query("SELECT * FROM queue_messages WHERE id = ?")
            .bind(&id)
            .fetch_one(&self.pool.writer)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        Ok(Some(ClaimedMessage {
            id: Uuid::parse_str(&id)
                .map_err(|e| QueueError::Malformed(format!("invalid message id: {e}")))?,
            message: message_from_row(&row)?,
        }))
    }

    async fn ack(&self, id: &Uuid) -> Result<(), QueueError> {
        sqlx::query("UPDATE queue_messages SET status = 'done', owner = NULL WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn nack(&self, id: &Uuid, delay_ms: u64) -> Result<(), QueueError> {
        sqlx::query(
            r#"UPDATE queue_messages
               SET status = 'pending', owner = NULL, claim_expires_at_epoch_ms = NULL,
                   available_at_epoch_ms = ?
               WHERE id = ?"#,
        )
        .bind(Utc::now().timestamp_millis() + delay_ms as i64)
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64, QueueError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM queue_messages WHERE status = 'pending'")
                .fetch_one(&self.pool.reader)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(count as u64)
    }
}
