//! Health and introspection endpoints.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use sagaflow_types::breaker::BreakerSnapshot;
use sagaflow_types::lock::LockRecord;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;
use uuid::Uuid;

use crate::http::error::{AppError, ResultExt};
use crate::http::response::ApiResponse;
use crate::state::AppState;

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

pub fn status_routes() -> Router<AppState> {
    Router::new()
        .route("/breakers", get(breakers))
        .route("/locks", get(locks))
}

async fn health(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    use sagaflow_core::repository::StepQueue;
    let queue_depth = state
        .queue
        .pending_count()
        .await
        .map_err(sagaflow_types::error::SchedulerError::from)?;
    let outbox_backlog = state
        .relay
        .backlog()
        .await
        .map_err(sagaflow_types::error::SchedulerError::from)?;
    Ok(Json(json!({
        "status": "ok",
        "queueDepth": queue_depth,
        "outboxBacklog": outbox_backlog,
    })))
}

async fn breakers(
    State(state): State<AppState>,
) -> Result<ApiResponse<Vec<BreakerSnapshot>>, AppError> {
    let started = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    Ok(ApiResponse::success(
        state.scheduler.breakers().snapshots(),
        request_id,
        started,
    ))
}

#[derive(Debug, Deserialize)]
pub struct LockQuery {
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "exec:".to_string()
}

async fn locks(
    State(state): State<AppState>,
    Query(query): Query<LockQuery>,
) -> Result<ApiResponse<Vec<LockRecord>>, AppError> {
    let started = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    let records = state
        .scheduler
        .locks()
        .list(&query.prefix)
        .await
        .map_err(sagaflow_types::error::SchedulerError::from)
        .request_meta(&request_id, started)?;
    Ok(ApiResponse::success(records, request_id, started))
}
