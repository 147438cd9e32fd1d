//! Internal endpoints, guarded by the shared internal key.
//!
//! `/internal/step` injects a step trigger directly, bypassing the queue.
//! It is idempotent by construction: the scheduler re-checks the persisted
//! state and the step lock, so redriving a step that already ran is a
//! discard, not a re-execution. `/internal/outbox/relay` forces a relay
//! pass outside the periodic tick.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use sagaflow_core::scheduler::StepOutcome;
use sagaflow_types::execution::StepTriggerMessage;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;
use uuid::Uuid;

use crate::http::error::{AppError, ResultExt};
use crate::http::extractors::InternalAuth;
use crate::http::response::ApiResponse;
use crate::state::AppState;

pub fn internal_routes() -> Router<AppState> {
    Router::new()
        .route("/step", post(trigger_step))
        .route("/outbox/relay", post(run_relay))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTriggerRequest {
    pub execution_id: Uuid,
    pub step_index: u32,
    #[serde(default = "first_attempt")]
    pub attempt_count: u32,
    #[serde(default)]
    pub trace_id: Option<String>,
}

fn first_attempt() -> u32 {
    1
}

async fn trigger_step(
    State(state): State<AppState>,
    _auth: InternalAuth,
    Json(body): Json<StepTriggerRequest>,
) -> Result<ApiResponse<Value>, AppError> {
    let started = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let message = StepTriggerMessage {
        execution_id: body.execution_id,
        step_index: body.step_index,
        attempt_count: body.attempt_count,
        max_attempts: state.config.max_step_attempts,
        trace_id: body
            .trace_id
            .unwrap_or_else(|| format!("tr-{}", Uuid::now_v7())),
    };
    let outcome = state
        .scheduler
        .handle_step_trigger(&message)
        .await
        .request_meta(&request_id, started)?;
    Ok(
        ApiResponse::success(outcome_json(&outcome), request_id, started)
            .with_execution_id(body.execution_id),
    )
}

fn outcome_json(outcome: &StepOutcome) -> Value {
    match outcome {
        StepOutcome::Advanced { next_step } => {
            json!({"outcome": "advanced", "nextStep": next_step})
        }
        StepOutcome::Completed => json!({"outcome": "completed"}),
        StepOutcome::AwaitingConfirmation => json!({"outcome": "awaitingConfirmation"}),
        StepOutcome::Discarded { reason } => {
            json!({"outcome": "discarded", "reason": reason})
        }
        StepOutcome::Retry { backoff_ms } => {
            json!({"outcome": "retry", "backoffMs": backoff_ms})
        }
        StepOutcome::Failed => json!({"outcome": "failed"}),
        StepOutcome::Compensated => json!({"outcome": "compensated"}),
    }
}

async fn run_relay(
    State(state): State<AppState>,
    _auth: InternalAuth,
) -> Result<ApiResponse<Value>, AppError> {
    let started = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let report = state
        .relay
        .run_once()
        .await
        .map_err(sagaflow_types::error::SchedulerError::from)
        .request_meta(&request_id, started)?;
    let backlog = state
        .relay
        .backlog()
        .await
        .map_err(sagaflow_types::error::SchedulerError::from)
        .request_meta(&request_id, started)?;
    Ok(ApiResponse::success(
        json!({
            "relayed": report.relayed,
            "skippedStale": report.skipped_stale,
            "backlog": backlog,
        }),
        request_id,
        started,
    ))
}
