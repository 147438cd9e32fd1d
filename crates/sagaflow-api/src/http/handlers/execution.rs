//! Execution endpoints: submit, read, confirm, cancel.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use sagaflow_core::tracer::drain_matching;
use sagaflow_types::execution::{ExecutionState, ExecutionStatus};
use sagaflow_types::plan::Plan;
use sagaflow_types::trace::TraceEntry;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

use crate::http::error::{AppError, ResultExt};
use crate::http::response::ApiResponse;
use crate::state::AppState;

pub fn execution_routes() -> Router<AppState> {
    Router::new()
        .route("/execute", post(start_execution).get(read_execution))
        .route("/executions", get(list_executions))
        .route("/executions/{id}", get(get_execution))
        .route("/executions/{id}/confirm", post(confirm_execution))
        .route("/executions/{id}/cancel", post(cancel_execution))
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    /// A pre-built plan. Takes precedence over `goal`.
    #[serde(default)]
    pub plan: Option<Plan>,
    /// A natural-language goal for the plan generator.
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    /// Pause before every step until confirmed.
    #[serde(default)]
    pub require_confirmation: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub current_step_index: u32,
    pub total_steps: u32,
    pub segment_number: u32,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ExecutionState> for ExecutionSummary {
    fn from(state: &ExecutionState) -> Self {
        Self {
            execution_id: state.execution_id,
            status: state.status,
            current_step_index: state.current_step_index,
            total_steps: state.total_steps,
            segment_number: state.segment_number,
            trace_id: state.trace_id.clone(),
            error: state.error.clone(),
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub execution: ExecutionSummary,
    /// Trace events emitted while the request was being accepted.
    pub trace: Vec<TraceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadQuery {
    pub execution_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn start_execution(
    State(state): State<AppState>,
    Json(body): Json<ExecuteRequest>,
) -> Result<ApiResponse<ExecuteResponse>, AppError> {
    let started = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    let trace_id = format!("tr-{}", Uuid::now_v7());

    let plan = match (body.plan, body.goal) {
        (Some(plan), _) => plan,
        (None, Some(goal)) => {
            let planner = state
                .planner
                .as_ref()
                .ok_or_else(|| AppError::planner_unavailable().with_meta(&request_id, started))?;
            use sagaflow_core::planner::PlanProvider;
            planner
                .generate(&goal, body.context.as_ref())
                .await
                .request_meta(&request_id, started)?
        }
        (None, None) => {
            return Err(
                AppError::validation("either plan or goal is required")
                    .with_meta(&request_id, started),
            )
        }
    };

    // Subscribe before starting so the acceptance-time events are captured.
    let mut rx = state.scheduler.tracer().subscribe();
    let execution = state
        .scheduler
        .start_execution(plan, body.require_confirmation, trace_id.clone())
        .await
        .request_meta(&request_id, started)?;
    let trace = drain_matching(&mut rx, &trace_id);

    let rejected = execution.status == ExecutionStatus::Rejected;
    let violation_code = violation_code(&execution);
    let message = execution.error.clone().unwrap_or_default();
    let execution_id = execution.execution_id;

    let response = ApiResponse::success(
        ExecuteResponse {
            execution: ExecutionSummary::from(&execution),
            trace,
        },
        request_id,
        started,
    )
    .with_execution_id(execution_id);
    // A rejected plan is persisted and returned, but the envelope reports
    // the violation so the caller gets a 400.
    if rejected {
        let code = violation_code.unwrap_or_else(|| "POLICY_VIOLATION_EMPTY_PLAN".to_string());
        return Ok(response.with_error(code, message));
    }
    Ok(response)
}

fn violation_code(state: &ExecutionState) -> Option<String> {
    state.transitions.iter().rev().find_map(|t| {
        t.metadata
            .as_ref()
            .and_then(|m| m.get("violation"))
            .and_then(|v| v.as_str())
            .map(String::from)
    })
}

/// Cache-first execution lookup. The cache can lag by one relay tick; the
/// store is authoritative.
async fn load_execution(state: &AppState, id: &Uuid) -> Result<ExecutionState, AppError> {
    use sagaflow_core::repository::CacheStore;
    if let Ok(Some(cached)) = state.cache.get(&format!("exec:{id}")).await {
        if let Ok(cached_state) = serde_json::from_value::<ExecutionState>(cached) {
            return Ok(cached_state);
        }
    }
    Ok(state.scheduler.get_execution(id).await?)
}

async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<ExecutionState>, AppError> {
    let started = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let execution = load_execution(&state, &id)
        .await
        .map_err(|e| e.with_meta(&request_id, started))?;
    Ok(ApiResponse::success(execution, request_id, started).with_execution_id(id))
}

/// Query-parameter read form: `GET /execute?executionId=<id>`.
async fn read_execution(
    State(state): State<AppState>,
    Query(query): Query<ReadQuery>,
) -> Result<ApiResponse<ExecutionState>, AppError> {
    let started = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let execution = load_execution(&state, &query.execution_id)
        .await
        .map_err(|e| e.with_meta(&request_id, started))?;
    Ok(ApiResponse::success(execution, request_id, started)
        .with_execution_id(query.execution_id))
}

async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<ApiResponse<Vec<ExecutionSummary>>, AppError> {
    let started = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    use sagaflow_core::repository::ExecutionStateStore;
    let recent = state
        .store
        .list_recent(query.limit)
        .await
        .map_err(sagaflow_types::error::SchedulerError::from)
        .request_meta(&request_id, started)?;
    let summaries = recent.iter().map(ExecutionSummary::from).collect();
    Ok(ApiResponse::success(summaries, request_id, started))
}

async fn confirm_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<ExecutionSummary>, AppError> {
    let started = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let execution = state
        .scheduler
        .resume_execution(&id)
        .await
        .request_meta(&request_id, started)?;
    Ok(ApiResponse::success(ExecutionSummary::from(&execution), request_id, started)
        .with_execution_id(id))
}

async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<ExecutionSummary>, AppError> {
    let started = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let execution = state
        .scheduler
        .cancel_execution(&id)
        .await
        .request_meta(&request_id, started)?;
    Ok(ApiResponse::success(ExecutionSummary::from(&execution), request_id, started)
        .with_execution_id(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use sagaflow_types::plan::{PlanStep, ToolCategory};
    use serde_json::json;

    fn single_step_plan() -> Plan {
        Plan {
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
        }
    }

    #[tokio::test]
    async fn test_rejected_plan_returns_400() {
        let state = test_state().await;
        let body = ExecuteRequest {
            plan: Some(Plan {
                id: Uuid::now_v7(),
                steps: vec![],
            }),
            goal: None,
            context: None,
            require_confirmation: false,
        };

        let resp = start_execution(State(state), Json(body)).await.unwrap();
        assert!(!resp.success);
        assert_eq!(resp.errors[0].code, "POLICY_VIOLATION_EMPTY_PLAN");
        // Rejected state is still returned alongside the error.
        assert!(resp.data.is_some());

        let http = resp.into_response();
        assert_eq!(http.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_read_by_query_parameter() {
        let state = test_state().await;
        let execution = state
            .scheduler
            .start_execution(single_step_plan(), false, "tr-read".to_string())
            .await
            .unwrap();

        let resp = read_execution(
            State(state.clone()),
            Query(ReadQuery {
                execution_id: execution.execution_id,
            }),
        )
        .await
        .unwrap();
        assert!(resp.success);
        assert_eq!(resp.execution_id, Some(execution.execution_id));
        assert_eq!(
            resp.data.unwrap().execution_id,
            execution.execution_id
        );

        let missing = read_execution(
            State(state),
            Query(ReadQuery {
                execution_id: Uuid::now_v7(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(missing.code(), "EXECUTION_NOT_FOUND");
        assert_eq!(
            missing.into_response().status(),
            StatusCode::NOT_FOUND
        );
    }
}
