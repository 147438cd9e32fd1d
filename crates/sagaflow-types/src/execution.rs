//! Execution state and step-trigger message types.
//!
//! `ExecutionState` is the durable record of a workflow's progress, keyed by
//! execution id and owned exclusively by the step scheduler. It is mutated
//! only through the state machine's transition function and persisted after
//! every mutation. `transitions` is append-only and never reordered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plan::Plan;

// ---------------------------------------------------------------------------
// Execution status
// ---------------------------------------------------------------------------

/// Status of an execution, serialized SCREAMING_SNAKE_CASE on the wire.
///
/// Single unified vocabulary: `Rejected` is reachable only before execution
/// begins, `Cancelled` from any non-terminal state, and the compensation arm
/// (`Compensating` / `Compensated`) only after `Failed`-bound retry
/// exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Received,
    Planning,
    Executing,
    AwaitingConfirmation,
    Compensating,
    Completed,
    Failed,
    Rejected,
    Cancelled,
    Compensated,
}

impl ExecutionStatus {
    /// Whether this status is terminal (no further transitions are legal).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Rejected
                | ExecutionStatus::Cancelled
                | ExecutionStatus::Compensated
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Received => "RECEIVED",
            ExecutionStatus::Planning => "PLANNING",
            ExecutionStatus::Executing => "EXECUTING",
            ExecutionStatus::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            ExecutionStatus::Compensating => "COMPENSATING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Rejected => "REJECTED",
            ExecutionStatus::Cancelled => "CANCELLED",
            ExecutionStatus::Compensated => "COMPENSATED",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// State transition record
// ---------------------------------------------------------------------------

/// A single recorded status transition. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
    pub timestamp: DateTime<Utc>,
    /// Why the transition happened (e.g. "step 2 completed").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Extra structured context (violation codes, error details).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Execution state
// ---------------------------------------------------------------------------

/// Durable record of an execution's progress.
///
/// Invariant: `current_step_index <= total_steps`. `transitions` is
/// append-only. Persisted under `exec:<id>` with a TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    /// Index of the next step to execute (== number of completed steps).
    pub current_step_index: u32,
    pub total_steps: u32,
    /// Which self-trigger segment this execution is in (increments each time
    /// the chain re-enters after a suspension).
    pub segment_number: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Append-only transition history.
    pub transitions: Vec<StateTransition>,
    /// Accumulated step outputs and bookkeeping, merged as steps complete.
    pub context: serde_json::Map<String, serde_json::Value>,
    /// Terminal error message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The approved plan this execution is running.
    pub plan: Plan,
    /// When true, every step pauses for confirmation regardless of the plan.
    #[serde(default)]
    pub require_confirmation: bool,
    /// Correlation id threaded through trigger messages and trace entries.
    pub trace_id: String,
}

/// Context key holding the JSON object of step outputs.
pub const CONTEXT_STEPS_KEY: &str = "steps";
/// Context key holding the array of confirmed step indices.
pub const CONTEXT_CONFIRMED_KEY: &str = "confirmedSteps";

impl ExecutionState {
    /// Create a fresh execution in `Received` status for an approved plan.
    pub fn new(execution_id: Uuid, plan: Plan, trace_id: String, require_confirmation: bool) -> Self {
        let now = Utc::now();
        let total_steps = plan.steps.len() as u32;
        let mut context = serde_json::Map::new();
        context.insert(CONTEXT_STEPS_KEY.to_string(), serde_json::json!({}));

        Self {
            execution_id,
            status: ExecutionStatus::Received,
            current_step_index: 0,
            total_steps,
            segment_number: 0,
            created_at: now,
            updated_at: now,
            transitions: Vec::new(),
            context,
            error: None,
            plan,
            require_confirmation,
            trace_id,
        }
    }

    /// Merge a completed step's output into the context under `steps.<id>`.
    pub fn record_step_output(&mut self, step_id: &str, output: serde_json::Value) {
        let steps = self
            .context
            .entry(CONTEXT_STEPS_KEY.to_string())
            .or_insert_with(|| serde_json::json!({}));
        if let Some(map) = steps.as_object_mut() {
            map.insert(step_id.to_string(), output);
        }
    }

    /// Whether the given step index has been confirmed by an external event.
    pub fn is_step_confirmed(&self, step_index: u32) -> bool {
        self.context
            .get(CONTEXT_CONFIRMED_KEY)
            .and_then(|v| v.as_array())
            .is_some_and(|arr| arr.iter().any(|v| v.as_u64() == Some(step_index as u64)))
    }

    /// Record an external confirmation for the given step index.
    pub fn mark_step_confirmed(&mut self, step_index: u32) {
        let confirmed = self
            .context
            .entry(CONTEXT_CONFIRMED_KEY.to_string())
            .or_insert_with(|| serde_json::json!([]));
        if let Some(arr) = confirmed.as_array_mut() {
            if !arr.iter().any(|v| v.as_u64() == Some(step_index as u64)) {
                arr.push(serde_json::json!(step_index));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Step trigger message
// ---------------------------------------------------------------------------

/// Queue payload that triggers execution of a single step.
///
/// Produced by the scheduler, consumed by the step handler. Redelivery-safe
/// by construction: the handler discards it when the execution is terminal or
/// the step's idempotency lock is held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTriggerMessage {
    pub execution_id: Uuid,
    pub step_index: u32,
    /// Delivery attempt for this step (1-based).
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub trace_id: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Plan, PlanStep, ToolCategory};
    use serde_json::json;

    fn sample_plan() -> Plan {
        Plan {
            id: Uuid::now_v7(),
            steps: vec![PlanStep {
                id: "lookup".to_string(),
                tool_name: "search".to_string(),
                category: ToolCategory::Query,
                parameters: json!({}),
                requires_confirmation: false,
                risk_score: 0,
                compensation: None,
            }],
        }
    }

    #[test]
    fn test_status_screaming_snake_serde() {
        let json_str = serde_json::to_string(&ExecutionStatus::AwaitingConfirmation).unwrap();
        assert_eq!(json_str, "\"AWAITING_CONFIRMATION\"");
        let parsed: ExecutionStatus = serde_json::from_str("\"COMPENSATED\"").unwrap();
        assert_eq!(parsed, ExecutionStatus::Compensated);
    }

    #[test]
    fn test_terminal_statuses() {
        for status in [
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Rejected,
            ExecutionStatus::Cancelled,
            ExecutionStatus::Compensated,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
        for status in [
            ExecutionStatus::Received,
            ExecutionStatus::Planning,
            ExecutionStatus::Executing,
            ExecutionStatus::AwaitingConfirmation,
            ExecutionStatus::Compensating,
        ] {
            assert!(!status.is_terminal(), "{status} should not be terminal");
        }
    }

    #[test]
    fn test_new_execution_state() {
        let state = ExecutionState::new(Uuid::now_v7(), sample_plan(), "tr-1".to_string(), false);
        assert_eq!(state.status, ExecutionStatus::Received);
        assert_eq!(state.current_step_index, 0);
        assert_eq!(state.total_steps, 1);
        assert_eq!(state.segment_number, 0);
        assert!(state.transitions.is_empty());
        assert!(state.context.contains_key(CONTEXT_STEPS_KEY));
    }

    #[test]
    fn test_record_step_output() {
        let mut state =
            ExecutionState::new(Uuid::now_v7(), sample_plan(), "tr-1".to_string(), false);
        state.record_step_output("lookup", json!({"found": 3}));

        let steps = state.context.get(CONTEXT_STEPS_KEY).unwrap();
        assert_eq!(steps["lookup"]["found"], 3);
    }

    #[test]
    fn test_confirmation_bookkeeping() {
        let mut state =
            ExecutionState::new(Uuid::now_v7(), sample_plan(), "tr-1".to_string(), false);
        assert!(!state.is_step_confirmed(0));

        state.mark_step_confirmed(0);
        assert!(state.is_step_confirmed(0));
        assert!(!state.is_step_confirmed(1));

        // Marking twice does not duplicate
        state.mark_step_confirmed(0);
        let arr = state.context.get(CONTEXT_CONFIRMED_KEY).unwrap();
        assert_eq!(arr.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_execution_state_json_roundtrip() {
        let state = ExecutionState::new(Uuid::now_v7(), sample_plan(), "tr-9".to_string(), true);
        let json_str = serde_json::to_string(&state).unwrap();
        assert!(json_str.contains("\"executionId\""));
        assert!(json_str.contains("\"currentStepIndex\""));
        assert!(json_str.contains("\"segmentNumber\""));

        let parsed: ExecutionState = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.execution_id, state.execution_id);
        assert!(parsed.require_confirmation);
        assert_eq!(parsed.trace_id, "tr-9");
    }

    #[test]
    fn test_step_trigger_message_camel_case() {
        let msg = StepTriggerMessage {
            execution_id: Uuid::now_v7(),
            step_index: 2,
            attempt_count: 1,
            max_attempts: 3,
            trace_id: "tr-2".to_string(),
        };
        let json_str = serde_json::to_string(&msg).unwrap();
        assert!(json_str.contains("\"executionId\""));
        assert!(json_str.contains("\"stepIndex\":2"));
        assert!(json_str.contains("\"attemptCount\":1"));

        let parsed: StepTriggerMessage = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed, msg);
    }
}
