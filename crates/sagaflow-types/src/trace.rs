//! Execution trace events.
//!
//! Every significant decision in the engine emits a `TraceEntry` on an
//! in-process broadcast channel, correlated by trace id. The API layer
//! collects entries for the synchronous part of a request and returns them
//! in the response, making scheduling decisions observable without log
//! spelunking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::ExecutionStatus;

/// What happened, as a closed vocabulary. Tagged `kind` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TraceEvent {
    #[serde(rename_all = "camelCase")]
    ExecutionReceived { execution_id: Uuid, total_steps: u32 },
    #[serde(rename_all = "camelCase")]
    PlanRejected {
        execution_id: Uuid,
        violation_code: String,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    StepScheduled {
        execution_id: Uuid,
        step_index: u32,
        attempt_count: u32,
    },
    #[serde(rename_all = "camelCase")]
    StepStarted {
        execution_id: Uuid,
        step_index: u32,
        tool_name: String,
    },
    #[serde(rename_all = "camelCase")]
    StepCompleted {
        execution_id: Uuid,
        step_index: u32,
        duration_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    StepFailed {
        execution_id: Uuid,
        step_index: u32,
        attempt_count: u32,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    AwaitingConfirmation { execution_id: Uuid, step_index: u32 },
    #[serde(rename_all = "camelCase")]
    ExecutionResumed { execution_id: Uuid, step_index: u32 },
    #[serde(rename_all = "camelCase")]
    LockContention {
        execution_id: Uuid,
        step_index: u32,
        lock_key: String,
    },
    #[serde(rename_all = "camelCase")]
    LockReclaimed { lock_key: String, age_seconds: u64 },
    #[serde(rename_all = "camelCase")]
    CircuitOpen {
        execution_id: Uuid,
        service_key: String,
        retry_after_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    StateTransitioned {
        execution_id: Uuid,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
    #[serde(rename_all = "camelCase")]
    CompensationStarted {
        execution_id: Uuid,
        steps_to_compensate: u32,
    },
    #[serde(rename_all = "camelCase")]
    CompensationStep {
        execution_id: Uuid,
        step_index: u32,
        tool_name: String,
        succeeded: bool,
    },
    #[serde(rename_all = "camelCase")]
    ExecutionCompleted { execution_id: Uuid },
    #[serde(rename_all = "camelCase")]
    ExecutionFailed { execution_id: Uuid, error: String },
    #[serde(rename_all = "camelCase")]
    ExecutionCancelled { execution_id: Uuid },
    #[serde(rename_all = "camelCase")]
    MessageDiscarded {
        execution_id: Uuid,
        step_index: u32,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    OutboxRelayed { event_id: Uuid, cache_key: String },
    #[serde(rename_all = "camelCase")]
    OrchestrationError { execution_id: Uuid, error: String },
}

/// A timestamped, correlated trace event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: TraceEvent,
}

impl TraceEntry {
    pub fn new(trace_id: impl Into<String>, event: TraceEvent) -> Self {
        Self {
            trace_id: trace_id.into(),
            timestamp: Utc::now(),
            event,
        }
    }
}
