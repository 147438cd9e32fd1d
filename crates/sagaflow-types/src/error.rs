//! Error types for the Sagaflow engine.
//!
//! Per-concern enums so callers can match on exactly the failures a layer can
//! produce. The scheduler-level `SchedulerError` is the taxonomy the HTTP API
//! maps onto response codes.

use thiserror::Error;
use uuid::Uuid;

use crate::execution::ExecutionStatus;
use crate::plan::PolicyViolation;

/// Errors from the durable state / outbox store.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),
}

/// Errors from the step trigger queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(String),

    #[error("malformed queue message: {0}")]
    Malformed(String),
}

/// Errors from the distributed lock store.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock backend error: {0}")]
    Backend(String),

    #[error("not the lock owner for {key}")]
    NotOwner { key: String },
}

/// Illegal state machine transitions.
#[derive(Debug, Error)]
pub enum StateMachineError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
}

/// Errors from executing a tool call.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool {tool_name} failed: {message}")]
    Failed { tool_name: String, message: String },

    #[error("tool {tool_name} timed out after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("tool transport error: {0}")]
    Transport(String),
}

/// Errors from the plan provider.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The request is too ambiguous to plan; the caller must clarify.
    #[error("clarification required: {0}")]
    ClarificationRequired(String),

    #[error("plan provider error: {0}")]
    Provider(String),

    #[error("invalid plan: {0}")]
    Invalid(String),
}

/// Top-level scheduler errors, mapped to API error codes.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("clarification required: {0}")]
    ClarificationRequired(String),

    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    #[error("execution not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    #[error("orchestration error: {0}")]
    Orchestration(String),
}

impl SchedulerError {
    /// The wire-format error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Validation(_) => "VALIDATION_ERROR",
            SchedulerError::ClarificationRequired(_) => "CLARIFICATION_REQUIRED",
            SchedulerError::Policy(violation) => violation.code(),
            SchedulerError::NotFound(_) => "EXECUTION_NOT_FOUND",
            SchedulerError::Repository(_)
            | SchedulerError::Queue(_)
            | SchedulerError::Lock(_)
            | SchedulerError::StateMachine(_)
            | SchedulerError::Orchestration(_) => "ORCHESTRATION_ERROR",
        }
    }
}

impl From<PlanError> for SchedulerError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::ClarificationRequired(msg) => SchedulerError::ClarificationRequired(msg),
            PlanError::Invalid(msg) => SchedulerError::Validation(msg),
            PlanError::Provider(msg) => SchedulerError::Orchestration(msg),
        }
    }
}
