//! Execution status state machine.
//!
//! All status changes flow through [`transition`], which enforces a static
//! legality table and appends an immutable [`StateTransition`] record. The
//! caller persists the state after every transition; nothing here touches
//! storage.

use chrono::Utc;
use sagaflow_types::error::StateMachineError;
use sagaflow_types::execution::{ExecutionState, ExecutionStatus, StateTransition};

/// Whether `from -> to` is a legal transition.
///
/// Notable entries: `Executing -> Executing` records a completed step without
/// leaving the state, `Rejected` is reachable only before execution begins,
/// and `Cancelled` is reachable from any non-terminal state.
pub fn is_legal(from: ExecutionStatus, to: ExecutionStatus) -> bool {
    use ExecutionStatus::*;

    if from.is_terminal() {
        return false;
    }
    if to == Cancelled {
        return true;
    }
    matches!(
        (from, to),
        (Received, Planning)
            | (Received, Executing)
            | (Received, Rejected)
            | (Received, Failed)
            | (Planning, Executing)
            | (Planning, Rejected)
            | (Planning, Failed)
            | (Executing, Executing)
            | (Executing, AwaitingConfirmation)
            | (Executing, Completed)
            | (Executing, Failed)
            | (Executing, Compensating)
            | (AwaitingConfirmation, Executing)
            | (AwaitingConfirmation, Failed)
            | (Compensating, Compensated)
            | (Compensating, Failed)
    )
}

/// Apply a transition to `state`, appending the history record.
///
/// Returns `InvalidTransition` without mutating the state when the move is
/// illegal. `updated_at` is refreshed on success.
pub fn transition(
    state: &mut ExecutionState,
    to: ExecutionStatus,
    reason: Option<String>,
    metadata: Option<serde_json::Value>,
) -> Result<(), StateMachineError> {
    let from = state.status;
    if !is_legal(from, to) {
        return Err(StateMachineError::InvalidTransition { from, to });
    }

    let now = Utc::now();
    state.transitions.push(StateTransition {
        from,
        to,
        timestamp: now,
        reason,
        metadata,
    });
    state.status = to;
    state.updated_at = now;
    Ok(())
}
