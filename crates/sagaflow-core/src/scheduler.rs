//! Self-triggering step scheduler.
//!
//! Steps run one at a time: handling the trigger for step N executes the
//! tool, persists the advanced state, and only then enqueues the trigger for
//! step N+1. The queue is at-least-once, so every trigger is re-checked
//! against the persisted state and the step's idempotency lock before any
//! tool runs; duplicates and stale deliveries are discarded, never executed.

use std::sync::Arc;
use std::time::Instant;

use sagaflow_types::config::EngineConfig;
use sagaflow_types::error::{RepositoryError, SchedulerError};
use sagaflow_types::execution::{ExecutionState, ExecutionStatus, StepTriggerMessage};
use sagaflow_types::lock::LockAcquisition;
use sagaflow_types::outbox::OutboxEvent;
use sagaflow_types::plan::Plan;
use sagaflow_types::trace::TraceEvent;
use uuid::Uuid;

use crate::breaker::{BreakerError, BreakerRegistry};
use crate::gate;
use crate::lock::{step_lock_key, LockManager, LockStore};
use crate::machine;
use crate::repository::{ExecutionStateStore, StepQueue};
use crate::tool::ToolExecutor;
use crate::tracer::ExecutionTracer;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What handling one step trigger decided, so the worker knows how to
/// settle the queue message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Step completed; the next step's trigger is enqueued.
    Advanced { next_step: u32 },
    /// The final step completed; the execution is `Completed`.
    Completed,
    /// The step requires confirmation; the execution is paused.
    AwaitingConfirmation,
    /// The message was a duplicate, stale, or otherwise inapplicable.
    Discarded { reason: String },
    /// A retryable failure; a fresh trigger was enqueued with backoff.
    Retry { backoff_ms: u64 },
    /// Retries exhausted with nothing to roll back; execution is `Failed`.
    Failed,
    /// Retries exhausted; compensations ran and the execution is
    /// `Compensated`.
    Compensated,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Orchestrates executions over pluggable storage, queue, lock, and tool
/// backends.
pub struct StepScheduler<R, L, Q, T> {
    store: R,
    locks: LockManager<L>,
    queue: Q,
    tools: T,
    breakers: Arc<BreakerRegistry>,
    tracer: ExecutionTracer,
    config: EngineConfig,
}

impl<R, L, Q, T> StepScheduler<R, L, Q, T>
where
    R: ExecutionStateStore,
    L: LockStore,
    Q: StepQueue,
    T: ToolExecutor,
{
    pub fn new(
        store: R,
        locks: LockManager<L>,
        queue: Q,
        tools: T,
        breakers: Arc<BreakerRegistry>,
        tracer: ExecutionTracer,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            locks,
            queue,
            tools,
            breakers,
            tracer,
            config,
        }
    }

    pub fn tracer(&self) -> &ExecutionTracer {
        &self.tracer
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn locks(&self) -> &LockManager<L> {
        &self.locks
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Accept a plan: verify it against the policy, persist the initial
    /// state, and schedule the first step.
    ///
    /// A rejected plan comes back as a persisted `Rejected` state; nothing
    /// is ever scheduled for it.
    pub async fn start_execution(
        &self,
        plan: Plan,
        require_confirmation: bool,
        trace_id: String,
    ) -> Result<ExecutionState, SchedulerError> {
        let execution_id = Uuid::now_v7();
        let mut state = ExecutionState::new(execution_id, plan, trace_id, require_confirmation);
        self.tracer.emit(
            &state.trace_id,
            TraceEvent::ExecutionReceived {
                execution_id,
                total_steps: state.total_steps,
            },
        );

        let outcome = gate::verify(&state.plan, &self.config.policy);
        if !outcome.valid {
            let violation = outcome.violation.unwrap_or(
                sagaflow_types::plan::PolicyViolation::EmptyPlan,
            );
            let reason = outcome.reason.unwrap_or_else(|| violation.to_string());
            self.apply_transition(
                &mut state,
                ExecutionStatus::Rejected,
                Some(reason.clone()),
                Some(serde_json::json!({ "violation": violation.code() })),
            )?;
            state.error = Some(reason.clone());
            self.persist(&state).await?;
            self.tracer.emit(
                &state.trace_id,
                TraceEvent::PlanRejected {
                    execution_id,
                    violation_code: violation.code().to_string(),
                    reason,
                },
            );
            return Ok(state);
        }

        self.apply_transition(&mut state, ExecutionStatus::Executing, None, None)?;
        self.persist(&state).await?;
        self.enqueue_step(&state, 0, 1, 0).await?;
        Ok(state)
    }

    /// Handle one step trigger message.
    ///
    /// Unexpected orchestration failures are contained: the execution is
    /// marked `Failed` so it cannot wedge in `Executing` forever.
    pub async fn handle_step_trigger(
        &self,
        msg: &StepTriggerMessage,
    ) -> Result<StepOutcome, SchedulerError> {
        match self.process_trigger(msg).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::error!(
                    execution_id = %msg.execution_id,
                    step_index = msg.step_index,
                    error = %err,
                    "orchestration failure while handling step trigger"
                );
                self.tracer.emit(
                    &msg.trace_id,
                    TraceEvent::OrchestrationError {
                        execution_id: msg.execution_id,
                        error: err.to_string(),
                    },
                );
                self.mark_failed_best_effort(&msg.execution_id, &err).await;
                Err(err)
            }
        }
    }

    /// Confirm the pending step and resume a paused execution.
    pub async fn resume_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<ExecutionState, SchedulerError> {
        let mut state = self.load_required(execution_id).await?;
        if state.status != ExecutionStatus::AwaitingConfirmation {
            return Err(SchedulerError::Validation(format!(
                "execution is {}, not AWAITING_CONFIRMATION",
                state.status
            )));
        }

        let step_index = state.current_step_index;
        state.mark_step_confirmed(step_index);
        state.segment_number += 1;
        self.apply_transition(
            &mut state,
            ExecutionStatus::Executing,
            Some(format!("step {step_index} confirmed")),
            None,
        )?;
        self.persist(&state).await?;
        self.tracer.emit(
            &state.trace_id,
            TraceEvent::ExecutionResumed {
                execution_id: *execution_id,
                step_index,
            },
        );
        self.enqueue_step(&state, step_index, 1, 0).await?;
        Ok(state)
    }

    /// Cancel a non-terminal execution.
    pub async fn cancel_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<ExecutionState, SchedulerError> {
        let mut state = self.load_required(execution_id).await?;
        if state.status.is_terminal() {
            return Err(SchedulerError::Validation(format!(
                "execution is already terminal ({})",
                state.status
            )));
        }
        self.apply_transition(
            &mut state,
            ExecutionStatus::Cancelled,
            Some("cancelled by caller".to_string()),
            None,
        )?;
        self.persist(&state).await?;
        self.tracer.emit(
            &state.trace_id,
            TraceEvent::ExecutionCancelled {
                execution_id: *execution_id,
            },
        );
        Ok(state)
    }

    /// Load an execution's state.
    pub async fn get_execution(
        &self,
        execution_id: &Uuid,
    ) -> Result<ExecutionState, SchedulerError> {
        self.load_required(execution_id).await
    }

    // -----------------------------------------------------------------------
    // Trigger processing
    // -----------------------------------------------------------------------

    async fn process_trigger(
        &self,
        msg: &StepTriggerMessage,
    ) -> Result<StepOutcome, SchedulerError> {
        let Some(mut state) = self.store.load(&msg.execution_id).await? else {
            return Ok(self.discard(msg, "unknown or expired execution"));
        };

        if state.status.is_terminal() {
            return Ok(self.discard(msg, "execution is terminal"));
        }
        if msg.step_index < state.current_step_index {
            return Ok(self.discard(msg, "stale trigger for an already completed step"));
        }
        if msg.step_index > state.current_step_index {
            return Ok(self.discard(msg, "trigger ahead of execution progress"));
        }
        if state.status == ExecutionStatus::AwaitingConfirmation {
            return Ok(self.discard(msg, "execution awaits confirmation"));
        }

        let lock_key = step_lock_key(&msg.execution_id, msg.step_index);
        let owner_token = match self.locks.acquire(&lock_key, "step", &msg.trace_id).await? {
            LockAcquisition::Acquired { owner_token } => owner_token,
            LockAcquisition::Held => {
                self.tracer.emit(
                    &msg.trace_id,
                    TraceEvent::LockContention {
                        execution_id: msg.execution_id,
                        step_index: msg.step_index,
                        lock_key,
                    },
                );
                return Ok(StepOutcome::Discarded {
                    reason: "step lock is held by another worker".to_string(),
                });
            }
        };

        let result = self.run_locked_step(&mut state, msg).await;
        self.locks.release(&lock_key, &owner_token).await?;
        result
    }

    /// Everything between lock acquisition and release.
    async fn run_locked_step(
        &self,
        state: &mut ExecutionState,
        msg: &StepTriggerMessage,
    ) -> Result<StepOutcome, SchedulerError> {
        let step_index = msg.step_index;
        let step = state
            .plan
            .steps
            .get(step_index as usize)
            .cloned()
            .ok_or_else(|| {
                SchedulerError::Orchestration(format!("plan has no step {step_index}"))
            })?;

        // Pause for confirmation before any side effect.
        let needs_confirmation = step.requires_confirmation || state.require_confirmation;
        if needs_confirmation && !state.is_step_confirmed(step_index) {
            self.apply_transition(
                state,
                ExecutionStatus::AwaitingConfirmation,
                Some(format!("step {step_index} requires confirmation")),
                None,
            )?;
            self.persist(state).await?;
            self.tracer.emit(
                &msg.trace_id,
                TraceEvent::AwaitingConfirmation {
                    execution_id: msg.execution_id,
                    step_index,
                },
            );
            return Ok(StepOutcome::AwaitingConfirmation);
        }

        self.tracer.emit(
            &msg.trace_id,
            TraceEvent::StepStarted {
                execution_id: msg.execution_id,
                step_index,
                tool_name: step.tool_name.clone(),
            },
        );

        let breaker = self.breakers.get(&self.tools.service_key(&step.tool_name));
        let started = Instant::now();
        let result = breaker
            .execute(|| self.tools.execute(&step.tool_name, &step.parameters))
            .await;

        match result {
            Ok(output) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                self.tracer.emit(
                    &msg.trace_id,
                    TraceEvent::StepCompleted {
                        execution_id: msg.execution_id,
                        step_index,
                        duration_ms,
                    },
                );

                state.record_step_output(&step.id, output);
                state.current_step_index += 1;
                self.apply_transition(
                    state,
                    ExecutionStatus::Executing,
                    Some(format!("step {step_index} completed")),
                    None,
                )?;

                if state.current_step_index >= state.total_steps {
                    self.apply_transition(state, ExecutionStatus::Completed, None, None)?;
                    self.persist(state).await?;
                    self.tracer.emit(
                        &msg.trace_id,
                        TraceEvent::ExecutionCompleted {
                            execution_id: msg.execution_id,
                        },
                    );
                    return Ok(StepOutcome::Completed);
                }

                // Persist the advance before the next trigger exists, so a
                // crash here loses only the trigger (recoverable), never
                // the progress.
                self.persist(state).await?;
                let next = state.current_step_index;
                self.enqueue_step(state, next, 1, 0).await?;
                Ok(StepOutcome::Advanced { next_step: next })
            }
            Err(BreakerError::CircuitOpen {
                service_key,
                retry_after_ms,
            }) => {
                self.tracer.emit(
                    &msg.trace_id,
                    TraceEvent::CircuitOpen {
                        execution_id: msg.execution_id,
                        service_key,
                        retry_after_ms,
                    },
                );
                let backoff = retry_after_ms.max(self.config.retry_backoff_ms);
                self.retry_or_fail(state, msg, "circuit open".to_string(), backoff)
                    .await
            }
            Err(BreakerError::Call(tool_err)) => {
                self.tracer.emit(
                    &msg.trace_id,
                    TraceEvent::StepFailed {
                        execution_id: msg.execution_id,
                        step_index,
                        attempt_count: msg.attempt_count,
                        error: tool_err.to_string(),
                    },
                );
                self.retry_or_fail(
                    state,
                    msg,
                    tool_err.to_string(),
                    self.config.retry_backoff_ms,
                )
                .await
            }
        }
    }

    async fn retry_or_fail(
        &self,
        state: &mut ExecutionState,
        msg: &StepTriggerMessage,
        error: String,
        backoff_ms: u64,
    ) -> Result<StepOutcome, SchedulerError> {
        if msg.attempt_count < msg.max_attempts {
            self.enqueue_step(state, msg.step_index, msg.attempt_count + 1, backoff_ms)
                .await?;
            return Ok(StepOutcome::Retry { backoff_ms });
        }
        self.fail_with_compensation(state, error).await
    }

    /// Retries are exhausted. Roll back completed steps that declared a
    /// compensation, newest first, then land in `Compensated`; with nothing
    /// to roll back, land in `Failed`.
    async fn fail_with_compensation(
        &self,
        state: &mut ExecutionState,
        error: String,
    ) -> Result<StepOutcome, SchedulerError> {
        let compensations: Vec<(u32, String, serde_json::Value)> = state
            .plan
            .steps
            .iter()
            .take(state.current_step_index as usize)
            .enumerate()
            .filter_map(|(idx, step)| {
                step.compensation.as_ref().map(|c| {
                    (idx as u32, c.tool_name.clone(), c.parameters.clone())
                })
            })
            .collect();

        if compensations.is_empty() {
            self.apply_transition(state, ExecutionStatus::Failed, Some(error.clone()), None)?;
            state.error = Some(error.clone());
            self.persist(state).await?;
            self.tracer.emit(
                &state.trace_id,
                TraceEvent::ExecutionFailed {
                    execution_id: state.execution_id,
                    error,
                },
            );
            return Ok(StepOutcome::Failed);
        }

        self.apply_transition(
            state,
            ExecutionStatus::Compensating,
            Some(error.clone()),
            None,
        )?;
        state.error = Some(error);
        self.persist(state).await?;
        self.tracer.emit(
            &state.trace_id,
            TraceEvent::CompensationStarted {
                execution_id: state.execution_id,
                steps_to_compensate: compensations.len() as u32,
            },
        );

        // Best effort, reverse completion order. A failed compensation is
        // recorded and skipped; partial rollback still ends Compensated.
        for (step_index, tool_name, parameters) in compensations.iter().rev() {
            let breaker = self.breakers.get(&self.tools.service_key(tool_name));
            let succeeded = breaker
                .execute(|| self.tools.execute(tool_name, parameters))
                .await
                .is_ok();
            if !succeeded {
                tracing::warn!(
                    execution_id = %state.execution_id,
                    step_index,
                    tool = %tool_name,
                    "compensation call failed"
                );
            }
            self.tracer.emit(
                &state.trace_id,
                TraceEvent::CompensationStep {
                    execution_id: state.execution_id,
                    step_index: *step_index,
                    tool_name: tool_name.clone(),
                    succeeded,
                },
            );
        }

        self.apply_transition(state, ExecutionStatus::Compensated, None, None)?;
        self.persist(state).await?;
        Ok(StepOutcome::Compensated)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn discard(&self, msg: &StepTriggerMessage, reason: &str) -> StepOutcome {
        self.tracer.emit(
            &msg.trace_id,
            TraceEvent::MessageDiscarded {
                execution_id: msg.execution_id,
                step_index: msg.step_index,
                reason: reason.to_string(),
            },
        );
        StepOutcome::Discarded {
            reason: reason.to_string(),
        }
    }

    fn apply_transition(
        &self,
        state: &mut ExecutionState,
        to: ExecutionStatus,
        reason: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), SchedulerError> {
        let from = state.status;
        machine::transition(state, to, reason, metadata)?;
        self.tracer.emit(
            &state.trace_id,
            TraceEvent::StateTransitioned {
                execution_id: state.execution_id,
                from,
                to,
            },
        );
        Ok(())
    }

    async fn persist(&self, state: &ExecutionState) -> Result<(), SchedulerError> {
        let value = serde_json::to_value(state).map_err(RepositoryError::Serialization)?;
        let event = OutboxEvent::new(format!("exec:{}", state.execution_id), value);
        self.store
            .save(state, self.config.state_ttl_seconds, Some(&event))
            .await?;
        Ok(())
    }

    async fn enqueue_step(
        &self,
        state: &ExecutionState,
        step_index: u32,
        attempt_count: u32,
        delay_ms: u64,
    ) -> Result<(), SchedulerError> {
        let trigger = StepTriggerMessage {
            execution_id: state.execution_id,
            step_index,
            attempt_count,
            max_attempts: self.config.max_step_attempts,
            trace_id: state.trace_id.clone(),
        };
        self.queue.enqueue(&trigger, delay_ms).await?;
        self.tracer.emit(
            &state.trace_id,
            TraceEvent::StepScheduled {
                execution_id: state.execution_id,
                step_index,
                attempt_count,
            },
        );
        Ok(())
    }

    async fn load_required(&self, execution_id: &Uuid) -> Result<ExecutionState, SchedulerError> {
        self.store
            .load(execution_id)
            .await?
            .ok_or(SchedulerError::NotFound(*execution_id))
    }

    async fn mark_failed_best_effort(&self, execution_id: &Uuid, err: &SchedulerError) {
        let Ok(Some(mut state)) = self.store.load(execution_id).await else {
            return;
        };
        if state.status.is_terminal() {
            return;
        }
        if machine::transition(
            &mut state,
            ExecutionStatus::Failed,
            Some(format!("orchestration error: {err}")),
            None,
        )
        .is_ok()
        {
            state.error = Some(err.to_string());
            if let Err(persist_err) = self.persist(&state).await {
                tracing::error!(
                    execution_id = %execution_id,
                    error = %persist_err,
                    "failed to persist failure state"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dashmap::DashMap;
    use sagaflow_types::error::{LockError, QueueError, ToolError};
    use sagaflow_types::lock::LockRecord;
    use sagaflow_types::plan::{CompensationSpec, PlanStep, ToolCategory};
    use sagaflow_types::breaker::BreakerConfig;
    use crate::repository::ClaimedMessage;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    // -- fakes ---------------------------------------------------------------

    #[derive(Clone, Default)]
    struct MemoryStateStore {
        states: Arc<DashMap<Uuid, ExecutionState>>,
        outbox: Arc<Mutex<Vec<OutboxEvent>>>,
    }

    impl ExecutionStateStore for MemoryStateStore {
        async fn save(
            &self,
            state: &ExecutionState,
            _ttl_seconds: u64,
            outbox: Option<&OutboxEvent>,
        ) -> Result<(), RepositoryError> {
            self.states.insert(state.execution_id, state.clone());
            if let Some(event) = outbox {
                self.outbox.lock().unwrap().push(event.clone());
            }
            Ok(())
        }

        async fn load(&self, id: &Uuid) -> Result<Option<ExecutionState>, RepositoryError> {
            Ok(self.states.get(id).map(|s| s.clone()))
        }

        async fn list_recent(&self, limit: u32) -> Result<Vec<ExecutionState>, RepositoryError> {
            let mut all: Vec<_> = self.states.iter().map(|e| e.value().clone()).collect();
            all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            all.truncate(limit as usize);
            Ok(all)
        }
    }

    #[derive(Clone, Default)]
    struct MemoryQueue {
        pending: Arc<Mutex<VecDeque<(Uuid, StepTriggerMessage)>>>,
    }

    impl StepQueue for MemoryQueue {
        async fn enqueue(
            &self,
            message: &StepTriggerMessage,
            _delay_ms: u64,
        ) -> Result<(), QueueError> {
            self.pending
                .lock()
                .unwrap()
                .push_back((Uuid::now_v7(), message.clone()));
            Ok(())
        }

        async fn claim_next(&self, _owner: &str) -> Result<Option<ClaimedMessage>, QueueError> {
            Ok(self
                .pending
                .lock()
                .unwrap()
                .pop_front()
                .map(|(id, message)| ClaimedMessage { id, message }))
        }

        async fn ack(&self, _id: &Uuid) -> Result<(), QueueError> {
            Ok(())
        }

        async fn nack(&self, _id: &Uuid, _delay_ms: u64) -> Result<(), QueueError> {
            Ok(())
        }

        async fn pending_count(&self) -> Result<u64, QueueError> {
            Ok(self.pending.lock().unwrap().len() as u64)
        }
    }

    #[derive(Clone, Default)]
    struct MemoryLockStore {
        locks: Arc<DashMap<String, LockRecord>>,
    }

    impl LockStore for MemoryLockStore {
        async fn try_insert(&self, record: &LockRecord) -> Result<bool, LockError> {
            let now = Utc::now();
            match self.locks.entry(record.lock_key.clone()) {
                dashmap::mapref::entry::Entry::Vacant(e) => {
                    e.insert(record.clone());
                    Ok(true)
                }
                dashmap::mapref::entry::Entry::Occupied(mut e) => {
                    if e.get().is_expired(now) {
                        e.insert(record.clone());
                        Ok(true)
                    } else {
                        Ok(false)
                    }
                }
            }
        }

        async fn get(&self, key: &str) -> Result<Option<LockRecord>, LockError> {
            Ok(self.locks.get(key).map(|r| r.clone()))
        }

        async fn remove_if_owner(&self, key: &str, owner: &str) -> Result<bool, LockError> {
            Ok(self
                .locks
                .remove_if(key, |_, r| r.owner_id == owner)
                .is_some())
        }

        async fn force_remove(&self, key: &str) -> Result<(), LockError> {
            self.locks.remove(key);
            Ok(())
        }

        async fn update_ttl_if_owner(
            &self,
            key: &str,
            owner: &str,
            _ttl: u64,
        ) -> Result<bool, LockError> {
            if let Some(mut r) = self.locks.get_mut(key) {
                if r.owner_id == owner {
                    r.acquired_at = Utc::now();
                    return Ok(true);
                }
            }
            Ok(false)
        }

        async fn scan(&self, prefix: &str) -> Result<Vec<LockRecord>, LockError> {
            Ok(self
                .locks
                .iter()
                .filter(|e| e.key().starts_with(prefix))
                .map(|e| e.value().clone())
                .collect())
        }
    }

    /// Records every call and fails tools a configured number of times.
    #[derive(Clone, Default)]
    struct FakeTools {
        calls: Arc<Mutex<Vec<String>>>,
        failures_remaining: Arc<Mutex<HashMap<String, u32>>>,
    }

    impl FakeTools {
        fn fail_times(&self, tool: &str, times: u32) {
            self.failures_remaining
                .lock()
                .unwrap()
                .insert(tool.to_string(), times);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ToolExecutor for FakeTools {
        async fn execute(
            &self,
            tool_name: &str,
            _parameters: &serde_json::Value,
        ) -> Result<serde_json::Value, ToolError> {
            self.calls.lock().unwrap().push(tool_name.to_string());
            let mut failures = self.failures_remaining.lock().unwrap();
            if let Some(n) = failures.get_mut(tool_name) {
                if *n > 0 {
                    *n -= 1;
                    return Err(ToolError::Failed {
                        tool_name: tool_name.to_string(),
                        message: "injected failure".to_string(),
                    });
                }
            }
            Ok(json!({ "tool": tool_name }))
        }
    }

    // -- harness -------------------------------------------------------------

    struct Harness {
        scheduler: StepScheduler<MemoryStateStore, MemoryLockStore, MemoryQueue, FakeTools>,
        store: MemoryStateStore,
        queue: MemoryQueue,
        tools: FakeTools,
    }

    fn harness(config: EngineConfig) -> Harness {
        let store = MemoryStateStore::default();
        let queue = MemoryQueue::default();
        let tools = FakeTools::default();
        let tracer = ExecutionTracer::new(256);
        let locks = LockManager::new(
            MemoryLockStore::default(),
            config.step_lock_ttl_seconds,
            config.lock_grace_seconds,
            tracer.clone(),
        );
        let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
        let scheduler = StepScheduler::new(
            store.clone(),
            locks,
            queue.clone(),
            tools.clone(),
            breakers,
            tracer,
            config,
        );
        Harness {
            scheduler,
            store,
            queue,
            tools,
        }
    }

    fn query_step(id: &str) -> PlanStep {
        PlanStep {
            id: id.to_string(),
            tool_name: format!("tool_{id}"),
            category: ToolCategory::Query,
            parameters: json!({}),
            requires_confirmation: false,
            risk_score: 0,
            compensation: None,
        }
    }

    fn plan(steps: Vec<PlanStep>) -> Plan {
        Plan {
            id: Uuid::now_v7(),
            steps,
        }
    }

    /// Claim and handle triggers until the queue drains.
    async fn drain(h: &Harness) -> Vec<StepOutcome> {
        let mut outcomes = Vec::new();
        while let Some(claimed) = h.queue.claim_next("test-worker").await.unwrap() {
            let outcome = h
                .scheduler
                .handle_step_trigger(&claimed.message)
                .await
                .unwrap();
            h.queue.ack(&claimed.id).await.unwrap();
            outcomes.push(outcome);
        }
        outcomes
    }

    // -- tests ---------------------------------------------------------------

    #[tokio::test]
    async fn three_step_plan_runs_to_completion() {
        let h = harness(EngineConfig::default());
        let started = h
            .scheduler
            .start_execution(
                plan(vec![query_step("a"), query_step("b"), query_step("c")]),
                false,
                "tr-1".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(started.status, ExecutionStatus::Executing);

        let outcomes = drain(&h).await;
        assert_eq!(
            outcomes,
            vec![
                StepOutcome::Advanced { next_step: 1 },
                StepOutcome::Advanced { next_step: 2 },
                StepOutcome::Completed,
            ]
        );

        let state = h
            .scheduler
            .get_execution(&started.execution_id)
            .await
            .unwrap();
        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.current_step_index, 3);
        assert_eq!(h.tools.calls(), vec!["tool_a", "tool_b", "tool_c"]);

        // One transition per completed step, plus start and completion.
        let step_completions = state
            .transitions
            .iter()
            .filter(|t| {
                t.from == ExecutionStatus::Executing && t.to == ExecutionStatus::Executing
            })
            .count();
        assert_eq!(step_completions, 3);
        assert_eq!(state.transitions.len(), 5);
    }

    #[tokio::test]
    async fn duplicate_trigger_is_discarded_without_rerunning_the_tool() {
        let h = harness(EngineConfig::default());
        let started = h
            .scheduler
            .start_execution(plan(vec![query_step("a")]), false, "tr-1".to_string())
            .await
            .unwrap();
        drain(&h).await;
        assert_eq!(h.tools.calls().len(), 1);

        // Redelivery of the already handled trigger.
        let duplicate = StepTriggerMessage {
            execution_id: started.execution_id,
            step_index: 0,
            attempt_count: 1,
            max_attempts: 3,
            trace_id: "tr-1".to_string(),
        };
        let outcome = h.scheduler.handle_step_trigger(&duplicate).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Discarded { .. }));
        assert_eq!(h.tools.calls().len(), 1);
    }

    #[tokio::test]
    async fn held_lock_discards_the_trigger() {
        let h = harness(EngineConfig::default());
        let started = h
            .scheduler
            .start_execution(plan(vec![query_step("a")]), false, "tr-1".to_string())
            .await
            .unwrap();

        // Another worker holds the step 0 lock.
        let key = step_lock_key(&started.execution_id, 0);
        let acquired = h.scheduler.locks().acquire(&key, "step", "tr-x").await.unwrap();
        assert!(acquired.is_acquired());

        let outcomes = drain(&h).await;
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], StepOutcome::Discarded { reason } if reason.contains("lock")));
        assert!(h.tools.calls().is_empty());
    }

    #[tokio::test]
    async fn rejected_plan_schedules_nothing() {
        let h = harness(EngineConfig::default());
        let mut pay = query_step("pay");
        pay.category = ToolCategory::Payment;

        let state = h
            .scheduler
            .start_execution(plan(vec![pay]), false, "tr-1".to_string())
            .await
            .unwrap();
        assert_eq!(state.status, ExecutionStatus::Rejected);
        assert_eq!(h.queue.pending_count().await.unwrap(), 0);
        assert!(h.tools.calls().is_empty());

        // The rejection is persisted with its violation code.
        let loaded = h
            .scheduler
            .get_execution(&state.execution_id)
            .await
            .unwrap();
        let metadata = loaded.transitions[0].metadata.as_ref().unwrap();
        assert_eq!(
            metadata["violation"],
            "POLICY_VIOLATION_HIGH_RISK_UNCONFIRMED"
        );
    }

    #[tokio::test]
    async fn confirmation_pauses_then_resume_completes() {
        let h = harness(EngineConfig::default());
        let mut pay = query_step("pay");
        pay.category = ToolCategory::Payment;
        pay.requires_confirmation = true;

        let started = h
            .scheduler
            .start_execution(
                plan(vec![query_step("a"), pay, query_step("c")]),
                false,
                "tr-1".to_string(),
            )
            .await
            .unwrap();

        let outcomes = drain(&h).await;
        assert_eq!(
            outcomes.last(),
            Some(&StepOutcome::AwaitingConfirmation)
        );
        assert_eq!(h.tools.calls(), vec!["tool_a"]);

        let paused = h
            .scheduler
            .get_execution(&started.execution_id)
            .await
            .unwrap();
        assert_eq!(paused.status, ExecutionStatus::AwaitingConfirmation);
        assert_eq!(paused.current_step_index, 1);

        let resumed = h
            .scheduler
            .resume_execution(&started.execution_id)
            .await
            .unwrap();
        assert_eq!(resumed.status, ExecutionStatus::Executing);
        assert_eq!(resumed.segment_number, 1);

        let outcomes = drain(&h).await;
        assert_eq!(outcomes.last(), Some(&StepOutcome::Completed));
        assert_eq!(h.tools.calls(), vec!["tool_a", "tool_pay", "tool_c"]);

        let done = h
            .scheduler
            .get_execution(&started.execution_id)
            .await
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert!(done.is_step_confirmed(1));
    }

    #[tokio::test]
    async fn global_confirmation_flag_pauses_every_step() {
        let h = harness(EngineConfig::default());
        let started = h
            .scheduler
            .start_execution(
                plan(vec![query_step("a"), query_step("b")]),
                true,
                "tr-1".to_string(),
            )
            .await
            .unwrap();

        // Pauses before step 0.
        drain(&h).await;
        assert!(h.tools.calls().is_empty());

        h.scheduler
            .resume_execution(&started.execution_id)
            .await
            .unwrap();
        drain(&h).await;
        assert_eq!(h.tools.calls(), vec!["tool_a"]);

        h.scheduler
            .resume_execution(&started.execution_id)
            .await
            .unwrap();
        drain(&h).await;
        assert_eq!(h.tools.calls(), vec!["tool_a", "tool_b"]);

        let done = h
            .scheduler
            .get_execution(&started.execution_id)
            .await
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.segment_number, 2);
    }

    #[tokio::test]
    async fn transient_failure_retries_then_succeeds() {
        let h = harness(EngineConfig::default());
        h.tools.fail_times("tool_a", 1);

        let started = h
            .scheduler
            .start_execution(plan(vec![query_step("a")]), false, "tr-1".to_string())
            .await
            .unwrap();

        let outcomes = drain(&h).await;
        assert!(matches!(outcomes[0], StepOutcome::Retry { .. }));
        assert_eq!(outcomes.last(), Some(&StepOutcome::Completed));
        assert_eq!(h.tools.calls().len(), 2);

        let state = h
            .scheduler
            .get_execution(&started.execution_id)
            .await
            .unwrap();
        assert_eq!(state.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn retries_exhausted_without_compensation_fails() {
        let h = harness(EngineConfig::default());
        h.tools.fail_times("tool_a", 10);

        let started = h
            .scheduler
            .start_execution(plan(vec![query_step("a")]), false, "tr-1".to_string())
            .await
            .unwrap();

        let outcomes = drain(&h).await;
        assert_eq!(outcomes.last(), Some(&StepOutcome::Failed));
        // max_step_attempts deliveries, each calling the tool once.
        assert_eq!(h.tools.calls().len(), 3);

        let state = h
            .scheduler
            .get_execution(&started.execution_id)
            .await
            .unwrap();
        assert_eq!(state.status, ExecutionStatus::Failed);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn retries_exhausted_compensates_in_reverse_order() {
        let h = harness(EngineConfig::default());
        h.tools.fail_times("tool_c", 10);

        let mut a = query_step("a");
        a.compensation = Some(CompensationSpec {
            tool_name: "undo_a".to_string(),
            parameters: json!({}),
        });
        let mut b = query_step("b");
        b.compensation = Some(CompensationSpec {
            tool_name: "undo_b".to_string(),
            parameters: json!({}),
        });

        let started = h
            .scheduler
            .start_execution(plan(vec![a, b, query_step("c")]), false, "tr-1".to_string())
            .await
            .unwrap();

        let outcomes = drain(&h).await;
        assert_eq!(outcomes.last(), Some(&StepOutcome::Compensated));

        assert_eq!(
            h.tools.calls(),
            vec![
                "tool_a", "tool_b", "tool_c", "tool_c", "tool_c", "undo_b", "undo_a"
            ]
        );

        let state = h
            .scheduler
            .get_execution(&started.execution_id)
            .await
            .unwrap();
        assert_eq!(state.status, ExecutionStatus::Compensated);
    }

    #[tokio::test]
    async fn open_circuit_fails_fast_without_calling_the_tool() {
        let mut config = EngineConfig::default();
        config.max_step_attempts = 1;
        config.breaker = BreakerConfig {
            failure_threshold: 1,
            failure_window_ms: 60_000,
            recovery_timeout_ms: 60_000,
            success_threshold: 1,
        };
        let h = harness(config);

        // Trip the breaker for the step's service before anything runs.
        h.scheduler.breakers().get("tool_a").record_failure();

        let started = h
            .scheduler
            .start_execution(plan(vec![query_step("a")]), false, "tr-1".to_string())
            .await
            .unwrap();

        let outcomes = drain(&h).await;
        assert_eq!(outcomes.last(), Some(&StepOutcome::Failed));
        assert!(h.tools.calls().is_empty());

        let state = h
            .scheduler
            .get_execution(&started.execution_id)
            .await
            .unwrap();
        assert_eq!(state.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn open_circuit_with_attempts_left_schedules_a_backoff_retry() {
        let mut config = EngineConfig::default();
        config.breaker = BreakerConfig {
            failure_threshold: 1,
            failure_window_ms: 60_000,
            recovery_timeout_ms: 60_000,
            success_threshold: 1,
        };
        let h = harness(config);
        h.scheduler.breakers().get("tool_a").record_failure();

        h.scheduler
            .start_execution(plan(vec![query_step("a")]), false, "tr-1".to_string())
            .await
            .unwrap();

        let claimed = h.queue.claim_next("w").await.unwrap().unwrap();
        let outcome = h
            .scheduler
            .handle_step_trigger(&claimed.message)
            .await
            .unwrap();
        let StepOutcome::Retry { backoff_ms } = outcome else {
            panic!("expected retry, got {outcome:?}");
        };
        assert!(backoff_ms >= 2_000);

        // The retry trigger carries an incremented attempt count.
        let retry = h.queue.claim_next("w").await.unwrap().unwrap();
        assert_eq!(retry.message.attempt_count, 2);
        assert!(h.tools.calls().is_empty());
    }

    #[tokio::test]
    async fn cancelled_execution_discards_pending_triggers() {
        let h = harness(EngineConfig::default());
        let started = h
            .scheduler
            .start_execution(
                plan(vec![query_step("a"), query_step("b")]),
                false,
                "tr-1".to_string(),
            )
            .await
            .unwrap();

        let cancelled = h
            .scheduler
            .cancel_execution(&started.execution_id)
            .await
            .unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);

        let outcomes = drain(&h).await;
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, StepOutcome::Discarded { .. })));
        assert!(h.tools.calls().is_empty());

        // Terminal states refuse a second cancel.
        let err = h.scheduler.cancel_execution(&started.execution_id).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn every_persist_carries_an_outbox_event() {
        let h = harness(EngineConfig::default());
        let started = h
            .scheduler
            .start_execution(plan(vec![query_step("a")]), false, "tr-1".to_string())
            .await
            .unwrap();
        drain(&h).await;

        let events = h.store.outbox.lock().unwrap().clone();
        // Start persist plus completion persist.
        assert_eq!(events.len(), 2);
        let key = format!("exec:{}", started.execution_id);
        assert!(events.iter().all(|e| e.payload.cache_key == key));
        // The last event carries the terminal status.
        assert_eq!(
            events.last().unwrap().payload.value["status"],
            "COMPLETED"
        );
    }

    #[tokio::test]
    async fn unknown_execution_trigger_is_discarded() {
        let h = harness(EngineConfig::default());
        let msg = StepTriggerMessage {
            execution_id: Uuid::now_v7(),
            step_index: 0,
            attempt_count: 1,
            max_attempts: 3,
            trace_id: "tr-x".to_string(),
        };
        let outcome = h.scheduler.handle_step_trigger(&msg).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Discarded { .. }));
    }
}
