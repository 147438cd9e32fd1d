//! In-process queue worker and relay tick.
//!
//! The worker claims one trigger at a time and hands it to the scheduler.
//! Retry scheduling belongs to the scheduler (it enqueues a fresh delayed
//! trigger), so a handled message is always acked; only an orchestration
//! error nacks the claim for redelivery. The relay tick drains the outbox
//! into the read cache.

use std::time::Duration;

use sagaflow_core::repository::{ClaimedMessage, StepQueue};
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);
const RELAY_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run_worker(state: AppState, worker_id: String, shutdown: CancellationToken) {
    tracing::info!(worker_id, "step worker started");
    loop {
        let claimed = tokio::select! {
            _ = shutdown.cancelled() => break,
            claimed = state.queue.claim_next(&worker_id) => claimed,
        };
        match claimed {
            Ok(Some(claimed)) => settle(&state, claimed).await,
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "queue claim failed");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
            }
        }
    }
    tracing::info!(worker_id, "step worker stopped");
}

pub(crate) async fn settle(state: &AppState, claimed: ClaimedMessage) {
    match state.scheduler.handle_step_trigger(&claimed.message).await {
        Ok(outcome) => {
            tracing::debug!(
                execution_id = %claimed.message.execution_id,
                step_index = claimed.message.step_index,
                outcome = ?outcome,
                "step trigger handled"
            );
            if let Err(err) = state.queue.ack(&claimed.id).await {
                tracing::warn!(error = %err, "failed to ack handled trigger");
            }
        }
        Err(err) => {
            // The scheduler already marked the execution failed where it
            // could; redeliver in case the failure was the store itself.
            tracing::error!(
                execution_id = %claimed.message.execution_id,
                step_index = claimed.message.step_index,
                error = %err,
                "step trigger failed"
            );
            if let Err(nack_err) = state
                .queue
                .nack(&claimed.id, state.config.retry_backoff_ms)
                .await
            {
                tracing::warn!(error = %nack_err, "failed to nack trigger");
            }
        }
    }
}

pub async fn run_relay_tick(state: AppState, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(RELAY_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if let Err(err) = state.relay.run_once().await {
                    tracing::warn!(error = %err, "outbox relay pass failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_state;
    use sagaflow_types::execution::StepTriggerMessage;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_unknown_execution_is_settled_and_acked() {
        let state = test_state().await;
        let message = StepTriggerMessage {
            execution_id: Uuid::now_v7(),
            step_index: 0,
            attempt_count: 1,
            max_attempts: 3,
            trace_id: "tr-test".to_string(),
        };
        state.queue.enqueue(&message, 0).await.unwrap();

        let claimed = state.queue.claim_next("w-test").await.unwrap().unwrap();
        settle(&state, claimed).await;

        // Discarded and acked, so the queue is drained.
        assert!(state.queue.claim_next("w-test").await.unwrap().is_none());
        assert_eq!(state.queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_worker() {
        let state = test_state().await;
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_worker(
            state,
            "w-shutdown".to_string(),
            shutdown.clone(),
        ));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
