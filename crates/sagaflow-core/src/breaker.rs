//! Per-service circuit breakers.
//!
//! Failure counting uses a sliding window of timestamps, so old failures age
//! out continuously instead of resetting on a bucket boundary. An open
//! breaker converts to half-open lazily when its recovery timeout has
//! elapsed at call time; there is no background timer. State transitions are
//! published on a broadcast channel for status reporting.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use sagaflow_types::breaker::{BreakerConfig, BreakerSnapshot, BreakerTransition, CircuitState};
use sagaflow_types::error::ToolError;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure surfaced by a breaker-wrapped call.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    /// The breaker rejected the call without invoking the service.
    #[error("circuit open for {service_key}, retry after {retry_after_ms}ms")]
    CircuitOpen {
        service_key: String,
        retry_after_ms: u64,
    },

    /// The call went through and failed; the failure was recorded.
    #[error(transparent)]
    Call(#[from] ToolError),
}

// ---------------------------------------------------------------------------
// Breaker
// ---------------------------------------------------------------------------

struct BreakerInner {
    state: CircuitState,
    /// Failure instants inside the sliding window, oldest first.
    failure_timestamps: Vec<Instant>,
    /// Consecutive successes while half-open.
    success_count: u32,
    last_failure_at: Option<chrono::DateTime<chrono::Utc>>,
    /// When the breaker last entered its current state.
    last_state_change: Instant,
}

/// Circuit breaker for one downstream service.
pub struct CircuitBreaker {
    service_key: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    transitions: broadcast::Sender<BreakerTransition>,
}

impl CircuitBreaker {
    pub fn new(
        service_key: impl Into<String>,
        config: BreakerConfig,
        transitions: broadcast::Sender<BreakerTransition>,
    ) -> Self {
        Self {
            service_key: service_key.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_timestamps: Vec::new(),
                success_count: 0,
                last_failure_at: None,
                last_state_change: Instant::now(),
            }),
            transitions,
        }
    }

    pub fn service_key(&self) -> &str {
        &self.service_key
    }

    /// Current state, applying the lazy open-to-half-open conversion.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.effective_state(&mut inner)
    }

    /// Run `f` through the breaker.
    ///
    /// Open: rejects immediately with the remaining recovery time. Half-open
    /// or closed: invokes `f`, then records the outcome.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ToolError>>,
    {
        {
            let mut inner = self.lock_inner();
            if self.effective_state(&mut inner) == CircuitState::Open {
                let elapsed = inner.last_state_change.elapsed().as_millis() as u64;
                let retry_after_ms = self.config.recovery_timeout_ms.saturating_sub(elapsed);
                return Err(BreakerError::CircuitOpen {
                    service_key: self.service_key.clone(),
                    retry_after_ms,
                });
            }
        }

        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(BreakerError::Call(err))
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.lock_inner();
        match self.effective_state(&mut inner) {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.failure_timestamps.clear();
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Closed => {}
            // Open rejects before calling; a success here means the caller
            // bypassed execute(), treat it as a half-open probe.
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.lock_inner();
        inner.last_failure_at = Some(Utc::now());

        match self.effective_state(&mut inner) {
            CircuitState::HalfOpen => {
                // A probe failure re-opens immediately.
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Closed => {
                let window = Duration::from_millis(self.config.failure_window_ms);
                inner.failure_timestamps.push(now);
                inner
                    .failure_timestamps
                    .retain(|t| now.duration_since(*t) <= window);
                if inner.failure_timestamps.len() as u32 >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Point-in-time snapshot for status reporting.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.lock_inner();
        let state = self.effective_state(&mut inner);
        let now = Instant::now();
        let window = Duration::from_millis(self.config.failure_window_ms);
        let recent = inner
            .failure_timestamps
            .iter()
            .filter(|t| now.duration_since(**t) <= window)
            .count() as u32;
        let retry_after_ms = if state == CircuitState::Open {
            let elapsed = inner.last_state_change.elapsed().as_millis() as u64;
            self.config.recovery_timeout_ms.saturating_sub(elapsed)
        } else {
            0
        };
        BreakerSnapshot {
            service_key: self.service_key.clone(),
            state,
            recent_failures: recent,
            last_failure_at: inner.last_failure_at,
            retry_after_ms,
        }
    }

    fn effective_state(&self, inner: &mut BreakerInner) -> CircuitState {
        if inner.state == CircuitState::Open {
            let elapsed = inner.last_state_change.elapsed();
            if elapsed >= Duration::from_millis(self.config.recovery_timeout_ms) {
                self.transition(inner, CircuitState::HalfOpen);
            }
        }
        inner.state
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.last_state_change = Instant::now();
        inner.success_count = 0;
        tracing::info!(service = %self.service_key, %from, %to, "breaker state change");
        let _ = self.transitions.send(BreakerTransition {
            service_key: self.service_key.clone(),
            from,
            to,
            at: Utc::now(),
        });
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // The mutex only guards plain bookkeeping; a poisoned guard still
        // holds consistent-enough data to continue.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One breaker per service key, created on first use.
pub struct BreakerRegistry {
    breakers: DashMap<String, std::sync::Arc<CircuitBreaker>>,
    config: BreakerConfig,
    transitions: broadcast::Sender<BreakerTransition>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        let (transitions, _) = broadcast::channel(256);
        Self {
            breakers: DashMap::new(),
            config,
            transitions,
        }
    }

    /// Get or create the breaker for a service.
    pub fn get(&self, service_key: &str) -> std::sync::Arc<CircuitBreaker> {
        self.breakers
            .entry(service_key.to_string())
            .or_insert_with(|| {
                std::sync::Arc::new(CircuitBreaker::new(
                    service_key,
                    self.config.clone(),
                    self.transitions.clone(),
                ))
            })
            .clone()
    }

    /// Subscribe to state-change events across all breakers.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerTransition> {
        self.transitions.subscribe()
    }

    /// Snapshots of every breaker seen so far.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.iter().map(|e| e.value().snapshot()).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
