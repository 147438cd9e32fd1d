//! Circuit breaker configuration and state types.
//!
//! The breaker itself lives in `sagaflow-core`; this module holds the
//! config, state vocabulary, and the transition events published when a
//! breaker changes state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Breaker state. `Open` converts to `HalfOpen` lazily when the recovery
/// timeout has elapsed at read time; no background timer is involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

/// Tunables for one circuit breaker. Loaded from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures within the window that trip the breaker open.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Sliding window over which failures are counted, in milliseconds.
    #[serde(default = "default_failure_window_ms")]
    pub failure_window_ms: u64,
    /// How long an open breaker rejects calls before probing, in milliseconds.
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
    /// Consecutive half-open successes required to close again.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_failure_window_ms() -> u64 {
    60_000
}

fn default_recovery_timeout_ms() -> u64 {
    30_000
}

fn default_success_threshold() -> u32 {
    2
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_window_ms: default_failure_window_ms(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// Published on the event bus whenever a breaker changes state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerTransition {
    pub service_key: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of a breaker, for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub service_key: String,
    pub state: CircuitState,
    /// Failures currently inside the sliding window.
    pub recent_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Milliseconds until an open breaker will probe, 0 if not open.
    pub retry_after_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_state_serde() {
        assert_eq!(
            serde_json::to_string(&CircuitState::HalfOpen).unwrap(),
            "\"HALF_OPEN\""
        );
        let parsed: CircuitState = serde_json::from_str("\"OPEN\"").unwrap();
        assert_eq!(parsed, CircuitState::Open);
    }

    #[test]
    fn test_breaker_config_defaults() {
        let cfg = BreakerConfig::default();
        assert_eq!(cfg.failure_threshold, 5);
        assert_eq!(cfg.failure_window_ms, 60_000);
        assert_eq!(cfg.recovery_timeout_ms, 30_000);
        assert_eq!(cfg.success_threshold, 2);
    }

    #[test]
    fn test_breaker_config_partial_toml() {
        let cfg: BreakerConfig = toml::from_str("failure_threshold = 3").unwrap();
        assert_eq!(cfg.failure_threshold, 3);
        assert_eq!(cfg.success_threshold, 2);
    }
}
