//! Engine configuration.
//!
//! Deserialized from `config.toml`; every field has a default so a missing or
//! partial file still yields a working configuration. The infra crate owns
//! file loading; this is just the shape.

use serde::{Deserialize, Serialize};

use crate::breaker::BreakerConfig;
use crate::plan::VerificationPolicy;

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// TTL of a step idempotency lock.
    #[serde(default = "default_step_lock_ttl_seconds")]
    pub step_lock_ttl_seconds: u64,
    /// Extra grace beyond the TTL before a lock may be forcibly reclaimed.
    #[serde(default = "default_lock_grace_seconds")]
    pub lock_grace_seconds: u64,
    /// TTL of a persisted execution state record.
    #[serde(default = "default_state_ttl_seconds")]
    pub state_ttl_seconds: u64,
    /// Delivery attempts per step before the execution fails.
    #[serde(default = "default_max_step_attempts")]
    pub max_step_attempts: u32,
    /// Backoff between step retry deliveries.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// How long a claimed queue message stays invisible before redelivery.
    #[serde(default = "default_visibility_timeout_ms")]
    pub visibility_timeout_ms: u64,
    /// Maximum pending outbox rows relayed per pass.
    #[serde(default = "default_relay_batch_size")]
    pub relay_batch_size: u32,
    /// Shared secret required on internal endpoints.
    #[serde(default)]
    pub internal_key: Option<String>,
    /// Base URL of the external plan generator.
    #[serde(default)]
    pub planner_url: Option<String>,
    /// Base URL of the tool execution service.
    #[serde(default)]
    pub tool_endpoint: Option<String>,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub policy: VerificationPolicy,
}

fn default_step_lock_ttl_seconds() -> u64 {
    60
}

fn default_lock_grace_seconds() -> u64 {
    30
}

fn default_state_ttl_seconds() -> u64 {
    86_400
}

fn default_max_step_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    2_000
}

fn default_visibility_timeout_ms() -> u64 {
    30_000
}

fn default_relay_batch_size() -> u32 {
    50
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_lock_ttl_seconds: default_step_lock_ttl_seconds(),
            lock_grace_seconds: default_lock_grace_seconds(),
            state_ttl_seconds: default_state_ttl_seconds(),
            max_step_attempts: default_max_step_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            visibility_timeout_ms: default_visibility_timeout_ms(),
            relay_batch_size: default_relay_batch_size(),
            internal_key: None,
            planner_url: None,
            tool_endpoint: None,
            breaker: BreakerConfig::default(),
            policy: VerificationPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ToolCategory;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.step_lock_ttl_seconds, 60);
        assert_eq!(cfg.max_step_attempts, 3);
        assert_eq!(cfg.breaker.failure_threshold, 5);
        assert!(cfg.policy.is_high_risk(ToolCategory::Payment));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_str = r#"
max_step_attempts = 5
internal_key = "secret"

[breaker]
failure_threshold = 2

[policy]
max_risk_score = 30
"#;
        let cfg: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.max_step_attempts, 5);
        assert_eq!(cfg.internal_key.as_deref(), Some("secret"));
        assert_eq!(cfg.step_lock_ttl_seconds, 60);
        assert_eq!(cfg.breaker.failure_threshold, 2);
        assert_eq!(cfg.breaker.success_threshold, 2);
        assert_eq!(cfg.policy.max_risk_score, 30);
    }

    #[test]
    fn test_empty_toml_is_valid() {
        let cfg: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.relay_batch_size, 50);
        assert!(cfg.planner_url.is_none());
    }
}
