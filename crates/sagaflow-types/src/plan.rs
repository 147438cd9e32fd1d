//! Plan and plan-verification types.
//!
//! A `Plan` is the typed output of an external plan generator (consumed as a
//! black box) and the input to the verification gate. Plans travel over the
//! wire in camelCase to match the HTTP API.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A complete multi-step plan produced by the plan generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// UUIDv7 assigned when the plan is generated.
    pub id: Uuid,
    /// Ordered steps; executed strictly in index order.
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Total aggregate risk score across all steps.
    pub fn total_risk_score(&self) -> u32 {
        self.steps.iter().map(|s| s.risk_score).sum()
    }
}

/// A single step within a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    /// User-visible step ID (e.g. "charge-card"). Unique within a plan.
    pub id: String,
    /// Name of the tool this step invokes.
    pub tool_name: String,
    /// Risk category of the tool.
    pub category: ToolCategory,
    /// Opaque parameters passed to the tool.
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Whether this step must pause for external confirmation before running.
    #[serde(default)]
    pub requires_confirmation: bool,
    /// Risk score contributed by this step (0 = harmless).
    #[serde(default)]
    pub risk_score: u32,
    /// Optional compensating action, run in reverse order when a later step
    /// exhausts its retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationSpec>,
}

/// Risk category of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Read-only lookups.
    Query,
    /// Internal data mutation with no external effect.
    Data,
    /// Money movement.
    Payment,
    /// Outbound user-visible messaging (email, SMS, push).
    Messaging,
    /// Commitments made to external parties (orders, bookings).
    ExternalCommitment,
}

/// A compensating tool call that semantically undoes a completed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationSpec {
    /// Tool to invoke for the rollback.
    pub tool_name: String,
    /// Parameters for the compensating call.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Verification policy
// ---------------------------------------------------------------------------

/// Static safety policy evaluated over a complete plan before execution.
///
/// Loaded from `config.toml` (snake_case), hence the separate casing from the
/// wire types above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationPolicy {
    /// Categories whose steps must carry `requires_confirmation = true`.
    #[serde(default = "default_high_risk_categories")]
    pub high_risk_categories: Vec<ToolCategory>,
    /// Maximum allowed aggregate risk score for a plan.
    #[serde(default = "default_max_risk_score")]
    pub max_risk_score: u32,
}

fn default_high_risk_categories() -> Vec<ToolCategory> {
    vec![
        ToolCategory::Payment,
        ToolCategory::Messaging,
        ToolCategory::ExternalCommitment,
    ]
}

fn default_max_risk_score() -> u32 {
    100
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            high_risk_categories: default_high_risk_categories(),
            max_risk_score: default_max_risk_score(),
        }
    }
}

impl VerificationPolicy {
    /// Whether the given category requires confirmation under this policy.
    pub fn is_high_risk(&self, category: ToolCategory) -> bool {
        self.high_risk_categories.contains(&category)
    }
}

// ---------------------------------------------------------------------------
// Verification outcome
// ---------------------------------------------------------------------------

/// Specific policy violation codes, so callers can distinguish "unsafe plan"
/// from "system error".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum PolicyViolation {
    /// A high-risk step does not require confirmation.
    #[serde(rename = "POLICY_VIOLATION_HIGH_RISK_UNCONFIRMED")]
    #[error("high-risk step without required confirmation")]
    HighRiskUnconfirmed,

    /// Aggregate risk score exceeds the configured maximum.
    #[serde(rename = "POLICY_VIOLATION_RISK_SCORE_EXCEEDED")]
    #[error("aggregate risk score exceeds the configured maximum")]
    RiskScoreExceeded,

    /// The plan contains no steps.
    #[serde(rename = "POLICY_VIOLATION_EMPTY_PLAN")]
    #[error("plan contains no steps")]
    EmptyPlan,
}

impl PolicyViolation {
    /// The wire-format violation code.
    pub fn code(&self) -> &'static str {
        match self {
            PolicyViolation::HighRiskUnconfirmed => "POLICY_VIOLATION_HIGH_RISK_UNCONFIRMED",
            PolicyViolation::RiskScoreExceeded => "POLICY_VIOLATION_RISK_SCORE_EXCEEDED",
            PolicyViolation::EmptyPlan => "POLICY_VIOLATION_EMPTY_PLAN",
        }
    }
}

/// Result of verifying a plan against a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    /// Whether the plan passed every policy check.
    pub valid: bool,
    /// Violation code when invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation: Option<PolicyViolation>,
    /// Human-readable explanation when invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VerificationOutcome {
    /// A passing outcome.
    pub fn valid() -> Self {
        Self {
            valid: true,
            violation: None,
            reason: None,
        }
    }

    /// A failing outcome with a specific violation and reason.
    pub fn invalid(violation: PolicyViolation, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            violation: Some(violation),
            reason: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_plan() -> Plan {
        Plan {
            id: Uuid::now_v7(),
            steps: vec![
                PlanStep {
                    id: "find-restaurant".to_string(),
                    tool_name: "search_restaurants".to_string(),
                    category: ToolCategory::Query,
                    parameters: json!({"cuisine": "thai"}),
                    requires_confirmation: false,
                    risk_score: 0,
                    compensation: None,
                },
                PlanStep {
                    id: "charge-card".to_string(),
                    tool_name: "process_payment".to_string(),
                    category: ToolCategory::Payment,
                    parameters: json!({"amountCents": 2350}),
                    requires_confirmation: true,
                    risk_score: 40,
                    compensation: Some(CompensationSpec {
                        tool_name: "refund_payment".to_string(),
                        parameters: json!({"reason": "saga rollback"}),
                    }),
                },
            ],
        }
    }

    #[test]
    fn test_plan_json_roundtrip_camel_case() {
        let plan = sample_plan();
        let json_str = serde_json::to_string(&plan).unwrap();
        assert!(json_str.contains("\"toolName\""));
        assert!(json_str.contains("\"requiresConfirmation\""));
        assert!(json_str.contains("\"riskScore\""));

        let parsed: Plan = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.steps.len(), 2);
        assert_eq!(parsed.steps[1].tool_name, "process_payment");
        assert!(parsed.steps[1].compensation.is_some());
    }

    #[test]
    fn test_plan_total_risk_score() {
        let plan = sample_plan();
        assert_eq!(plan.total_risk_score(), 40);
    }

    #[test]
    fn test_plan_step_defaults() {
        let json_str = r#"{"id": "s1", "toolName": "lookup", "category": "query"}"#;
        let step: PlanStep = serde_json::from_str(json_str).unwrap();
        assert!(!step.requires_confirmation);
        assert_eq!(step.risk_score, 0);
        assert!(step.compensation.is_none());
        assert!(step.parameters.is_null());
    }

    #[test]
    fn test_tool_category_serde() {
        for (category, expected) in [
            (ToolCategory::Query, "\"query\""),
            (ToolCategory::Payment, "\"payment\""),
            (ToolCategory::Messaging, "\"messaging\""),
            (ToolCategory::ExternalCommitment, "\"external_commitment\""),
        ] {
            let json_str = serde_json::to_string(&category).unwrap();
            assert_eq!(json_str, expected);
            let parsed: ToolCategory = serde_json::from_str(&json_str).unwrap();
            assert_eq!(parsed, category);
        }
    }

    #[test]
    fn test_default_policy_flags_payment_as_high_risk() {
        let policy = VerificationPolicy::default();
        assert!(policy.is_high_risk(ToolCategory::Payment));
        assert!(policy.is_high_risk(ToolCategory::Messaging));
        assert!(!policy.is_high_risk(ToolCategory::Query));
        assert_eq!(policy.max_risk_score, 100);
    }

    #[test]
    fn test_policy_from_toml() {
        let toml_str = r#"
high_risk_categories = ["payment"]
max_risk_score = 50
"#;
        let policy: VerificationPolicy = toml::from_str(toml_str).unwrap();
        assert_eq!(policy.high_risk_categories, vec![ToolCategory::Payment]);
        assert_eq!(policy.max_risk_score, 50);
        assert!(!policy.is_high_risk(ToolCategory::Messaging));
    }

    #[test]
    fn test_policy_violation_wire_codes() {
        let json_str = serde_json::to_string(&PolicyViolation::HighRiskUnconfirmed).unwrap();
        assert_eq!(json_str, "\"POLICY_VIOLATION_HIGH_RISK_UNCONFIRMED\"");
        assert_eq!(
            PolicyViolation::RiskScoreExceeded.code(),
            "POLICY_VIOLATION_RISK_SCORE_EXCEEDED"
        );
    }

    #[test]
    fn test_verification_outcome_constructors() {
        let ok = VerificationOutcome::valid();
        assert!(ok.valid);
        assert!(ok.violation.is_none());

        let bad = VerificationOutcome::invalid(
            PolicyViolation::EmptyPlan,
            "plan has no steps",
        );
        assert!(!bad.valid);
        assert_eq!(bad.violation, Some(PolicyViolation::EmptyPlan));
        assert_eq!(bad.reason.as_deref(), Some("plan has no steps"));
    }
}
