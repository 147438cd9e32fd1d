//! Plan verification gate.
//!
//! A pure, synchronous policy check over a complete plan. Runs exactly once,
//! after planning and before the first step is scheduled. Verification
//! inspects declared metadata only; it never calls tools or fetches external
//! data, so the gate can be unit tested exhaustively.

use sagaflow_types::plan::{Plan, PolicyViolation, VerificationOutcome, VerificationPolicy};

/// Verify `plan` against `policy`.
///
/// Checks run in a fixed order and the first violation wins: empty plan,
/// then per-step high-risk confirmation, then aggregate risk score.
pub fn verify(plan: &Plan, policy: &VerificationPolicy) -> VerificationOutcome {
    if plan.steps.is_empty() {
        return VerificationOutcome::invalid(PolicyViolation::EmptyPlan, "plan contains no steps");
    }

    for step in &plan.steps {
        if policy.is_high_risk(step.category) && !step.requires_confirmation {
            return VerificationOutcome::invalid(
                PolicyViolation::HighRiskUnconfirmed,
                format!(
                    "step '{}' ({:?}) is high-risk but does not require confirmation",
                    step.id, step.category
                ),
            );
        }
    }

    let total = plan.total_risk_score();
    if total > policy.max_risk_score {
        return VerificationOutcome::invalid(
            PolicyViolation::RiskScoreExceeded,
            format!(
                "aggregate risk score {total} exceeds maximum {}",
                policy.max_risk_score
            ),
        );
    }

    VerificationOutcome::valid()
}
