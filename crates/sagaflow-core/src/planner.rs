//! Plan provider trait.
//!
//! The plan generator is an external black box. The engine hands it the
//! user's goal and receives a typed [`Plan`], which then goes through the
//! verification gate before anything is scheduled.

use sagaflow_types::error::PlanError;
use sagaflow_types::plan::Plan;

/// Produces a plan for a goal.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait PlanProvider: Send + Sync {
    /// Generate a plan for the given goal text.
    ///
    /// Returns `ClarificationRequired` when the goal is too ambiguous to
    /// plan; the API surfaces that to the caller instead of executing.
    fn generate(
        &self,
        goal: &str,
        context: Option<&serde_json::Value>,
    ) -> impl std::future::Future<Output = Result<Plan, PlanError>> + Send;
}
