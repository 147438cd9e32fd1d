//! HTTP plan provider.
//!
//! Calls the external plan generator's `/plan` endpoint and returns the
//! typed plan. The generator is a black box; only its output schema is
//! contractual. A 422 response means the goal was too ambiguous to plan.

use sagaflow_core::planner::PlanProvider;
use sagaflow_types::error::PlanError;
use sagaflow_types::plan::Plan;
use serde::Deserialize;

/// Plan generator reachable over HTTP.
pub struct HttpPlanProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ClarificationBody {
    #[serde(default)]
    message: Option<String>,
}

impl HttpPlanProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }
}

impl PlanProvider for HttpPlanProvider {
    async fn generate(
        &self,
        goal: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<Plan, PlanError> {
        let response = self
            .client
            .post(format!("{}/plan", self.base_url))
            .json(&serde_json::json!({ "goal": goal, "context": context }))
            .send()
            .await
            .map_err(|e| PlanError::Provider(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let body: ClarificationBody = response
                .json()
                .await
                .unwrap_or(ClarificationBody { message: None });
            return Err(PlanError::ClarificationRequired(
                body.message
                    .unwrap_or_else(|| "goal is too ambiguous to plan".to_string()),
            ));
        }
        if !status.is_success() {
            return Err(PlanError::Provider(format!(
                "plan generator returned {status}"
            )));
        }

        response
            .json::<Plan>()
            .await
            .map_err(|e| PlanError::Invalid(format!("malformed plan: {e}")))
    }
}
