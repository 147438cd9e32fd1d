//! HTTP tool executor.
//!
//! Invokes tools on the tool service over HTTP. The route table maps tool
//! names to service keys so tools sharing one backend share one circuit
//! breaker; unmapped tools get a breaker of their own.

use std::collections::HashMap;

use sagaflow_core::tool::ToolExecutor;
use sagaflow_types::error::ToolError;

const TOOL_TIMEOUT_MS: u64 = 20_000;

/// Tool service reachable over HTTP.
pub struct HttpToolExecutor {
    client: reqwest::Client,
    base_url: String,
    /// tool name -> service key overrides.
    routes: HashMap<String, String>,
}

impl HttpToolExecutor {
    pub fn new(base_url: impl Into<String>, routes: HashMap<String, String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_millis(TOOL_TIMEOUT_MS))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            routes,
        }
    }
}

impl ToolExecutor for HttpToolExecutor {
    async fn execute(
        &self,
        tool_name: &str,
        parameters: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let response = self
            .client
            .post(format!("{}/tools/{tool_name}", self.base_url))
            .json(parameters)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout {
                        tool_name: tool_name.to_string(),
                        timeout_ms: TOOL_TIMEOUT_MS,
                    }
                } else {
                    ToolError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Failed {
                tool_name: tool_name.to_string(),
                message: format!("{status}: {body}"),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ToolError::Transport(format!("malformed tool output: {e}")))
    }

    fn service_key(&self, tool_name: &str) -> String {
        self.routes
            .get(tool_name)
            .cloned()
            .unwrap_or_else(|| tool_name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_key_uses_route_table() {
        let mut routes = HashMap::new();
        routes.insert("process_payment".to_string(), "payments".to_string());
        routes.insert("refund_payment".to_string(), "payments".to_string());
        let tools = HttpToolExecutor::new("http://localhost:9000", routes);

        assert_eq!(tools.service_key("process_payment"), "payments");
        assert_eq!(tools.service_key("refund_payment"), "payments");
        assert_eq!(tools.service_key("search_restaurants"), "search_restaurants");
    }
}
