//! Tool executor trait.
//!
//! Executes a single plan step (or compensation call) against whatever
//! backs the tool, and names the service each tool belongs to so calls can
//! be routed through the right circuit breaker.

use sagaflow_types::error::ToolError;

/// Executes tool calls on behalf of the scheduler.
pub trait ToolExecutor: Send + Sync {
    /// Run a tool with the given parameters, returning its JSON output.
    fn execute(
        &self,
        tool_name: &str,
        parameters: &serde_json::Value,
    ) -> impl std::future::Future<Output = Result<serde_json::Value, ToolError>> + Send;

    /// Breaker key for the service behind `tool_name`.
    ///
    /// Tools sharing a backend share a breaker; the default is one breaker
    /// per tool.
    fn service_key(&self, tool_name: &str) -> String {
        tool_name.to_string()
    }
}
