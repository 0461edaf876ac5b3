//! Tool traits.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::PonderResult;

/// A single named capability.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn execute(&self, args: &serde_json::Value) -> PonderResult<String>;
}

/// Executes tools by name. The tracker enforces `timeout` regardless of
/// whether the backend honours it.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        args: &serde_json::Value,
        timeout: Duration,
    ) -> PonderResult<String>;
}
