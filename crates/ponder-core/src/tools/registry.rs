//! Explicit tool registration.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{PonderError, PonderResult};
use crate::traits::{Tool, ToolBackend};

/// Name-indexed tool set. Tools are registered explicitly at startup and can
/// be disabled at runtime.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    disabled: RwLock<HashSet<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name, replacing any previous one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        let name = tool.name().to_string();
        debug!(tool = %name, "Tool registered");
        self.tools.insert(name, tool);
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn disable(&self, name: &str) {
        self.disabled
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string());
    }

    pub fn enable(&self, name: &str) {
        self.disabled
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.tools.contains_key(name)
            && !self
                .disabled
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .contains(name)
    }

    /// One `name: description` line per enabled tool.
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .filter(|(name, _)| self.is_enabled(name))
            .map(|(name, tool)| format!("{}: {}", name, tool.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolBackend for ToolRegistry {
    async fn execute(
        &self,
        tool_name: &str,
        args: &serde_json::Value,
        _timeout: Duration,
    ) -> PonderResult<String> {
        let tool = self
            .get(tool_name)
            .ok_or_else(|| PonderError::tool_not_found(tool_name))?;
        if !self.is_enabled(tool_name) {
            return Err(PonderError::tool(tool_name, "tool is disabled"));
        }
        tool.execute(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "uppercase the text argument"
        }

        async fn execute(&self, args: &serde_json::Value) -> PonderResult<String> {
            args.get("text")
                .and_then(|t| t.as_str())
                .map(|t| t.to_uppercase())
                .ok_or_else(|| PonderError::tool("upper", "missing text"))
        }
    }

    #[tokio::test]
    async fn test_execute_registered_tool() {
        let registry = ToolRegistry::new().with_tool(Arc::new(Upper));
        let out = registry
            .execute("upper", &serde_json::json!({"text": "hi"}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, "HI");
        assert_eq!(registry.describe(), "upper: uppercase the text argument");
    }

    #[tokio::test]
    async fn test_unknown_and_disabled() {
        let registry = ToolRegistry::new().with_tool(Arc::new(Upper));
        let err = registry
            .execute("nope", &serde_json::Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ToolNotFound);

        registry.disable("upper");
        assert!(!registry.is_enabled("upper"));
        assert!(registry
            .execute("upper", &serde_json::json!({"text": "x"}), Duration::from_secs(1))
            .await
            .is_err());
        registry.enable("upper");
        assert!(registry.is_enabled("upper"));
    }
}
