//! Interpreter trait: raw events in, thoughts out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::PonderResult;
use crate::types::{Priority, RawEvent, SearchHit, Thought};

/// A tool invocation requested by interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            args,
        }
    }
}

/// Interpretation of one raw event (or one idle reflection).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interpretation {
    pub content: String,
    /// Overrides the source-tag priority when set.
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Instruction keys whose detail should be shown for a while.
    #[serde(default)]
    pub instructions: Vec<String>,
}

impl Interpretation {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }

    pub fn with_instruction(mut self, key: impl Into<String>) -> Self {
        self.instructions.push(key.into());
        self
    }
}

/// Flavour of idle thinking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReflectionMode {
    /// Look back over retrieved memories.
    Reflective,
    /// Think about what to do next.
    Planning,
}

/// What the interpreter sees besides the events themselves.
#[derive(Debug, Clone, Default)]
pub struct InterpretContext {
    pub recent_thoughts: Vec<Thought>,
    /// Instruction keys currently inside their TTL.
    pub active_instructions: Vec<String>,
    /// In-flight actions and recent failures, pre-rendered.
    pub tool_awareness: String,
    pub memories: Vec<SearchHit>,
}

/// Turns raw events into thought content.
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Interpret a batch in one call. Must return one entry per event, in order.
    async fn interpret(
        &self,
        events: &[RawEvent],
        context: &InterpretContext,
    ) -> PonderResult<Vec<Interpretation>>;

    /// Produce a single idle thought.
    async fn reflect(
        &self,
        mode: ReflectionMode,
        context: &InterpretContext,
    ) -> PonderResult<Interpretation>;
}
