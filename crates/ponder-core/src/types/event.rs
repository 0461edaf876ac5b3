//! Raw input events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Priority;

/// Well-known event source tags.
pub mod source {
    pub const URGENT_REMINDER: &str = "urgent_reminder";
    pub const DIRECT_MENTION: &str = "direct_mention";
    pub const CHAT_DIRECT_MENTION: &str = "chat_direct_mention";

    pub const USER_INPUT: &str = "user_input";
    pub const CHAT_QUESTION: &str = "chat_question";
    pub const TOOL_TIMEOUT: &str = "tool_timeout";
    pub const TOOL_FAILED: &str = "tool_failed";
    pub const TOOL_ERROR: &str = "tool_error";
    pub const TOOL_ENFORCEMENT: &str = "tool_enforcement";
    pub const TOOL_DISABLED: &str = "tool_disabled";
    pub const TOOL_THROTTLED: &str = "tool_throttled";

    pub const CHAT_MESSAGE: &str = "chat_message";
    pub const VISION_RESULT: &str = "vision_result";
    pub const SEARCH_RESULT: &str = "search_result";
    pub const MEMORY_RESULT: &str = "memory_result";
    pub const TOOL_INITIATED: &str = "tool_initiated";
    pub const TOOL_RESULT: &str = "tool_result";
    pub const TOOL_INSTRUCTIONS: &str = "tool_instructions";
    pub const CHAT_ENGAGEMENT: &str = "chat_engagement";
    pub const TOOL_CANCELLED: &str = "tool_cancelled";

    pub const TOOL_PENDING: &str = "tool_pending";
    pub const OBSERVATION: &str = "observation";
    pub const INTERNAL: &str = "internal";
    pub const PROACTIVE_REFLECTION: &str = "proactive_reflection";
    pub const PROACTIVE_PLANNING: &str = "proactive_planning";
    pub const AMBIENT: &str = "ambient";
    pub const RESPONSE_ECHO: &str = "response_echo";
}

/// An unprocessed input from an adapter or a finished tool action.
///
/// Immutable once created; the scheduler consumes each event exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: Uuid,
    pub source_tag: String,
    pub payload_text: String,
    pub received_at: DateTime<Utc>,
    /// Takes precedence over the source-tag classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_override: Option<Priority>,
}

impl RawEvent {
    /// Create an event received now.
    pub fn new(source_tag: impl Into<String>, payload_text: impl Into<String>) -> Self {
        Self::at(source_tag, payload_text, Utc::now())
    }

    /// Create an event with an explicit receive time.
    pub fn at(
        source_tag: impl Into<String>,
        payload_text: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_tag: source_tag.into(),
            payload_text: payload_text.into(),
            received_at,
            priority_override: None,
        }
    }

    /// Convenience constructor for a user message.
    pub fn user_input(text: impl Into<String>) -> Self {
        Self::new(source::USER_INPUT, text)
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority_override = Some(priority);
        self
    }
}
