//! Agent lifecycle events.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Response, SpeakReason, Thought};

/// Events broadcast by the agent for observers (UI, logs, tests).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A response was generated and is ready for output.
    Response(Response),
    /// A thought was appended to the log.
    Thought(Thought),
    /// Generation was attempted but produced nothing.
    GenerationFailed {
        reason: SpeakReason,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// Completed days were condensed into the Archived tier.
    DaysArchived {
        days: Vec<NaiveDate>,
        /// Daily entries removed across all `days`.
        purged: usize,
        timestamp: DateTime<Utc>,
    },
}

impl AgentEvent {
    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Response(_) => "agent.response",
            Self::Thought(_) => "agent.thought",
            Self::GenerationFailed { .. } => "agent.generation_failed",
            Self::DaysArchived { .. } => "memory.days_archived",
        }
    }

    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Response(r) => r.created_at,
            Self::Thought(t) => t.created_at,
            Self::GenerationFailed { timestamp, .. } => *timestamp,
            Self::DaysArchived { timestamp, .. } => *timestamp,
        }
    }
}
