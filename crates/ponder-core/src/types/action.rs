//! Tool action records and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{ErrorCode, PonderError, PonderResult};

/// Identifier of a dispatched action.
pub type ActionId = u64;

/// Why an action ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Error,
    Cancelled,
}

/// Lifecycle state of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionStatus {
    Registered,
    InProgress,
    Completed,
    Failed,
}

impl ActionStatus {
    fn rank(self) -> u8 {
        match self {
            ActionStatus::Registered => 0,
            ActionStatus::InProgress => 1,
            ActionStatus::Completed | ActionStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Failed)
    }

    /// Whether `self -> next` is a legal forward step.
    pub fn can_advance_to(self, next: ActionStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

/// Terminal outcome reported by an action run.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Completed(String),
    Failed { kind: FailureKind, message: String },
}

impl ActionOutcome {
    pub fn status(&self) -> ActionStatus {
        match self {
            ActionOutcome::Completed(_) => ActionStatus::Completed,
            ActionOutcome::Failed { .. } => ActionStatus::Failed,
        }
    }
}

/// An in-flight or finished tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub tool_name: String,
    pub args: serde_json::Value,
    pub status: ActionStatus,
    pub registered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    /// 1-based attempt number for the same tool and leading argument.
    pub attempt: u32,
}

impl Action {
    pub fn new(
        id: ActionId,
        tool_name: impl Into<String>,
        args: serde_json::Value,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tool_name: tool_name.into(),
            args,
            status: ActionStatus::Registered,
            registered_at: now,
            completed_at: None,
            result: None,
            error: None,
            failure_kind: None,
            attempt,
        }
    }

    /// Move to `next`, rejecting backward steps and anything after a terminal state.
    pub fn advance(&mut self, next: ActionStatus) -> PonderResult<()> {
        if !self.status.can_advance_to(next) {
            return Err(PonderError::invariant(
                "action",
                ErrorCode::InvIllegalTransition,
                format!("action {} cannot go from {} to {}", self.id, self.status, next),
            ));
        }
        self.status = next;
        Ok(())
    }

    /// Record a terminal outcome.
    pub fn finish(&mut self, outcome: ActionOutcome, now: DateTime<Utc>) -> PonderResult<()> {
        self.advance(outcome.status())?;
        self.completed_at = Some(now);
        match outcome {
            ActionOutcome::Completed(result) => self.result = Some(result),
            ActionOutcome::Failed { kind, message } => {
                self.failure_kind = Some(kind);
                self.error = Some(message);
            }
        }
        Ok(())
    }

    /// Wall time from registration to completion.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|done| done - self.registered_at)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.status == ActionStatus::Completed
    }
}
