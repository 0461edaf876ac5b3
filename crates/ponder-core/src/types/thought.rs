//! Thought records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Priority;

/// Dense, monotonically increasing thought identifier (arena index).
pub type ThoughtId = u64;

/// A timestamped, priority-tagged internal note.
///
/// Everything but `spoken` is immutable after creation, and `spoken`
/// only ever flips from false to true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    pub id: ThoughtId,
    pub content: String,
    pub source_tag: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub spoken: bool,
}

impl Thought {
    /// Whether this thought came from the given source.
    pub fn is_from(&self, source_tag: &str) -> bool {
        self.source_tag == source_tag
    }
}
