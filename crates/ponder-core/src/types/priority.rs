//! Thought priorities and the source-tag classification map.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::event::source;

/// Urgency of a thought. Compared by ordinal value only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Ordinal weight used for every comparison.
    pub const fn value(self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Medium => 5,
            Priority::High => 8,
            Priority::Critical => 10,
        }
    }

    /// Inverse of [`Priority::value`].
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(Priority::Low),
            5 => Some(Priority::Medium),
            8 => Some(Priority::High),
            10 => Some(Priority::Critical),
            _ => None,
        }
    }

    /// Clamp to at most `ceiling`.
    pub fn at_most(self, ceiling: Priority) -> Priority {
        if self > ceiling {
            ceiling
        } else {
            self
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value().cmp(&other.value())
    }
}

/// Total mapping from event source tag to priority.
///
/// Unknown tags map to the fallback (MEDIUM unless overridden).
#[derive(Debug, Clone)]
pub struct PriorityMap {
    entries: HashMap<String, Priority>,
    fallback: Priority,
}

impl Default for PriorityMap {
    fn default() -> Self {
        let mut entries = HashMap::new();

        for tag in [
            source::URGENT_REMINDER,
            source::DIRECT_MENTION,
            source::CHAT_DIRECT_MENTION,
        ] {
            entries.insert(tag.to_string(), Priority::Critical);
        }

        for tag in [
            source::USER_INPUT,
            source::CHAT_QUESTION,
            source::TOOL_TIMEOUT,
            source::TOOL_FAILED,
            source::TOOL_ERROR,
            source::TOOL_ENFORCEMENT,
            source::TOOL_DISABLED,
            source::TOOL_THROTTLED,
        ] {
            entries.insert(tag.to_string(), Priority::High);
        }

        for tag in [
            source::CHAT_MESSAGE,
            source::VISION_RESULT,
            source::SEARCH_RESULT,
            source::MEMORY_RESULT,
            source::TOOL_INITIATED,
            source::TOOL_RESULT,
            source::TOOL_INSTRUCTIONS,
            source::CHAT_ENGAGEMENT,
            source::TOOL_CANCELLED,
        ] {
            entries.insert(tag.to_string(), Priority::Medium);
        }

        for tag in [
            source::TOOL_PENDING,
            source::OBSERVATION,
            source::INTERNAL,
            source::PROACTIVE_REFLECTION,
            source::PROACTIVE_PLANNING,
            source::AMBIENT,
            source::RESPONSE_ECHO,
        ] {
            entries.insert(tag.to_string(), Priority::Low);
        }

        Self {
            entries,
            fallback: Priority::Medium,
        }
    }
}

impl PriorityMap {
    /// Add or replace the priority for a source tag.
    pub fn with(mut self, tag: impl Into<String>, priority: Priority) -> Self {
        self.entries.insert(tag.into(), priority);
        self
    }

    /// Priority for a source tag.
    pub fn classify(&self, source_tag: &str) -> Priority {
        self.entries
            .get(source_tag)
            .copied()
            .unwrap_or(self.fallback)
    }

    /// Number of explicitly mapped tags.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_ordinal_values() {
        assert_eq!(Priority::Low.value(), 1);
        assert_eq!(Priority::Medium.value(), 5);
        assert_eq!(Priority::High.value(), 8);
        assert_eq!(Priority::Critical.value(), 10);
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Medium > Priority::Low);
        assert_eq!(Priority::from_value(8), Some(Priority::High));
        assert_eq!(Priority::from_value(3), None);
    }

    #[test]
    fn test_string_roundtrip() {
        assert_eq!(Priority::Critical.to_string(), "critical");
        assert_eq!(Priority::from_str("medium").unwrap(), Priority::Medium);
    }

    #[test]
    fn test_default_classification() {
        let map = PriorityMap::default();
        assert_eq!(map.classify("direct_mention"), Priority::Critical);
        assert_eq!(map.classify("user_input"), Priority::High);
        assert_eq!(map.classify("tool_timeout"), Priority::High);
        assert_eq!(map.classify("tool_result"), Priority::Medium);
        assert_eq!(map.classify("response_echo"), Priority::Low);
        assert_eq!(map.classify("something_new"), Priority::Medium);
    }

    #[test]
    fn test_map_extension() {
        let map = PriorityMap::default().with("doorbell", Priority::Critical);
        assert_eq!(map.classify("doorbell"), Priority::Critical);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(Priority::Critical.at_most(Priority::Medium), Priority::Medium);
        assert_eq!(Priority::Low.at_most(Priority::Medium), Priority::Low);
    }
}
