//! Memory record types for the tiered store.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Storage tier of a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Tier {
    /// Short FIFO of the latest exchanges, not embedded.
    Recent,
    /// Embedded entries of days that have not been archived yet.
    Daily,
    /// One embedded summary per completed day.
    Archived,
    /// Pre-embedded reference knowledge, read-only.
    Static,
}

impl Tier {
    /// Whether records in this tier must carry an embedding.
    pub fn requires_embedding(self) -> bool {
        !matches!(self, Tier::Recent)
    }
}

/// A stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub tier: Tier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MemoryRecord {
    /// A fresh Recent record.
    pub fn recent(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            timestamp,
            tier: Tier::Recent,
            embedding: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Calendar day (UTC) the record belongs to.
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// Speaker role, if one was recorded.
    pub fn role(&self) -> Option<&str> {
        self.metadata.get("role").and_then(|v| v.as_str())
    }
}

/// Which tiers a search considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchScope {
    pub daily: bool,
    pub archived: bool,
    pub static_knowledge: bool,
}

impl Default for SearchScope {
    fn default() -> Self {
        Self {
            daily: true,
            archived: true,
            static_knowledge: true,
        }
    }
}

impl SearchScope {
    pub fn only(tier: Tier) -> Self {
        Self {
            daily: tier == Tier::Daily,
            archived: tier == Tier::Archived,
            static_knowledge: tier == Tier::Static,
        }
    }

    pub fn includes(&self, tier: Tier) -> bool {
        match tier {
            Tier::Recent => false,
            Tier::Daily => self.daily,
            Tier::Archived => self.archived,
            Tier::Static => self.static_knowledge,
        }
    }
}

/// A search result with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: MemoryRecord,
    pub similarity: f32,
}
