//! Outward responses and the reason they were produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::ThoughtId;

/// Which rule of the speak decision fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum SpeakReason {
    #[strum(serialize = "critical")]
    #[serde(rename = "critical")]
    Critical,
    #[strum(serialize = "high-priority wait elapsed")]
    #[serde(rename = "high-priority wait elapsed")]
    HighPriorityWaitElapsed,
    #[strum(serialize = "accumulated observations")]
    #[serde(rename = "accumulated observations")]
    AccumulatedObservations,
    #[strum(serialize = "high volume")]
    #[serde(rename = "high volume")]
    HighVolume,
}

/// A generated response delivered to the outside world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub text: String,
    pub reason: SpeakReason,
    /// Unspoken thoughts the response was generated from.
    pub thought_ids: Vec<ThoughtId>,
    pub created_at: DateTime<Utc>,
}
