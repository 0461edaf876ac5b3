//! Speak/no-speak rule.
//!
//! Rules are checked in order and the first match wins:
//!
//! 1. a CRITICAL thought is unspoken
//! 2. a HIGH thought is unspoken and the user has been quiet for `high_priority_wait`
//! 3. `accumulated_count` thoughts are unspoken and nothing was said for `accumulated_wait`
//! 4. `high_volume_count` thoughts are unspoken and nothing was said for `high_volume_wait`

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::buffer::ThoughtBuffer;
use crate::config::DecisionConfig;
use crate::types::{Priority, SpeakReason};

/// The inputs the rule looks at, captured at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionInput {
    pub highest_unspoken: Option<Priority>,
    pub unspoken_count: usize,
    /// None when no user input has ever been seen.
    pub since_user_input: Option<Duration>,
    pub since_last_response: Duration,
}

impl DecisionInput {
    pub fn capture(buffer: &ThoughtBuffer, now: DateTime<Utc>) -> Self {
        Self {
            highest_unspoken: buffer.highest_unspoken_priority(),
            unspoken_count: buffer.unspoken_count(),
            since_user_input: buffer.time_since_user_input(now),
            since_last_response: buffer.time_since_last_response(now),
        }
    }
}

/// Evaluates the speak rule against a [`DecisionInput`].
#[derive(Debug, Clone)]
pub struct ResponseDecider {
    high_priority_wait: Duration,
    accumulated_count: usize,
    accumulated_wait: Duration,
    high_volume_count: usize,
    high_volume_wait: Duration,
}

impl ResponseDecider {
    pub fn new(config: &DecisionConfig) -> Self {
        Self {
            high_priority_wait: Duration::from_secs(config.high_priority_wait_secs),
            accumulated_count: config.accumulated_count,
            accumulated_wait: Duration::from_secs(config.accumulated_wait_secs),
            high_volume_count: config.high_volume_count,
            high_volume_wait: Duration::from_secs(config.high_volume_wait_secs),
        }
    }

    /// Apply the rule to a captured state.
    pub fn decide(&self, input: &DecisionInput) -> Option<SpeakReason> {
        match input.highest_unspoken {
            None => return None,
            Some(Priority::Critical) => return Some(SpeakReason::Critical),
            Some(Priority::High) => {
                let user_quiet = input
                    .since_user_input
                    .map_or(true, |quiet| quiet >= self.high_priority_wait);
                if user_quiet {
                    return Some(SpeakReason::HighPriorityWaitElapsed);
                }
            }
            Some(_) => {}
        }

        if input.unspoken_count >= self.accumulated_count
            && input.since_last_response >= self.accumulated_wait
        {
            return Some(SpeakReason::AccumulatedObservations);
        }

        if input.unspoken_count >= self.high_volume_count
            && input.since_last_response >= self.high_volume_wait
        {
            return Some(SpeakReason::HighVolume);
        }

        None
    }

    /// Capture the buffer state at `now` and apply the rule.
    pub fn evaluate(&self, buffer: &ThoughtBuffer, now: DateTime<Utc>) -> Option<SpeakReason> {
        self.decide(&DecisionInput::capture(buffer, now))
    }
}

impl Default for ResponseDecider {
    fn default() -> Self {
        Self::new(&DecisionConfig::default())
    }
}
