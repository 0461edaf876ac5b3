//! Loop pacing and cycle statistics.

use std::time::Duration;

use crate::config::SchedulerConfig;

/// Sleep length between cycles.
///
/// Busy cycles (or pending urgent thoughts) use the minimum interval; each
/// consecutive quiet cycle doubles the wait up to the idle ceiling.
#[derive(Debug, Clone)]
pub struct AdaptivePacer {
    min: Duration,
    idle: Duration,
    max_idle: Duration,
    current: Duration,
}

impl AdaptivePacer {
    pub fn new(config: &SchedulerConfig) -> Self {
        let idle = config.idle_interval();
        Self {
            min: config.min_interval(),
            idle,
            max_idle: config.max_idle_interval(),
            current: idle,
        }
    }

    pub fn next(&mut self, did_work: bool, urgent: bool) -> Duration {
        if did_work || urgent {
            self.current = self.idle;
            return self.min;
        }
        let delay = self.current;
        self.current = (self.current * 2).min(self.max_idle);
        delay
    }
}

/// Counters kept by the cognitive loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub total: u64,
    pub reactive: u64,
    pub proactive: u64,
    pub idle: u64,
    pub thoughts: u64,
    pub responses: u64,
    pub failed_generations: u64,
    pub interpret_failures: u64,
}
