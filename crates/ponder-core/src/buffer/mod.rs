//! Thought buffer: the pending raw-event queue plus the append-only thought log.
//!
//! Producers (adapters, tool tasks) only ever touch the queue. The scheduler
//! is the only writer of the log; readers get cloned snapshots.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::error::{ErrorCode, PonderError, PonderResult};
use crate::traits::EventIngest;
use crate::types::{source, Priority, PriorityMap, RawEvent, Thought, ThoughtId};

/// Immutable part of a thought. Stored once, never edited.
#[derive(Debug, Clone)]
struct ThoughtRecord {
    content: String,
    source_tag: String,
    priority: Priority,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ThoughtLog {
    records: Vec<ThoughtRecord>,
    /// Parallel to `records`.
    spoken: Vec<bool>,
    /// Unspoken counts indexed by priority rank.
    unspoken_by_priority: [usize; 4],
    last_user_input_at: Option<DateTime<Utc>>,
    last_response_at: Option<DateTime<Utc>>,
}

fn rank(priority: Priority) -> usize {
    match priority {
        Priority::Low => 0,
        Priority::Medium => 1,
        Priority::High => 2,
        Priority::Critical => 3,
    }
}

const BY_RANK: [Priority; 4] = [
    Priority::Low,
    Priority::Medium,
    Priority::High,
    Priority::Critical,
];

impl ThoughtLog {
    fn snapshot(&self, id: usize) -> Thought {
        let record = &self.records[id];
        Thought {
            id: id as ThoughtId,
            content: record.content.clone(),
            source_tag: record.source_tag.clone(),
            priority: record.priority,
            created_at: record.created_at,
            spoken: self.spoken[id],
        }
    }

    fn push(&mut self, record: ThoughtRecord, spoken: bool) -> usize {
        if record.source_tag == source::USER_INPUT {
            self.last_user_input_at = Some(record.created_at);
        }
        if !spoken {
            self.unspoken_by_priority[rank(record.priority)] += 1;
        }
        self.records.push(record);
        self.spoken.push(spoken);
        self.records.len() - 1
    }

    fn mark(&mut self, id: usize) -> bool {
        match self.spoken.get_mut(id) {
            Some(flag) if !*flag => {
                *flag = true;
                self.unspoken_by_priority[rank(self.records[id].priority)] -= 1;
                true
            }
            _ => false,
        }
    }

    fn last_created_at(&self) -> Option<DateTime<Utc>> {
        self.records.last().map(|r| r.created_at)
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

/// Shared event queue and thought log.
pub struct ThoughtBuffer {
    pending: Mutex<VecDeque<RawEvent>>,
    log: RwLock<ThoughtLog>,
    priorities: PriorityMap,
    started_at: DateTime<Utc>,
}

impl ThoughtBuffer {
    pub fn new(priorities: PriorityMap) -> Self {
        Self::started_at(priorities, Utc::now())
    }

    /// Create a buffer whose "no response yet" reference point is `started_at`.
    pub fn started_at(priorities: PriorityMap, started_at: DateTime<Utc>) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            log: RwLock::new(ThoughtLog::default()),
            priorities,
            started_at,
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<RawEvent>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_log(&self) -> RwLockReadGuard<'_, ThoughtLog> {
        self.log.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_log(&self) -> RwLockWriteGuard<'_, ThoughtLog> {
        self.log.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn priorities(&self) -> &PriorityMap {
        &self.priorities
    }

    // ------------------------------------------------------------------
    // Raw event queue
    // ------------------------------------------------------------------

    /// Enqueue an event. Safe from any task.
    pub fn ingest(&self, event: RawEvent) {
        trace!(source = %event.source_tag, event_id = %event.id, "Event ingested");
        self.queue().push_back(event);
    }

    /// Atomically take every pending event, oldest first.
    pub fn drain_pending(&self) -> Vec<RawEvent> {
        let drained = std::mem::take(&mut *self.queue());
        Vec::from(drained)
    }

    /// Put events back at the front of the queue, preserving their order.
    pub fn requeue(&self, events: Vec<RawEvent>) {
        if events.is_empty() {
            return;
        }
        let mut queue = self.queue();
        for event in events.into_iter().rev() {
            queue.push_front(event);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.queue().len()
    }

    /// Classify an event: explicit override first, then the source-tag map.
    pub fn classify(&self, event: &RawEvent) -> Priority {
        event
            .priority_override
            .unwrap_or_else(|| self.priorities.classify(&event.source_tag))
    }

    // ------------------------------------------------------------------
    // Thought log
    // ------------------------------------------------------------------

    /// Append a thought created now. `priority` defaults to the source-tag map.
    pub fn append_thought(
        &self,
        content: impl Into<String>,
        source_tag: impl Into<String>,
        priority: Option<Priority>,
    ) -> Thought {
        self.append_thought_at(content, source_tag, priority, Utc::now())
    }

    /// Append a thought at `created_at`, clamped so the log never goes back in time.
    pub fn append_thought_at(
        &self,
        content: impl Into<String>,
        source_tag: impl Into<String>,
        priority: Option<Priority>,
        created_at: DateTime<Utc>,
    ) -> Thought {
        self.push(content.into(), source_tag.into(), priority, created_at, false)
    }

    /// Append a thought that is spoken from birth (response echoes).
    pub fn append_spoken_at(
        &self,
        content: impl Into<String>,
        source_tag: impl Into<String>,
        priority: Option<Priority>,
        created_at: DateTime<Utc>,
    ) -> Thought {
        self.push(content.into(), source_tag.into(), priority, created_at, true)
    }

    fn push(
        &self,
        content: String,
        source_tag: String,
        priority: Option<Priority>,
        created_at: DateTime<Utc>,
        spoken: bool,
    ) -> Thought {
        let priority = priority.unwrap_or_else(|| self.priorities.classify(&source_tag));
        let mut log = self.write_log();
        let created_at = match log.last_created_at() {
            Some(last) if last > created_at => last,
            _ => created_at,
        };
        let id = log.push(
            ThoughtRecord {
                content,
                source_tag,
                priority,
                created_at,
            },
            spoken,
        );
        let thought = log.snapshot(id);
        debug!(
            thought_id = thought.id,
            priority = %thought.priority,
            source = %thought.source_tag,
            "Thought appended"
        );
        thought
    }

    /// Mark thoughts spoken. Idempotent; unknown ids are ignored.
    ///
    /// Returns how many flags actually flipped.
    pub fn mark_spoken(&self, ids: &[ThoughtId]) -> usize {
        let mut log = self.write_log();
        ids.iter()
            .filter(|id| usize::try_from(**id).map(|i| log.mark(i)).unwrap_or(false))
            .count()
    }

    /// Last `n` thoughts, oldest first.
    pub fn recent_thoughts(&self, n: usize) -> Vec<Thought> {
        let log = self.read_log();
        let start = log.records.len().saturating_sub(n);
        (start..log.records.len()).map(|i| log.snapshot(i)).collect()
    }

    /// Every unspoken thought, oldest first.
    pub fn unspoken_thoughts(&self) -> Vec<Thought> {
        let log = self.read_log();
        (0..log.records.len())
            .filter(|i| !log.spoken[*i])
            .map(|i| log.snapshot(i))
            .collect()
    }

    /// Full log snapshot.
    pub fn thoughts(&self) -> Vec<Thought> {
        let log = self.read_log();
        (0..log.records.len()).map(|i| log.snapshot(i)).collect()
    }

    pub fn get(&self, id: ThoughtId) -> Option<Thought> {
        let log = self.read_log();
        let idx = usize::try_from(id).ok()?;
        (idx < log.records.len()).then(|| log.snapshot(idx))
    }

    pub fn highest_unspoken_priority(&self) -> Option<Priority> {
        let log = self.read_log();
        (0..4)
            .rev()
            .find(|r| log.unspoken_by_priority[*r] > 0)
            .map(|r| BY_RANK[r])
    }

    pub fn unspoken_count(&self) -> usize {
        self.read_log().unspoken_by_priority.iter().sum()
    }

    pub fn len(&self) -> usize {
        self.read_log().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_log().records.is_empty()
    }

    /// Time since the most recent thought matching `predicate`, or None if none does.
    pub fn time_since(
        &self,
        predicate: impl Fn(&Thought) -> bool,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let log = self.read_log();
        (0..log.records.len())
            .rev()
            .map(|i| log.snapshot(i))
            .find(|t| predicate(t))
            .map(|t| elapsed(t.created_at, now))
    }

    /// Time since the last `user_input` thought, or None if there never was one.
    pub fn time_since_user_input(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.read_log()
            .last_user_input_at
            .map(|at| elapsed(at, now))
    }

    /// Time since the last thought of any kind.
    pub fn time_since_last_thought(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.read_log().last_created_at().map(|at| elapsed(at, now))
    }

    pub fn time_since_start(&self, now: DateTime<Utc>) -> Duration {
        elapsed(self.started_at, now)
    }

    /// Record that a response went out at `at`.
    pub fn record_response(&self, at: DateTime<Utc>) {
        let mut log = self.write_log();
        if log.last_response_at.map_or(true, |prev| at > prev) {
            log.last_response_at = Some(at);
        }
    }

    pub fn last_response_at(&self) -> Option<DateTime<Utc>> {
        self.read_log().last_response_at
    }

    /// Time since the last response, measured from buffer creation before the first one.
    pub fn time_since_last_response(&self, now: DateTime<Utc>) -> Duration {
        let since = self.read_log().last_response_at.unwrap_or(self.started_at);
        elapsed(since, now)
    }

    /// Rebuild the log from persisted thoughts, keeping ids and spoken flags.
    pub fn restore(&self, thoughts: Vec<Thought>) -> PonderResult<usize> {
        let mut log = self.write_log();
        if !log.records.is_empty() {
            return Err(PonderError::invariant(
                "thought_buffer",
                ErrorCode::InvDuplicateId,
                "restore requires an empty thought log",
            ));
        }
        for (expected, thought) in thoughts.into_iter().enumerate() {
            if thought.id != expected as ThoughtId {
                *log = ThoughtLog::default();
                return Err(PonderError::invariant(
                    "thought_buffer",
                    ErrorCode::InvDuplicateId,
                    format!("restored thought id {} at position {}", thought.id, expected),
                ));
            }
            if thought.is_from(source::RESPONSE_ECHO) {
                log.last_response_at = Some(thought.created_at);
            }
            log.push(
                ThoughtRecord {
                    content: thought.content,
                    source_tag: thought.source_tag,
                    priority: thought.priority,
                    created_at: thought.created_at,
                },
                thought.spoken,
            );
        }
        Ok(log.records.len())
    }

    /// Render the last `n` thoughts for prompt context.
    pub fn format_for_context(&self, n: usize) -> String {
        self.recent_thoughts(n)
            .iter()
            .map(|t| {
                let stamp = t.created_at.format("%H:%M:%S");
                if t.is_from(source::RESPONSE_ECHO) {
                    format!("[{}] I said: {}", stamp, t.content)
                } else {
                    format!("[{}] {}", stamp, t.content)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl EventIngest for ThoughtBuffer {
    fn ingest(&self, event: RawEvent) {
        ThoughtBuffer::ingest(self, event)
    }
}

impl Default for ThoughtBuffer {
    fn default() -> Self {
        Self::new(PriorityMap::default())
    }
}
