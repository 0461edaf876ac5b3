//! Tool action tracking.
//!
//! Every dispatch runs on its own task under a timeout and a cancellation
//! token. When it reaches a terminal state the tracker records it and pushes
//! exactly one raw event describing the outcome back to the event sink, so
//! the scheduler learns about results the same way it learns about anything.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ToolsConfig;
use crate::error::{ErrorCode, PonderError, PonderResult};
use crate::traits::{EventIngest, ToolBackend};
use crate::types::{source, Action, ActionId, ActionOutcome, ActionStatus, FailureKind, RawEvent};

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Recent terminal outcomes of one tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureSummary {
    pub completed: usize,
    pub timeouts: usize,
    pub errors: usize,
    pub cancelled: usize,
}

impl FailureSummary {
    pub fn total(&self) -> usize {
        self.completed + self.timeouts + self.errors + self.cancelled
    }

    pub fn failures(&self) -> usize {
        self.timeouts + self.errors + self.cancelled
    }

    pub fn success_rate(&self) -> Option<f32> {
        let total = self.total();
        (total > 0).then(|| self.completed as f32 / total as f32)
    }
}

/// Coarse reliability label derived from a [`FailureSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolHealth {
    Working,
    Partial,
    Unreliable,
    TimingOut,
}

impl ToolHealth {
    pub fn from_summary(summary: &FailureSummary) -> Option<Self> {
        let rate = summary.success_rate()?;
        Some(if summary.timeouts >= 2 {
            ToolHealth::TimingOut
        } else if rate < 0.5 {
            ToolHealth::Unreliable
        } else if rate < 1.0 {
            ToolHealth::Partial
        } else {
            ToolHealth::Working
        })
    }
}

impl fmt::Display for ToolHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ToolHealth::Working => "[WORKING]",
            ToolHealth::Partial => "[PARTIAL]",
            ToolHealth::Unreliable => "[UNRELIABLE]",
            ToolHealth::TimingOut => "[TIMING OUT]",
        };
        f.write_str(label)
    }
}

/// Health of one tool over a window.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolHealthReport {
    pub tool: String,
    pub health: ToolHealth,
    pub summary: FailureSummary,
}

#[derive(Default)]
struct TrackerState {
    in_flight: HashMap<ActionId, Action>,
    tokens: HashMap<ActionId, CancellationToken>,
    handles: HashMap<ActionId, JoinHandle<()>>,
    /// Terminal actions per tool, oldest first, bounded.
    history: HashMap<String, VecDeque<Action>>,
    /// Consecutive attempt counters keyed by tool and leading argument.
    attempts: HashMap<String, u32>,
    last_dispatch: HashMap<String, DateTime<Utc>>,
}

struct Inner {
    backend: Arc<dyn ToolBackend>,
    sink: Arc<dyn EventIngest>,
    config: ToolsConfig,
    state: Mutex<TrackerState>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

/// Dispatches tool actions and tracks them to completion.
#[derive(Clone)]
pub struct ToolActionTracker {
    inner: Arc<Inner>,
}

fn attempt_key(tool_name: &str, args: &serde_json::Value) -> String {
    let lead = match args {
        serde_json::Value::Object(map) => map.values().next().map(|v| v.to_string()),
        serde_json::Value::Array(items) => items.first().map(|v| v.to_string()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    };
    match lead {
        Some(lead) => format!("{}:{}", tool_name, lead),
        None => tool_name.to_string(),
    }
}

fn seconds_ago(at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - at).num_seconds().max(0)
}

impl ToolActionTracker {
    pub fn new(
        config: ToolsConfig,
        backend: Arc<dyn ToolBackend>,
        sink: Arc<dyn EventIngest>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                sink,
                config,
                state: Mutex::new(TrackerState::default()),
                next_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &ToolsConfig {
        &self.inner.config
    }

    /// Start a tool action. Returns immediately with the action id.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(
        &self,
        tool_name: impl Into<String>,
        args: serde_json::Value,
    ) -> PonderResult<ActionId> {
        let tool_name = tool_name.into();
        let now = Utc::now();
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let timeout = self.inner.config.timeout_for(&tool_name);
        let token = self.inner.shutdown.child_token();

        {
            let mut state = self.state();
            if state.in_flight.contains_key(&id) {
                return Err(PonderError::invariant(
                    "tool_tracker",
                    ErrorCode::InvDuplicateId,
                    format!("action {} is already registered", id),
                ));
            }

            let attempt = {
                let counter = state
                    .attempts
                    .entry(attempt_key(&tool_name, &args))
                    .or_insert(0);
                *counter += 1;
                *counter
            };

            let mut action = Action::new(id, tool_name.clone(), args.clone(), attempt, now);
            action.advance(ActionStatus::InProgress)?;
            state.in_flight.insert(id, action);
            state.tokens.insert(id, token.clone());
            state.last_dispatch.insert(tool_name.clone(), now);

            info!(
                action_id = id,
                tool = %tool_name,
                attempt,
                timeout_secs = timeout.as_secs_f32(),
                "Tool action dispatched"
            );
        }

        let tracker = self.clone();
        let handle = tokio::spawn(async move {
            let run = AssertUnwindSafe(tracker.inner.backend.execute(&tool_name, &args, timeout))
                .catch_unwind();
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => ActionOutcome::Failed {
                    kind: FailureKind::Cancelled,
                    message: "cancelled before completion".to_string(),
                },
                result = tokio::time::timeout(timeout, run) => match result {
                    Err(_) => ActionOutcome::Failed {
                        kind: FailureKind::Timeout,
                        message: format!("no result after {}s", timeout.as_secs_f32()),
                    },
                    Ok(Err(panic)) => ActionOutcome::Failed {
                        kind: FailureKind::Error,
                        message: format!("tool panicked: {}", panic_message(&*panic)),
                    },
                    Ok(Ok(Err(e))) => ActionOutcome::Failed {
                        kind: FailureKind::Error,
                        message: e.to_string(),
                    },
                    Ok(Ok(Ok(output))) => ActionOutcome::Completed(output),
                },
            };
            tracker.complete(id, outcome);
        });

        let mut state = self.state();
        if state.in_flight.contains_key(&id) {
            state.handles.insert(id, handle);
        }
        Ok(id)
    }

    /// Record a terminal outcome and emit its event. A second outcome for the
    /// same action is ignored.
    fn complete(&self, id: ActionId, outcome: ActionOutcome) {
        let now = Utc::now();
        let event = {
            let mut state = self.state();
            let Some(mut action) = state.in_flight.remove(&id) else {
                debug!(action_id = id, "Outcome for finished action ignored");
                return;
            };
            state.tokens.remove(&id);
            state.handles.remove(&id);

            if let Err(e) = action.finish(outcome, now) {
                warn!(action_id = id, error = %e, "Rejected action transition");
                return;
            }

            let key = attempt_key(&action.tool_name, &action.args);
            if action.succeeded() {
                state.attempts.remove(&key);
            }

            let event = outcome_event(&action);
            match action.failure_kind {
                None => info!(action_id = id, tool = %action.tool_name, "Tool action completed"),
                Some(kind) => warn!(
                    action_id = id,
                    tool = %action.tool_name,
                    kind = %kind,
                    error = action.error.as_deref().unwrap_or(""),
                    "Tool action failed"
                ),
            }

            let cap = self.inner.config.history_per_tool.max(1);
            let ring = state.history.entry(action.tool_name.clone()).or_default();
            ring.push_back(action);
            while ring.len() > cap {
                ring.pop_front();
            }
            event
        };
        self.inner.sink.ingest(event);
    }

    /// Cancel one in-flight action. Returns false if it already finished.
    pub fn cancel(&self, id: ActionId) -> bool {
        match self.state().tokens.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight action and wait until each has reported.
    pub async fn cancel_all(&self) -> usize {
        let handles: Vec<JoinHandle<()>> = {
            let mut state = self.state();
            for token in state.tokens.values() {
                token.cancel();
            }
            state.handles.drain().map(|(_, h)| h).collect()
        };
        let count = handles.len();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Tool task ended abnormally");
            }
        }
        if count > 0 {
            info!(cancelled = count, "Cancelled in-flight tool actions");
        }
        count
    }

    /// Look up an action, in flight or finished.
    pub fn get(&self, id: ActionId) -> Option<Action> {
        let state = self.state();
        state.in_flight.get(&id).cloned().or_else(|| {
            state
                .history
                .values()
                .flat_map(|ring| ring.iter())
                .find(|a| a.id == id)
                .cloned()
        })
    }

    /// In-flight actions, oldest first.
    pub fn in_flight(&self) -> Vec<Action> {
        let mut actions: Vec<Action> = self.state().in_flight.values().cloned().collect();
        actions.sort_by_key(|a| a.id);
        actions
    }

    pub fn in_flight_count(&self) -> usize {
        self.state().in_flight.len()
    }

    /// Terminal history of one tool, oldest first.
    pub fn history(&self, tool_name: &str) -> Vec<Action> {
        self.state()
            .history
            .get(tool_name)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Outcome counts for a tool over the last `window`.
    pub fn failure_summary(
        &self,
        tool_name: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> FailureSummary {
        let state = self.state();
        summarize(state.history.get(tool_name), window, now)
    }

    /// Health of every tool with outcomes inside `window`, sorted by name.
    pub fn health(&self, window: Duration, now: DateTime<Utc>) -> Vec<ToolHealthReport> {
        let state = self.state();
        let mut reports: Vec<ToolHealthReport> = state
            .history
            .iter()
            .filter_map(|(tool, ring)| {
                let summary = summarize(Some(ring), window, now);
                ToolHealth::from_summary(&summary).map(|health| ToolHealthReport {
                    tool: tool.clone(),
                    health,
                    summary,
                })
            })
            .collect();
        reports.sort_by(|a, b| a.tool.cmp(&b.tool));
        reports
    }

    /// Reason to hold off dispatching `tool_name` at `now`, if any.
    pub fn should_throttle(&self, tool_name: &str, now: DateTime<Utc>) -> Option<String> {
        let state = self.state();

        if state.in_flight.values().any(|a| a.tool_name == tool_name) {
            return Some(format!("{} is already executing", tool_name));
        }

        if let Some(last) = state.last_dispatch.get(tool_name) {
            let min = chrono::Duration::from_std(self.inner.config.min_dispatch_interval())
                .unwrap_or_else(|_| chrono::Duration::zero());
            if now - *last < min {
                return Some(format!(
                    "{} was used {}s ago",
                    tool_name,
                    seconds_ago(*last, now)
                ));
            }
        }

        let window = chrono::Duration::from_std(self.inner.config.failure_window())
            .unwrap_or_else(|_| chrono::Duration::zero());
        let recent_failures = state
            .history
            .get(tool_name)
            .map(|ring| {
                ring.iter()
                    .rev()
                    .take(3)
                    .filter(|a| a.completed_at.is_some_and(|at| now - at < window))
                    .filter(|a| !a.succeeded())
                    .count()
            })
            .unwrap_or(0);
        if recent_failures >= 2 {
            return Some(format!(
                "{} failed {} times recently; wait {}s before retrying",
                tool_name,
                recent_failures,
                window.num_seconds()
            ));
        }

        None
    }

    /// Human-readable in-flight and recent-failure lines for prompt context.
    pub fn awareness_context(&self, now: DateTime<Utc>) -> String {
        let window = chrono::Duration::from_std(self.inner.config.failure_summary_window())
            .unwrap_or_else(|_| chrono::Duration::zero());
        let state = self.state();
        let mut lines = Vec::new();

        let mut in_flight: Vec<&Action> = state.in_flight.values().collect();
        in_flight.sort_by_key(|a| a.id);
        for action in in_flight {
            lines.push(format!(
                "[IN PROGRESS] {} (attempt {}, {}s)",
                action.tool_name,
                action.attempt,
                seconds_ago(action.registered_at, now)
            ));
        }

        let mut failures: Vec<&Action> = state
            .history
            .values()
            .flat_map(|ring| ring.iter())
            .filter(|a| !a.succeeded())
            .filter(|a| a.completed_at.is_some_and(|at| now - at < window))
            .collect();
        failures.sort_by_key(|a| a.completed_at);
        for action in failures {
            lines.push(format!(
                "[RECENT FAILURE] {} {} {}s ago: {}",
                action.tool_name,
                action.failure_kind.map(|k| k.to_string()).unwrap_or_default(),
                action.completed_at.map(|at| seconds_ago(at, now)).unwrap_or(0),
                action.error.as_deref().unwrap_or("")
            ));
        }

        lines.join("\n")
    }

    /// Drop terminal actions finished before `now - history_window`.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let window = chrono::Duration::from_std(self.inner.config.history_window())
            .unwrap_or_else(|_| chrono::Duration::zero());
        let mut state = self.state();
        let mut removed = 0;
        for ring in state.history.values_mut() {
            let before = ring.len();
            ring.retain(|a| a.completed_at.map_or(true, |at| now - at < window));
            removed += before - ring.len();
        }
        state.history.retain(|_, ring| !ring.is_empty());
        if removed > 0 {
            debug!(removed, "Pruned old tool actions");
        }
        removed
    }
}

fn summarize(
    ring: Option<&VecDeque<Action>>,
    window: Duration,
    now: DateTime<Utc>,
) -> FailureSummary {
    let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
    let mut summary = FailureSummary::default();
    for action in ring.into_iter().flatten() {
        if !action.completed_at.is_some_and(|at| now - at < window) {
            continue;
        }
        match action.failure_kind {
            None => summary.completed += 1,
            Some(FailureKind::Timeout) => summary.timeouts += 1,
            Some(FailureKind::Error) => summary.errors += 1,
            Some(FailureKind::Cancelled) => summary.cancelled += 1,
        }
    }
    summary
}

fn outcome_event(action: &Action) -> RawEvent {
    let tool = &action.tool_name;
    let attempt = if action.attempt > 1 {
        format!(" (attempt {})", action.attempt)
    } else {
        String::new()
    };
    let error = action.error.as_deref().unwrap_or("");

    let (tag, text) = match action.failure_kind {
        None => (
            source::TOOL_RESULT,
            format!("[{}] SUCCESS: {}", tool, action.result.as_deref().unwrap_or("")),
        ),
        Some(FailureKind::Timeout) => (
            source::TOOL_TIMEOUT,
            format!("[{}] TIMEOUT{}: {}", tool, attempt, error),
        ),
        Some(FailureKind::Error) => (
            source::TOOL_FAILED,
            format!("[{}] FAILED{}: {}", tool, attempt, error),
        ),
        Some(FailureKind::Cancelled) => (
            source::TOOL_CANCELLED,
            format!("[{}] CANCELLED: {}", tool, error),
        ),
    };
    RawEvent::new(tag, text)
}
