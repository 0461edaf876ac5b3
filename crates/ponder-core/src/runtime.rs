//! Agent runtime: wires the components together and owns their lifecycle.
//!
//! Runs the cognitive loop on its own task and the periodic maintenance
//! (day rollover, instruction sweep, action pruning) on a cron job scheduler.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::ThoughtBuffer;
use crate::config::AgentConfig;
use crate::error::{PonderError, PonderResult};
use crate::events::{AgentEvent, EventBus, EventSubscriber};
use crate::memory::{RolloverReport, TieredMemoryStore};
use crate::scheduler::{CognitiveScheduler, CycleStats, SchedulerParts};
use crate::store::SqliteStateStore;
use crate::tools::ToolActionTracker;
use crate::traits::{Embedder, Generator, Interpreter, ResponseSink, Summarizer, ToolBackend};
use crate::ttl::InstructionTTLCache;
use crate::types::{PriorityMap, RawEvent};

/// Lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// SQLite file for thoughts and memory (default: None = in-memory).
    pub db_path: Option<PathBuf>,
    /// Minutes between day-rollover checks (default: 10).
    pub rollover_check_minutes: u64,
    /// Minutes between instruction sweeps and action pruning (default: 5).
    pub housekeeping_minutes: u64,
    pub enable_rollover: bool,
    /// Archive completed days once during `start` (default: true).
    pub rollover_on_start: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            rollover_check_minutes: 10,
            housekeeping_minutes: 5,
            enable_rollover: true,
            rollover_on_start: true,
        }
    }
}

impl RuntimeConfig {
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn with_rollover_interval(mut self, minutes: u64) -> Self {
        self.rollover_check_minutes = minutes.max(1);
        self
    }

    pub fn with_housekeeping_interval(mut self, minutes: u64) -> Self {
        self.housekeeping_minutes = minutes.max(1);
        self
    }

    pub fn without_rollover(mut self) -> Self {
        self.enable_rollover = false;
        self
    }

    pub fn without_rollover_on_start(mut self) -> Self {
        self.rollover_on_start = false;
        self
    }

    /// Create config from environment variables.
    ///
    /// Reads:
    /// - `PONDER_DB_PATH` (default: None = in-memory)
    /// - `PONDER_ROLLOVER_CHECK_MINUTES` (default: 10)
    /// - `PONDER_DISABLE_ROLLOVER`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("PONDER_DB_PATH") {
            self.db_path = Some(PathBuf::from(path));
        }

        if let Ok(interval) = std::env::var("PONDER_ROLLOVER_CHECK_MINUTES") {
            if let Ok(minutes) = interval.parse::<u64>() {
                self.rollover_check_minutes = minutes.max(1);
            }
        }

        if std::env::var("PONDER_DISABLE_ROLLOVER").is_ok() {
            self.enable_rollover = false;
        }
    }
}

/// External services the agent depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub interpreter: Arc<dyn Interpreter>,
    pub generator: Arc<dyn Generator>,
    pub embedder: Arc<dyn Embedder>,
    pub summarizer: Arc<dyn Summarizer>,
    pub tools: Arc<dyn ToolBackend>,
    /// Where responses go. Defaults to the runtime's event bus.
    pub sink: Option<Arc<dyn ResponseSink>>,
}

async fn run_rollover(memory: &TieredMemoryStore, events: &EventBus) -> RolloverReport {
    let now = Utc::now();
    let report = memory.rollover(now.date_naive()).await;
    if !report.failed_days.is_empty() {
        warn!(days = ?report.failed_days, "Some days could not be archived");
    }
    if !report.archived_days.is_empty() {
        info!(
            archived = report.archived_days.len(),
            purged = report.purged,
            "Day rollover complete"
        );
        events.emit(AgentEvent::DaysArchived {
            days: report.archived_days.clone(),
            purged: report.purged,
            timestamp: now,
        });
    }
    report
}

/// Owns every agent component and the background tasks driving them.
///
/// # Example
///
/// ```ignore
/// let mut runtime = AgentRuntime::new(AgentConfig::from_env(), collaborators).await?;
/// runtime.start().await?;
/// runtime.ingest(RawEvent::user_input("hello"));
/// // ...
/// runtime.shutdown().await?;
/// ```
pub struct AgentRuntime {
    config: AgentConfig,
    store: Arc<SqliteStateStore>,
    buffer: Arc<ThoughtBuffer>,
    memory: Arc<TieredMemoryStore>,
    tracker: ToolActionTracker,
    instructions: Arc<InstructionTTLCache<String>>,
    events: EventBus,
    /// Taken by `start`.
    scheduler: Option<CognitiveScheduler>,
    loop_handle: Option<JoinHandle<CycleStats>>,
    jobs: Option<JobScheduler>,
    shutdown: CancellationToken,
}

impl AgentRuntime {
    /// Open the store, restore persisted state and build the components.
    ///
    /// Nothing runs until [`AgentRuntime::start`].
    pub async fn new(config: AgentConfig, collaborators: Collaborators) -> PonderResult<Self> {
        config.validate()?;
        debug!(
            db_path = ?config.runtime.db_path,
            rollover_enabled = config.runtime.enable_rollover,
            "Creating AgentRuntime"
        );

        let store = match &config.runtime.db_path {
            Some(path) => {
                debug!(path = %path.display(), "Creating file-backed state store");
                Arc::new(SqliteStateStore::new(path)?)
            }
            None => {
                debug!("Creating in-memory state store");
                Arc::new(SqliteStateStore::in_memory()?)
            }
        };

        let buffer = Arc::new(ThoughtBuffer::new(PriorityMap::default()));
        let restored = buffer.restore(store.load_thoughts()?)?;

        let memory = Arc::new(
            TieredMemoryStore::new(
                config.memory.clone(),
                collaborators.embedder,
                collaborators.summarizer,
            )
            .with_persistence(store.clone()),
        );
        let memory_stats = memory.restore()?;
        let static_chunks = memory.load_static(&config.memory.static_paths);
        info!(
            thoughts = restored,
            recent = memory_stats.recent,
            daily = memory_stats.daily,
            archived = memory_stats.archived,
            static_chunks,
            "Agent state restored"
        );

        let tracker =
            ToolActionTracker::new(config.tools.clone(), collaborators.tools, buffer.clone());
        let instructions = Arc::new(InstructionTTLCache::new(config.instructions.ttl()));
        let events = EventBus::new();
        let sink = collaborators
            .sink
            .unwrap_or_else(|| Arc::new(events.clone()) as Arc<dyn ResponseSink>);

        let scheduler = CognitiveScheduler::new(
            &config,
            SchedulerParts {
                buffer: buffer.clone(),
                memory: memory.clone(),
                tracker: tracker.clone(),
                instructions: instructions.clone(),
                interpreter: collaborators.interpreter,
                generator: collaborators.generator,
                sink,
            },
        )
        .with_events(events.clone())
        .with_persistence(store.clone());

        Ok(Self {
            config,
            store,
            buffer,
            memory,
            tracker,
            instructions,
            events,
            scheduler: Some(scheduler),
            loop_handle: None,
            jobs: None,
            shutdown: CancellationToken::new(),
        })
    }

    /// Start the cognitive loop and the maintenance jobs.
    pub async fn start(&mut self) -> PonderResult<()> {
        let scheduler = self
            .scheduler
            .take()
            .ok_or_else(|| PonderError::internal("runtime already started"))?;

        let runtime = &self.config.runtime;
        if runtime.enable_rollover && runtime.rollover_on_start {
            debug!("Running initial day rollover");
            run_rollover(&self.memory, &self.events).await;
        }

        let jobs = JobScheduler::new()
            .await
            .map_err(|e| PonderError::internal(format!("Failed to create job scheduler: {}", e)))?;

        if runtime.enable_rollover {
            let memory = self.memory.clone();
            let events = self.events.clone();
            let job = Job::new_repeated_async(
                Duration::from_secs(runtime.rollover_check_minutes.max(1) * 60),
                move |_uuid, _lock| {
                    let memory = memory.clone();
                    let events = events.clone();
                    Box::pin(async move {
                        debug!("Checking for completed days");
                        run_rollover(&memory, &events).await;
                    })
                },
            )
            .map_err(|e| PonderError::internal(format!("Failed to create rollover job: {}", e)))?;
            jobs.add(job)
                .await
                .map_err(|e| PonderError::internal(format!("Failed to add rollover job: {}", e)))?;
        }

        let instructions = self.instructions.clone();
        let tracker = self.tracker.clone();
        let housekeeping = Job::new_repeated_async(
            Duration::from_secs(runtime.housekeeping_minutes.max(1) * 60),
            move |_uuid, _lock| {
                let instructions = instructions.clone();
                let tracker = tracker.clone();
                Box::pin(async move {
                    let now = Utc::now();
                    let expired = instructions.sweep_expired(now);
                    let pruned = tracker.prune(now);
                    debug!(expired, pruned, "Housekeeping complete");
                })
            },
        )
        .map_err(|e| PonderError::internal(format!("Failed to create housekeeping job: {}", e)))?;
        jobs.add(housekeeping)
            .await
            .map_err(|e| PonderError::internal(format!("Failed to add housekeeping job: {}", e)))?;

        jobs.start()
            .await
            .map_err(|e| PonderError::internal(format!("Failed to start job scheduler: {}", e)))?;
        self.jobs = Some(jobs);

        self.loop_handle = Some(tokio::spawn(scheduler.run(self.shutdown.child_token())));

        info!(
            rollover_minutes = runtime.rollover_check_minutes,
            housekeeping_minutes = runtime.housekeeping_minutes,
            rollover_enabled = runtime.enable_rollover,
            "Agent runtime started"
        );
        Ok(())
    }

    /// Stop the loop, cancel in-flight tool actions and stop the jobs.
    pub async fn shutdown(&mut self) -> PonderResult<Option<CycleStats>> {
        debug!("Shutting down agent runtime");
        self.shutdown.cancel();

        let stats = match self.loop_handle.take() {
            Some(handle) => match handle.await {
                Ok(stats) => Some(stats),
                Err(e) => {
                    error!(error = %e, "Cognitive loop task failed");
                    None
                }
            },
            None => None,
        };

        let cancelled = self.tracker.cancel_all().await;
        if cancelled > 0 {
            debug!(cancelled, "Cancelled in-flight tool actions");
        }

        if let Some(mut jobs) = self.jobs.take() {
            jobs.shutdown().await.map_err(|e| {
                PonderError::internal(format!("Failed to shutdown job scheduler: {}", e))
            })?;
            debug!("Job scheduler stopped");
        }

        info!("Agent runtime stopped");
        Ok(stats)
    }

    /// Queue an event for the next cycle.
    pub fn ingest(&self, event: RawEvent) {
        self.buffer.ingest(event);
    }

    /// Archive completed days now, outside the job schedule.
    pub async fn rollover_now(&self) -> RolloverReport {
        run_rollover(&self.memory, &self.events).await
    }

    pub fn subscribe(&self) -> EventSubscriber {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.loop_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn buffer(&self) -> Arc<ThoughtBuffer> {
        self.buffer.clone()
    }

    pub fn memory(&self) -> Arc<TieredMemoryStore> {
        self.memory.clone()
    }

    pub fn tracker(&self) -> &ToolActionTracker {
        &self.tracker
    }

    pub fn instructions(&self) -> Arc<InstructionTTLCache<String>> {
        self.instructions.clone()
    }

    pub fn store(&self) -> Arc<SqliteStateStore> {
        self.store.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}
