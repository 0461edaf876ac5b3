//! The cognitive loop.
//!
//! Each cycle folds in a finished response, drains pending events and turns
//! them into thoughts (or thinks on its own when nothing arrived), dispatches
//! the tool calls interpretation asked for, and finally applies the speak
//! rule. Generation runs on its own task so thinking never waits on it.

mod decision;
mod pacing;

pub use decision::{DecisionInput, ResponseDecider};
pub use pacing::{AdaptivePacer, CycleStats};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::ThoughtBuffer;
use crate::config::{AgentConfig, SchedulerConfig};
use crate::error::{PonderError, PonderResult};
use crate::events::{AgentEvent, EventBus};
use crate::memory::TieredMemoryStore;
use crate::store::SqliteStateStore;
use crate::tools::ToolActionTracker;
use crate::traits::{
    GenerationRequest, Generator, InterpretContext, Interpretation, Interpreter, ReflectionMode,
    ResponseSink, ToolCall,
};
use crate::ttl::InstructionTTLCache;
use crate::types::{
    source, Priority, RawEvent, Response, SearchHit, SearchScope, SpeakReason, Thought, ThoughtId,
};

/// Components the scheduler drives.
#[derive(Clone)]
pub struct SchedulerParts {
    pub buffer: Arc<ThoughtBuffer>,
    pub memory: Arc<TieredMemoryStore>,
    pub tracker: ToolActionTracker,
    pub instructions: Arc<InstructionTTLCache<String>>,
    pub interpreter: Arc<dyn Interpreter>,
    pub generator: Arc<dyn Generator>,
    pub sink: Arc<dyn ResponseSink>,
}

/// Which branch a cycle took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    /// Pending events were drained.
    Reactive,
    /// No events; the agent produced an idle thought.
    Proactive,
    /// Nothing to do.
    Idle,
}

/// Result of one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub kind: CycleKind,
    pub thoughts_added: usize,
    /// Set when this cycle started a generation.
    pub speaking: Option<SpeakReason>,
    /// A response that finished and was delivered during this cycle.
    pub delivered: Option<Response>,
}

impl CycleOutcome {
    pub fn did_work(&self) -> bool {
        self.kind != CycleKind::Idle
            || self.thoughts_added > 0
            || self.speaking.is_some()
            || self.delivered.is_some()
    }
}

struct PendingGeneration {
    reason: SpeakReason,
    thought_ids: Vec<ThoughtId>,
    handle: JoinHandle<PonderResult<String>>,
}

fn is_conversational(source_tag: &str) -> bool {
    matches!(
        source_tag,
        source::USER_INPUT
            | source::CHAT_QUESTION
            | source::CHAT_MESSAGE
            | source::DIRECT_MENTION
            | source::CHAT_DIRECT_MENTION
    )
}

fn is_proactive(thought: &Thought) -> bool {
    thought.is_from(source::PROACTIVE_REFLECTION) || thought.is_from(source::PROACTIVE_PLANNING)
}

/// Single-writer driver of the thought log.
pub struct CognitiveScheduler {
    config: SchedulerConfig,
    context_thoughts: usize,
    decider: ResponseDecider,
    parts: SchedulerParts,
    events: Option<EventBus>,
    persistence: Option<Arc<SqliteStateStore>>,
    generation: Option<PendingGeneration>,
    interpret_attempts: u32,
    next_idle_mode: ReflectionMode,
    pacer: AdaptivePacer,
    stats: CycleStats,
}

impl CognitiveScheduler {
    pub fn new(config: &AgentConfig, parts: SchedulerParts) -> Self {
        Self {
            config: config.scheduler.clone(),
            context_thoughts: config.buffer.context_thoughts,
            decider: ResponseDecider::new(&config.decision),
            parts,
            events: None,
            persistence: None,
            generation: None,
            interpret_attempts: 0,
            next_idle_mode: ReflectionMode::Reflective,
            pacer: AdaptivePacer::new(&config.scheduler),
            stats: CycleStats::default(),
        }
    }

    /// Broadcast thoughts and failures on `bus`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Persist every thought and spoken flag to `store`.
    pub fn with_persistence(mut self, store: Arc<SqliteStateStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    pub fn buffer(&self) -> &Arc<ThoughtBuffer> {
        &self.parts.buffer
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    /// Whether a response is being generated.
    pub fn is_generating(&self) -> bool {
        self.generation.is_some()
    }

    /// Run cycles until `shutdown` fires. Returns the final statistics.
    pub async fn run(mut self, shutdown: CancellationToken) -> CycleStats {
        info!("Cognitive loop started");
        let stats_every = self.config.stats_log_interval();
        let mut last_stats = tokio::time::Instant::now();

        loop {
            let did_work = match self.cycle().await {
                Ok(outcome) => outcome.did_work(),
                Err(e) => {
                    error!(error = %e, code = %e.code(), "Cognitive loop halted");
                    break;
                }
            };

            if last_stats.elapsed() >= stats_every {
                self.log_stats();
                last_stats = tokio::time::Instant::now();
            }

            let urgent = self
                .parts
                .buffer
                .highest_unspoken_priority()
                .map_or(false, |p| p >= Priority::High);
            let delay = self.pacer.next(did_work, urgent);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if let Some(pending) = self.generation.take() {
            debug!(reason = %pending.reason, "Abandoning in-flight generation");
            pending.handle.abort();
        }
        self.log_stats();
        info!("Cognitive loop stopped");
        self.stats
    }

    fn log_stats(&self) {
        let s = &self.stats;
        info!(
            cycles = s.total,
            reactive = s.reactive,
            proactive = s.proactive,
            idle = s.idle,
            thoughts = s.thoughts,
            responses = s.responses,
            failed_generations = s.failed_generations,
            interpret_failures = s.interpret_failures,
            "Cognitive loop stats"
        );
    }

    pub async fn cycle(&mut self) -> PonderResult<CycleOutcome> {
        self.cycle_at(Utc::now()).await
    }

    /// One cycle with an explicit clock reading.
    ///
    /// Only invariant violations are returned as errors; every external
    /// failure is logged and absorbed.
    pub async fn cycle_at(&mut self, now: DateTime<Utc>) -> PonderResult<CycleOutcome> {
        let delivered = self.collect_generation(now, false).await?;

        let events = self.parts.buffer.drain_pending();
        let (kind, thoughts_added) = if !events.is_empty() {
            (CycleKind::Reactive, self.process_events(events, now).await?)
        } else if self.proactive_due(now) {
            (CycleKind::Proactive, self.think_proactively(now).await?)
        } else {
            (CycleKind::Idle, 0)
        };

        let speaking = if self.generation.is_some() {
            None
        } else {
            self.decider.evaluate(&self.parts.buffer, now)
        };
        if let Some(reason) = speaking {
            self.start_generation(reason).await;
        }

        self.stats.total += 1;
        match kind {
            CycleKind::Reactive => self.stats.reactive += 1,
            CycleKind::Proactive => self.stats.proactive += 1,
            CycleKind::Idle => self.stats.idle += 1,
        }

        Ok(CycleOutcome {
            kind,
            thoughts_added,
            speaking,
            delivered,
        })
    }

    /// Wait for the in-flight generation, if any, and deliver it at `now`.
    pub async fn finish_generation_at(
        &mut self,
        now: DateTime<Utc>,
    ) -> PonderResult<Option<Response>> {
        self.collect_generation(now, true).await
    }

    // ------------------------------------------------------------------
    // Reactive branch
    // ------------------------------------------------------------------

    async fn process_events(
        &mut self,
        events: Vec<RawEvent>,
        now: DateTime<Utc>,
    ) -> PonderResult<usize> {
        let context = self.interpret_context(&events, now).await;
        let timeout = self.config.interpret_timeout();
        let result = match tokio::time::timeout(
            timeout,
            self.parts.interpreter.interpret(&events, &context),
        )
        .await
        {
            Ok(Ok(list)) if list.len() == events.len() => Ok(list),
            Ok(Ok(list)) => Err(PonderError::interpretation(format!(
                "{} interpretations for {} events",
                list.len(),
                events.len()
            ))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PonderError::timeout("interpret", timeout)),
        };

        let interpretations = match result {
            Ok(list) => {
                self.interpret_attempts = 0;
                list
            }
            Err(e) => {
                self.stats.interpret_failures += 1;
                self.interpret_attempts += 1;
                if self.interpret_attempts < self.config.max_interpret_attempts {
                    warn!(
                        error = %e,
                        attempt = self.interpret_attempts,
                        events = events.len(),
                        "Interpretation failed, requeueing batch"
                    );
                    self.parts.buffer.requeue(events);
                    return Ok(0);
                }
                warn!(
                    error = %e,
                    events = events.len(),
                    "Interpretation failed, keeping events as literal thoughts"
                );
                self.interpret_attempts = 0;
                events
                    .iter()
                    .map(|e| Interpretation::new(format!("I noticed: {}", e.payload_text)))
                    .collect()
            }
        };

        let mut added = 0;
        for (event, interpretation) in events.iter().zip(interpretations) {
            let Interpretation {
                content,
                priority,
                tool_calls,
                instructions,
            } = interpretation;

            let priority = event
                .priority_override
                .or(priority)
                .unwrap_or_else(|| self.parts.buffer.classify(event));
            let content = if content.trim().is_empty() {
                event.payload_text.clone()
            } else {
                content
            };
            self.record_thought(content, &event.source_tag, Some(priority), now);
            added += 1;

            if event.source_tag == source::USER_INPUT {
                self.remember(&event.payload_text, "user", event.received_at)
                    .await?;
            }
            added += self.apply_requests(tool_calls, instructions, now)?;
        }
        Ok(added)
    }

    async fn interpret_context(&self, events: &[RawEvent], now: DateTime<Utc>) -> InterpretContext {
        let recent = self.parts.buffer.recent_thoughts(self.context_thoughts);
        let query = events
            .iter()
            .filter(|e| is_conversational(&e.source_tag))
            .map(|e| e.payload_text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let memories = if query.is_empty() {
            Vec::new()
        } else {
            self.search_memories(&query, &recent).await
        };
        self.context(recent, memories, now)
    }

    fn context(
        &self,
        recent_thoughts: Vec<Thought>,
        memories: Vec<SearchHit>,
        now: DateTime<Utc>,
    ) -> InterpretContext {
        let mut active_instructions = self.parts.instructions.active_keys(now);
        active_instructions.sort();
        InterpretContext {
            recent_thoughts,
            active_instructions,
            tool_awareness: self.parts.tracker.awareness_context(now),
            memories,
        }
    }

    async fn search_memories(&self, query: &str, recent: &[Thought]) -> Vec<SearchHit> {
        let context: Vec<String> = recent.iter().map(|t| t.content.clone()).collect();
        self.parts
            .memory
            .search(
                query,
                &context,
                self.config.memory_context_k,
                SearchScope::default(),
            )
            .await
    }

    /// Activate instructions and dispatch tool calls. Returns thoughts added.
    fn apply_requests(
        &mut self,
        tool_calls: Vec<ToolCall>,
        instructions: Vec<String>,
        now: DateTime<Utc>,
    ) -> PonderResult<usize> {
        for key in instructions {
            if self.parts.instructions.activate(key.clone(), now) {
                debug!(instruction = %key, "Instruction activated");
            }
        }

        let mut added = 0;
        for call in tool_calls {
            let tool = call.tool_name;
            if let Some(reason) = self.parts.tracker.should_throttle(&tool, now) {
                debug!(tool = %tool, reason = %reason, "Tool call throttled");
                self.record_thought(
                    format!("[{}] not run: {}", tool, reason),
                    source::TOOL_THROTTLED,
                    None,
                    now,
                );
                added += 1;
                continue;
            }

            match self.parts.tracker.dispatch(tool.clone(), call.args) {
                Ok(action_id) => {
                    self.parts.instructions.activate(tool.clone(), now);
                    self.record_thought(
                        format!("[{}] started (action {})", tool, action_id),
                        source::TOOL_INITIATED,
                        None,
                        now,
                    );
                }
                Err(e) if e.is_invariant_violation() => return Err(e),
                Err(e) => {
                    warn!(tool = %tool, error = %e, "Tool dispatch failed");
                    self.record_thought(
                        format!("[{}] could not start: {}", tool, e),
                        source::TOOL_ERROR,
                        None,
                        now,
                    );
                }
            }
            added += 1;
        }
        Ok(added)
    }

    // ------------------------------------------------------------------
    // Proactive branch
    // ------------------------------------------------------------------

    fn proactive_due(&self, now: DateTime<Utc>) -> bool {
        let quiet = self
            .parts
            .buffer
            .time_since_last_thought(now)
            .unwrap_or_else(|| self.parts.buffer.time_since_start(now));
        quiet >= self.config.proactive_interval()
    }

    async fn think_proactively(&mut self, now: DateTime<Utc>) -> PonderResult<usize> {
        let idle_for = self
            .parts
            .buffer
            .time_since_user_input(now)
            .unwrap_or_else(|| self.parts.buffer.time_since_start(now));

        // Past the idle threshold, alternate memory reflection with planning.
        let (mode, with_memories) = if idle_for >= self.config.idle_threshold() {
            let mode = self.next_idle_mode;
            self.next_idle_mode = match mode {
                ReflectionMode::Reflective => ReflectionMode::Planning,
                ReflectionMode::Planning => ReflectionMode::Reflective,
            };
            (mode, mode == ReflectionMode::Reflective)
        } else {
            (ReflectionMode::Reflective, false)
        };

        let recent = self.parts.buffer.recent_thoughts(self.context_thoughts);
        let anchor = recent
            .iter()
            .rev()
            .find(|t| !is_proactive(t))
            .or_else(|| recent.last())
            .map(|t| t.content.clone());
        let memories = match anchor {
            Some(anchor) if with_memories => self.search_memories(&anchor, &recent).await,
            _ => Vec::new(),
        };
        let context = self.context(recent, memories, now);

        let timeout = self.config.interpret_timeout();
        let interpretation = match tokio::time::timeout(
            timeout,
            self.parts.interpreter.reflect(mode, &context),
        )
        .await
        {
            Ok(Ok(i)) if !i.content.trim().is_empty() => i,
            Ok(Ok(_)) => {
                debug!(mode = %mode, "Reflection produced nothing");
                return Ok(0);
            }
            Ok(Err(e)) => {
                warn!(mode = %mode, error = %e, "Reflection failed");
                return Ok(0);
            }
            Err(_) => {
                warn!(mode = %mode, timeout_secs = timeout.as_secs(), "Reflection timed out");
                return Ok(0);
            }
        };

        let tag = match mode {
            ReflectionMode::Reflective => source::PROACTIVE_REFLECTION,
            ReflectionMode::Planning => source::PROACTIVE_PLANNING,
        };
        let priority = interpretation
            .priority
            .unwrap_or_else(|| self.parts.buffer.priorities().classify(tag))
            .at_most(Priority::Medium);

        self.record_thought(interpretation.content, tag, Some(priority), now);
        let requested =
            self.apply_requests(interpretation.tool_calls, interpretation.instructions, now)?;
        Ok(1 + requested)
    }

    // ------------------------------------------------------------------
    // Speaking
    // ------------------------------------------------------------------

    async fn start_generation(&mut self, reason: SpeakReason) {
        let unspoken = self.parts.buffer.unspoken_thoughts();
        if unspoken.is_empty() {
            return;
        }
        let recent = self.parts.buffer.recent_thoughts(self.context_thoughts);
        let anchor = unspoken
            .iter()
            .rev()
            .find(|t| t.priority >= Priority::Medium)
            .or_else(|| unspoken.last())
            .map(|t| t.content.clone())
            .unwrap_or_default();
        let memories = self.search_memories(&anchor, &recent).await;

        let thought_ids = unspoken.iter().map(|t| t.id).collect();
        let request = GenerationRequest {
            reason,
            unspoken,
            recent,
            memories,
        };
        info!(reason = %reason, thoughts = request.unspoken.len(), "Generating response");

        let generator = self.parts.generator.clone();
        let timeout = self.config.generate_timeout();
        let handle = tokio::spawn(async move {
            match tokio::time::timeout(timeout, generator.generate(&request)).await {
                Ok(result) => result,
                Err(_) => Err(PonderError::timeout("generate", timeout)),
            }
        });

        self.generation = Some(PendingGeneration {
            reason,
            thought_ids,
            handle,
        });
    }

    async fn collect_generation(
        &mut self,
        now: DateTime<Utc>,
        wait: bool,
    ) -> PonderResult<Option<Response>> {
        let ready = match &self.generation {
            Some(pending) => wait || pending.handle.is_finished(),
            None => false,
        };
        if !ready {
            return Ok(None);
        }
        let Some(pending) = self.generation.take() else {
            return Ok(None);
        };

        let result = match pending.handle.await {
            Ok(result) => result,
            Err(e) => Err(PonderError::internal(format!("generation task failed: {}", e))),
        };
        match result {
            Ok(text) if !text.trim().is_empty() => {
                let response = self
                    .deliver(pending.reason, pending.thought_ids, text, now)
                    .await?;
                Ok(Some(response))
            }
            Ok(_) => {
                self.generation_failed(pending.reason, "empty response".to_string(), now);
                Ok(None)
            }
            Err(e) => {
                self.generation_failed(pending.reason, e.to_string(), now);
                Ok(None)
            }
        }
    }

    fn generation_failed(&mut self, reason: SpeakReason, error: String, now: DateTime<Utc>) {
        warn!(reason = %reason, error = %error, "Generation failed, staying silent");
        self.stats.failed_generations += 1;
        self.emit(AgentEvent::GenerationFailed {
            reason,
            error,
            timestamp: now,
        });
    }

    async fn deliver(
        &mut self,
        reason: SpeakReason,
        thought_ids: Vec<ThoughtId>,
        text: String,
        now: DateTime<Utc>,
    ) -> PonderResult<Response> {
        let buffer = &self.parts.buffer;
        let echo = buffer.append_spoken_at(text.clone(), source::RESPONSE_ECHO, None, now);
        let marked = buffer.mark_spoken(&thought_ids);
        buffer.record_response(echo.created_at);

        self.persist(&echo);
        if let Some(store) = &self.persistence {
            if let Err(e) = store.mark_spoken(&thought_ids) {
                warn!(error = %e, "Failed to persist spoken flags");
            }
        }

        let response = Response {
            text,
            reason,
            thought_ids,
            created_at: echo.created_at,
        };
        info!(
            reason = %reason,
            marked,
            chars = response.text.len(),
            "Response delivered"
        );
        if let Err(e) = self.parts.sink.deliver(&response).await {
            warn!(error = %e, "Response sink rejected response");
        }
        self.remember(&response.text, "agent", response.created_at)
            .await?;
        self.stats.responses += 1;
        self.emit(AgentEvent::Thought(echo));
        Ok(response)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn record_thought(
        &mut self,
        content: String,
        source_tag: &str,
        priority: Option<Priority>,
        now: DateTime<Utc>,
    ) -> Thought {
        let thought = self
            .parts
            .buffer
            .append_thought_at(content, source_tag, priority, now);
        self.persist(&thought);
        self.stats.thoughts += 1;
        self.emit(AgentEvent::Thought(thought.clone()));
        thought
    }

    fn persist(&self, thought: &Thought) {
        if let Some(store) = &self.persistence {
            if let Err(e) = store.save_thought(thought) {
                warn!(thought_id = thought.id, error = %e, "Failed to persist thought");
            }
        }
    }

    /// Write conversation text to memory. Only invariant violations propagate.
    async fn remember(&self, text: &str, role: &str, at: DateTime<Utc>) -> PonderResult<()> {
        match self.parts.memory.insert(text, role, at).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_invariant_violation() => {
                error!(error = %e, "Memory invariant violated");
                Err(e)
            }
            Err(e) => {
                warn!(role, error = %e, "Failed to record memory");
                Ok(())
            }
        }
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::config::AgentConfig;
    use crate::test_support::{
        CollectingSink, JoinSummarizer, ScriptedGenerator, ScriptedInterpreter, WordEmbedder,
    };
    use crate::tools::ToolRegistry;
    use crate::traits::Tool;
    use crate::types::PriorityMap;

    struct Lookup;

    #[async_trait]
    impl Tool for Lookup {
        fn name(&self) -> &str {
            "lookup"
        }

        async fn execute(&self, _args: &serde_json::Value) -> PonderResult<String> {
            Ok("found it".to_string())
        }
    }

    struct Harness {
        scheduler: CognitiveScheduler,
        buffer: Arc<ThoughtBuffer>,
        memory: Arc<TieredMemoryStore>,
        instructions: Arc<InstructionTTLCache<String>>,
        interpreter: Arc<ScriptedInterpreter>,
        generator: Arc<ScriptedGenerator>,
        sink: Arc<CollectingSink>,
        t0: DateTime<Utc>,
    }

    impl Harness {
        fn at(&self, secs: i64) -> DateTime<Utc> {
            self.t0 + chrono::Duration::seconds(secs)
        }
    }

    /// Proactive thinking is pushed out of the way unless a test opts in.
    fn quiet_config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.scheduler.proactive_interval_secs = 3600;
        config
    }

    fn harness(config: AgentConfig) -> Harness {
        // Real "now": the tracker stamps dispatches with the wall clock.
        let t0 = Utc::now();
        let buffer = Arc::new(ThoughtBuffer::started_at(PriorityMap::default(), t0));
        let memory = Arc::new(TieredMemoryStore::new(
            config.memory.clone(),
            Arc::new(WordEmbedder::new(128)),
            Arc::new(JoinSummarizer::default()),
        ));
        let registry = ToolRegistry::new().with_tool(Arc::new(Lookup));
        let tracker = ToolActionTracker::new(
            config.tools.clone(),
            Arc::new(registry),
            buffer.clone(),
        );
        let instructions = Arc::new(InstructionTTLCache::new(config.instructions.ttl()));
        let interpreter = Arc::new(ScriptedInterpreter::default());
        let generator = Arc::new(ScriptedGenerator::new("Here is what I think."));
        let sink = Arc::new(CollectingSink::default());

        let scheduler = CognitiveScheduler::new(
            &config,
            SchedulerParts {
                buffer: buffer.clone(),
                memory: memory.clone(),
                tracker,
                instructions: instructions.clone(),
                interpreter: interpreter.clone(),
                generator: generator.clone(),
                sink: sink.clone(),
            },
        );

        Harness {
            scheduler,
            buffer,
            memory,
            instructions,
            interpreter,
            generator,
            sink,
            t0,
        }
    }

    fn event_at(tag: &str, text: &str, at: DateTime<Utc>) -> RawEvent {
        RawEvent::at(tag, text, at)
    }

    #[tokio::test]
    async fn test_user_input_becomes_high_thought_and_memory() {
        let mut h = harness(quiet_config());
        h.buffer.ingest(event_at(source::USER_INPUT, "hello there", h.t0));

        let outcome = h.scheduler.cycle_at(h.t0).await.unwrap();
        assert_eq!(outcome.kind, CycleKind::Reactive);
        assert_eq!(outcome.thoughts_added, 1);
        assert_eq!(outcome.speaking, None);

        let thoughts = h.buffer.thoughts();
        assert_eq!(thoughts.len(), 1);
        assert_eq!(thoughts[0].content, "thinking about hello there");
        assert_eq!(thoughts[0].priority, Priority::High);
        assert!(!thoughts[0].spoken);

        let recent = h.memory.recent(5);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].text, "hello there");
        assert_eq!(recent[0].role(), Some("user"));
    }

    #[tokio::test]
    async fn test_high_priority_waits_for_quiet_user() {
        let mut h = harness(quiet_config());
        h.buffer.ingest(event_at(source::USER_INPUT, "what is rust", h.t0));
        h.scheduler.cycle_at(h.t0).await.unwrap();

        let at5 = h.scheduler.cycle_at(h.at(5)).await.unwrap();
        assert_eq!(at5.speaking, None);
        assert_eq!(h.generator.request_count(), 0);

        let at9 = h.scheduler.cycle_at(h.at(9)).await.unwrap();
        assert_eq!(at9.speaking, Some(SpeakReason::HighPriorityWaitElapsed));

        let response = h
            .scheduler
            .finish_generation_at(h.at(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.text, "Here is what I think.");
        assert_eq!(response.reason, SpeakReason::HighPriorityWaitElapsed);
        assert_eq!(response.thought_ids, vec![0]);
        assert_eq!(h.sink.delivered(), vec![response.clone()]);

        assert_eq!(h.buffer.unspoken_count(), 0);
        assert_eq!(h.buffer.last_response_at(), Some(h.at(10)));
        let echo = h.buffer.get(1).unwrap();
        assert!(echo.is_from(source::RESPONSE_ECHO));
        assert!(echo.spoken);
        assert_eq!(echo.priority, Priority::Low);

        let roles: Vec<_> = h
            .memory
            .recent(5)
            .iter()
            .map(|r| r.role().map(str::to_string))
            .collect();
        assert_eq!(roles, vec![Some("user".into()), Some("agent".into())]);
        assert_eq!(h.scheduler.stats().responses, 1);
    }

    #[tokio::test]
    async fn test_critical_speaks_in_same_cycle() {
        let mut h = harness(quiet_config());
        h.buffer
            .ingest(event_at(source::DIRECT_MENTION, "hey ponder", h.t0));

        let outcome = h.scheduler.cycle_at(h.t0).await.unwrap();
        assert_eq!(outcome.speaking, Some(SpeakReason::Critical));
        assert!(h.scheduler.is_generating());

        let request = {
            h.scheduler.finish_generation_at(h.t0).await.unwrap();
            h.generator.requests.lock().unwrap()[0].clone()
        };
        assert_eq!(request.reason, SpeakReason::Critical);
        assert_eq!(request.unspoken.len(), 1);
        assert_eq!(request.unspoken[0].priority, Priority::Critical);
    }

    #[tokio::test]
    async fn test_accumulated_observations_after_31s() {
        let mut h = harness(quiet_config());
        for i in 0..5 {
            h.buffer
                .ingest(event_at(source::OBSERVATION, &format!("sight {}", i), h.t0));
        }
        let first = h.scheduler.cycle_at(h.t0).await.unwrap();
        assert_eq!(first.thoughts_added, 5);
        assert_eq!(first.speaking, None);

        let later = h.scheduler.cycle_at(h.at(31)).await.unwrap();
        assert_eq!(later.kind, CycleKind::Idle);
        assert_eq!(later.speaking, Some(SpeakReason::AccumulatedObservations));
    }

    #[tokio::test]
    async fn test_interpret_failure_requeues_then_falls_back() {
        let mut h = harness(quiet_config());
        h.interpreter.fail_times(10);
        h.buffer.ingest(event_at(source::CHAT_MESSAGE, "ping", h.t0));

        let first = h.scheduler.cycle_at(h.t0).await.unwrap();
        assert_eq!(first.thoughts_added, 0);
        assert!(h.buffer.is_empty());
        assert_eq!(h.buffer.pending_len(), 1);

        let second = h.scheduler.cycle_at(h.at(1)).await.unwrap();
        assert_eq!(second.thoughts_added, 1);
        assert_eq!(h.buffer.pending_len(), 0);
        let thoughts = h.buffer.thoughts();
        assert_eq!(thoughts.len(), 1);
        assert_eq!(thoughts[0].content, "I noticed: ping");
        assert_eq!(thoughts[0].priority, Priority::Medium);
        assert_eq!(h.scheduler.stats().interpret_failures, 2);
    }

    #[tokio::test]
    async fn test_interpret_failure_recovers_on_retry() {
        let mut h = harness(quiet_config());
        h.interpreter.fail_times(1);
        h.buffer.ingest(event_at(source::CHAT_MESSAGE, "ping", h.t0));

        h.scheduler.cycle_at(h.t0).await.unwrap();
        h.scheduler.cycle_at(h.at(1)).await.unwrap();

        let thoughts = h.buffer.thoughts();
        assert_eq!(thoughts.len(), 1);
        assert_eq!(thoughts[0].content, "thinking about ping");
    }

    #[tokio::test(start_paused = true)]
    async fn test_interpret_timeout_requeues() {
        let mut h = harness(quiet_config());
        h.interpreter.set_hanging(true);
        h.buffer.ingest(event_at(source::CHAT_MESSAGE, "ping", h.t0));

        let outcome = h.scheduler.cycle_at(h.t0).await.unwrap();
        assert_eq!(outcome.thoughts_added, 0);
        assert_eq!(h.buffer.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_idle_thought_clamped_to_medium() {
        let mut h = harness(AgentConfig::default());
        h.interpreter.set_reflect_priority(Some(Priority::Critical));

        let early = h.scheduler.cycle_at(h.at(2)).await.unwrap();
        assert_eq!(early.kind, CycleKind::Idle);

        let outcome = h.scheduler.cycle_at(h.at(6)).await.unwrap();
        assert_eq!(outcome.kind, CycleKind::Proactive);
        assert_eq!(outcome.speaking, None);

        let thought = h.buffer.get(0).unwrap();
        assert!(thought.is_from(source::PROACTIVE_REFLECTION));
        assert_eq!(thought.priority, Priority::Medium);
    }

    #[tokio::test]
    async fn test_idle_modes_alternate_past_threshold() {
        let mut config = AgentConfig::default();
        config.scheduler.idle_threshold_secs = 60;
        let mut h = harness(config);

        h.scheduler.cycle_at(h.at(6)).await.unwrap();
        h.scheduler.cycle_at(h.at(61)).await.unwrap();
        h.scheduler.cycle_at(h.at(67)).await.unwrap();
        h.scheduler.cycle_at(h.at(73)).await.unwrap();

        let modes = h.interpreter.reflections.lock().unwrap().clone();
        assert_eq!(
            modes,
            vec![
                ReflectionMode::Reflective,
                ReflectionMode::Reflective,
                ReflectionMode::Planning,
                ReflectionMode::Reflective,
            ]
        );
        let tags: Vec<String> = h.buffer.thoughts().into_iter().map(|t| t.source_tag).collect();
        assert_eq!(
            tags,
            vec![
                source::PROACTIVE_REFLECTION,
                source::PROACTIVE_REFLECTION,
                source::PROACTIVE_PLANNING,
                source::PROACTIVE_REFLECTION,
            ]
        );
        assert!(h
            .buffer
            .thoughts()
            .iter()
            .all(|t| t.priority == Priority::Low));
    }

    #[tokio::test]
    async fn test_tool_call_dispatched_then_throttled() {
        let mut h = harness(quiet_config());
        h.buffer
            .ingest(event_at(source::CHAT_MESSAGE, "call:lookup", h.t0));

        let outcome = h.scheduler.cycle_at(h.t0).await.unwrap();
        assert_eq!(outcome.thoughts_added, 2);
        let started = h.buffer.get(1).unwrap();
        assert!(started.is_from(source::TOOL_INITIATED));
        assert!(started.content.starts_with("[lookup] started"));
        assert!(h.instructions.is_active(&"lookup".to_string(), h.t0));

        h.buffer
            .ingest(event_at(source::CHAT_MESSAGE, "call:lookup", h.at(1)));
        h.scheduler.cycle_at(h.at(1)).await.unwrap();

        let throttled: Vec<Thought> = h
            .buffer
            .thoughts()
            .into_iter()
            .filter(|t| t.is_from(source::TOOL_THROTTLED))
            .collect();
        assert_eq!(throttled.len(), 1);
        assert_eq!(throttled[0].priority, Priority::High);
        assert!(throttled[0].content.starts_with("[lookup] not run"));
    }

    #[tokio::test]
    async fn test_requested_instruction_reaches_next_context() {
        let mut h = harness(quiet_config());
        h.buffer
            .ingest(event_at(source::CHAT_MESSAGE, "recall:web_search", h.t0));
        h.scheduler.cycle_at(h.t0).await.unwrap();
        assert!(h.instructions.is_active(&"web_search".to_string(), h.at(1)));

        h.buffer
            .ingest(event_at(source::CHAT_MESSAGE, "anything else", h.at(1)));
        h.scheduler.cycle_at(h.at(1)).await.unwrap();
        let context = h.interpreter.last_context().unwrap();
        assert_eq!(context.active_instructions, vec!["web_search".to_string()]);
        assert_eq!(context.recent_thoughts.len(), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_stays_silent() {
        let mut h = harness(quiet_config());
        h.generator.set_failing(true);
        h.buffer
            .ingest(event_at(source::URGENT_REMINDER, "stove is on", h.t0));

        h.scheduler.cycle_at(h.t0).await.unwrap();
        let delivered = h.scheduler.finish_generation_at(h.at(1)).await.unwrap();
        assert!(delivered.is_none());
        assert!(h.sink.delivered().is_empty());
        assert_eq!(h.buffer.unspoken_count(), 1);
        assert_eq!(h.buffer.last_response_at(), None);
        assert_eq!(h.scheduler.stats().failed_generations, 1);

        // still critical, so the next cycle tries again
        h.generator.set_failing(false);
        let retry = h.scheduler.cycle_at(h.at(2)).await.unwrap();
        assert_eq!(retry.speaking, Some(SpeakReason::Critical));
    }

    #[tokio::test(start_paused = true)]
    async fn test_thinking_continues_while_generating() {
        let mut h = harness(quiet_config());
        h.generator.set_delay(Duration::from_secs(10));
        h.buffer
            .ingest(event_at(source::DIRECT_MENTION, "first", h.t0));
        let first = h.scheduler.cycle_at(h.t0).await.unwrap();
        assert_eq!(first.speaking, Some(SpeakReason::Critical));

        h.buffer
            .ingest(event_at(source::DIRECT_MENTION, "second", h.at(1)));
        let second = h.scheduler.cycle_at(h.at(1)).await.unwrap();
        assert_eq!(second.thoughts_added, 1);
        assert_eq!(second.speaking, None);
        assert!(h.scheduler.is_generating());
        tokio::task::yield_now().await;
        assert_eq!(h.generator.request_count(), 1);

        let response = h
            .scheduler
            .finish_generation_at(h.at(11))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.thought_ids, vec![0]);
        assert!(!h.buffer.get(1).unwrap().spoken);
        assert_eq!(h.buffer.unspoken_count(), 1);
    }

    #[tokio::test]
    async fn test_persists_thoughts_and_spoken_flags() {
        let mut h = harness(quiet_config());
        let store = Arc::new(SqliteStateStore::in_memory().unwrap());
        h.scheduler = h.scheduler.with_persistence(store.clone());

        h.buffer
            .ingest(event_at(source::DIRECT_MENTION, "remember me", h.t0));
        h.scheduler.cycle_at(h.t0).await.unwrap();
        h.scheduler.finish_generation_at(h.at(1)).await.unwrap();

        let saved = store.load_thoughts().unwrap();
        assert_eq!(saved.len(), 2);
        assert!(saved[0].spoken);
        assert!(saved[1].is_from(source::RESPONSE_ECHO));
        assert!(saved[1].spoken);
    }

    #[tokio::test]
    async fn test_events_broadcast_on_bus() {
        let mut h = harness(quiet_config());
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        h.scheduler = h.scheduler.with_events(bus);

        h.buffer.ingest(event_at(source::OBSERVATION, "a bird", h.t0));
        h.scheduler.cycle_at(h.t0).await.unwrap();

        match sub.try_recv() {
            Some(AgentEvent::Thought(t)) => assert_eq!(t.content, "thinking about a bird"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_loop_delivers_and_stops() {
        let h = harness(quiet_config());
        let sink = h.sink.clone();
        let buffer = h.buffer.clone();
        let token = CancellationToken::new();
        let handle = tokio::spawn(h.scheduler.run(token.clone()));

        buffer.ingest(RawEvent::new(source::URGENT_REMINDER, "meeting now"));
        for _ in 0..100 {
            if !sink.delivered().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        token.cancel();
        let stats = handle.await.unwrap();

        assert_eq!(sink.delivered().len(), 1);
        assert!(stats.responses >= 1);
        assert!(stats.reactive >= 1);
    }
}
