//! Deterministic collaborators for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{PonderError, PonderResult};
use crate::traits::{
    Embedder, GenerationRequest, Generator, InterpretContext, Interpretation, Interpreter,
    ReflectionMode, ResponseSink, Summarizer, ToolCall,
};
use crate::types::{MemoryRecord, Priority, RawEvent, Response};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Bag-of-words embedder: each lowercase word bumps one of `dim` buckets.
pub struct WordEmbedder {
    dim: usize,
    fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl WordEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.dim];
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if word.is_empty() {
                continue;
            }
            let bucket = word
                .bytes()
                .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize))
                % self.dim;
            v[bucket] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for WordEmbedder {
    async fn embed(&self, text: &str) -> PonderResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PonderError::embedding("embedder offline"));
        }
        Ok(self.vector(text))
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        "word-buckets"
    }
}

/// Summarizer that joins texts, optionally slow or failing.
#[derive(Default)]
pub struct JoinSummarizer {
    fail: AtomicBool,
    delay: Mutex<Duration>,
    pub days: Mutex<Vec<NaiveDate>>,
}

impl JoinSummarizer {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }
}

#[async_trait]
impl Summarizer for JoinSummarizer {
    async fn summarize(&self, day: NaiveDate, records: &[MemoryRecord]) -> PonderResult<String> {
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(PonderError::summarization("summarizer offline"));
        }
        lock(&self.days).push(day);
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        Ok(format!("On {}: {}", day, texts.join("; ")))
    }
}

/// Interpreter that restates payloads.
///
/// A payload of the form `call:<tool>` also requests that tool, and
/// `recall:<key>` requests instruction `<key>`.
#[derive(Default)]
pub struct ScriptedInterpreter {
    failures_left: AtomicUsize,
    hang: AtomicBool,
    reflect_priority: Mutex<Option<Priority>>,
    pub interpret_calls: AtomicUsize,
    pub reflections: Mutex<Vec<ReflectionMode>>,
    pub contexts: Mutex<Vec<InterpretContext>>,
}

impl ScriptedInterpreter {
    pub fn fail_times(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn set_hanging(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    pub fn set_reflect_priority(&self, priority: Option<Priority>) {
        *lock(&self.reflect_priority) = priority;
    }

    pub fn last_context(&self) -> Option<InterpretContext> {
        lock(&self.contexts).last().cloned()
    }
}

#[async_trait]
impl Interpreter for ScriptedInterpreter {
    async fn interpret(
        &self,
        events: &[RawEvent],
        context: &InterpretContext,
    ) -> PonderResult<Vec<Interpretation>> {
        self.interpret_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.contexts).push(context.clone());
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(PonderError::interpretation("model unavailable"));
        }
        Ok(events
            .iter()
            .map(|e| {
                let text = e.payload_text.as_str();
                let base = Interpretation::new(format!("thinking about {}", text));
                if let Some(tool) = text.strip_prefix("call:") {
                    base.with_tool_call(ToolCall::new(tool, serde_json::json!({})))
                } else if let Some(key) = text.strip_prefix("recall:") {
                    base.with_instruction(key)
                } else {
                    base
                }
            })
            .collect())
    }

    async fn reflect(
        &self,
        mode: ReflectionMode,
        context: &InterpretContext,
    ) -> PonderResult<Interpretation> {
        lock(&self.reflections).push(mode);
        lock(&self.contexts).push(context.clone());
        let mut interpretation = Interpretation::new(format!("{} musing", mode));
        interpretation.priority = *lock(&self.reflect_priority);
        Ok(interpretation)
    }
}

/// Generator with a fixed reply, optional delay and failure switch.
pub struct ScriptedGenerator {
    reply: String,
    delay: Mutex<Duration>,
    fail: AtomicBool,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            delay: Mutex::new(Duration::ZERO),
            fail: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> PonderResult<String> {
        lock(&self.requests).push(request.clone());
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(PonderError::generation("generator offline"));
        }
        Ok(self.reply.clone())
    }
}

/// Sink that keeps every delivered response.
#[derive(Default)]
pub struct CollectingSink {
    pub responses: Mutex<Vec<Response>>,
}

impl CollectingSink {
    pub fn delivered(&self) -> Vec<Response> {
        lock(&self.responses).clone()
    }
}

#[async_trait]
impl ResponseSink for CollectingSink {
    async fn deliver(&self, response: &Response) -> PonderResult<()> {
        lock(&self.responses).push(response.clone());
        Ok(())
    }
}
