//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use ponder_core::{
    Collaborators, Embedder, GenerationRequest, Generator, InterpretContext, Interpretation,
    Interpreter, MemoryRecord, PonderError, PonderResult, RawEvent, ReflectionMode, Summarizer,
    Tool, ToolCall, ToolRegistry,
};

/// Character-trigram embedder; similar strings get similar vectors.
pub struct TrigramEmbedder {
    pub dim: usize,
}

impl TrigramEmbedder {
    pub fn new() -> Self {
        Self { dim: 256 }
    }
}

#[async_trait]
impl Embedder for TrigramEmbedder {
    async fn embed(&self, text: &str) -> PonderResult<Vec<f32>> {
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        let mut v = vec![0.0; self.dim];
        for window in chars.windows(3) {
            let h = window
                .iter()
                .fold(17usize, |h, c| h.wrapping_mul(31).wrapping_add(*c as usize));
            v[h % self.dim] += 1.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        Ok(v)
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        "trigram"
    }
}

pub struct ConcatSummarizer;

#[async_trait]
impl Summarizer for ConcatSummarizer {
    async fn summarize(&self, day: NaiveDate, records: &[MemoryRecord]) -> PonderResult<String> {
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        Ok(format!("{}: {}", day, texts.join(" | ")))
    }
}

/// Restates every payload. `run <tool> <json>` requests a tool call.
#[derive(Default)]
pub struct ParrotInterpreter {
    pub batches: AtomicUsize,
}

#[async_trait]
impl Interpreter for ParrotInterpreter {
    async fn interpret(
        &self,
        events: &[RawEvent],
        _context: &InterpretContext,
    ) -> PonderResult<Vec<Interpretation>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(events
            .iter()
            .map(|e| {
                let mut parts = e.payload_text.splitn(3, ' ');
                match (parts.next(), parts.next(), parts.next()) {
                    (Some("run"), Some(tool), args) => {
                        let args = args
                            .and_then(|a| serde_json::from_str(a).ok())
                            .unwrap_or(serde_json::Value::Null);
                        Interpretation::new(format!("I should run {}", tool))
                            .with_tool_call(ToolCall::new(tool, args))
                    }
                    _ => Interpretation::new(format!("noted: {}", e.payload_text)),
                }
            })
            .collect())
    }

    async fn reflect(
        &self,
        mode: ReflectionMode,
        _context: &InterpretContext,
    ) -> PonderResult<Interpretation> {
        Ok(Interpretation::new(format!("idle {}", mode)))
    }
}

/// Replies with the newest unspoken thought.
#[derive(Default)]
pub struct RecapGenerator {
    pub requests: Mutex<Vec<GenerationRequest>>,
}

#[async_trait]
impl Generator for RecapGenerator {
    async fn generate(&self, request: &GenerationRequest) -> PonderResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        let last = request
            .unspoken
            .last()
            .ok_or_else(|| PonderError::generation("nothing to say"))?;
        Ok(format!("Re: {}", last.content))
    }
}

/// Sleeps for `secs` from its args before answering.
pub struct SleepyTool;

#[async_trait]
impl Tool for SleepyTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "searches the web, slowly"
    }

    async fn execute(&self, args: &serde_json::Value) -> PonderResult<String> {
        let secs = args.get("secs").and_then(|s| s.as_u64()).unwrap_or(0);
        tokio::time::sleep(Duration::from_secs(secs)).await;
        Ok("three results".to_string())
    }
}

pub fn registry() -> ToolRegistry {
    ToolRegistry::new().with_tool(Arc::new(SleepyTool))
}

pub fn collaborators() -> Collaborators {
    Collaborators {
        interpreter: Arc::new(ParrotInterpreter::default()),
        generator: Arc::new(RecapGenerator::default()),
        embedder: Arc::new(TrigramEmbedder::new()),
        summarizer: Arc::new(ConcatSummarizer),
        tools: Arc::new(registry()),
        sink: None,
    }
}
