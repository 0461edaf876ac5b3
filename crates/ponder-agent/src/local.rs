//! Offline collaborators.
//!
//! Deterministic stand-ins for the model-backed services, so the agent runs
//! end to end on a machine with no network access.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use ponder_core::memory::normalize;
use ponder_core::{
    source, Collaborators, Embedder, GenerationRequest, Generator, InterpretContext,
    Interpretation, Interpreter, MemoryRecord, PonderError, PonderResult, RawEvent,
    ReflectionMode, SpeakReason, Summarizer, Thought, Tool, ToolCall, ToolRegistry,
};

/// Bag-of-words embedder using FNV-1a word hashes.
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> PonderResult<Vec<f32>> {
        let mut v = vec![0.0; self.dim];
        let lowered = text.to_lowercase();
        let words = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty());
        for word in words {
            v[(fnv1a(word) % self.dim as u64) as usize] += 1.0;
        }
        if v.iter().all(|x| *x == 0.0) {
            return Err(PonderError::embedding("text has no words to embed"));
        }
        Ok(normalize(v))
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        "fnv-bag-of-words"
    }
}

/// Restates each event as a thought.
///
/// A payload of the form `/<tool> [text]` becomes a tool call with
/// `{"text": ...}` arguments.
pub struct EchoInterpreter;

fn parse_command(payload: &str) -> Option<ToolCall> {
    let rest = payload.trim().strip_prefix('/')?;
    let (name, text) = match rest.split_once(char::is_whitespace) {
        Some((name, text)) => (name, text.trim()),
        None => (rest, ""),
    };
    if name.is_empty() {
        return None;
    }
    Some(ToolCall::new(name, serde_json::json!({ "text": text })))
}

fn restate(event: &RawEvent) -> Interpretation {
    if let Some(call) = parse_command(&event.payload_text) {
        return Interpretation::new(format!("I was asked to use {}", call.tool_name))
            .with_tool_call(call);
    }
    let text = event.payload_text.trim();
    match event.source_tag.as_str() {
        source::USER_INPUT => Interpretation::new(format!("The user said: {}", text)),
        tag if tag.starts_with("tool_") => Interpretation::new(text),
        tag => Interpretation::new(format!("[{}] {}", tag, text)),
    }
}

/// Latest thought that came from the outside world.
fn last_external(thoughts: &[Thought]) -> Option<&Thought> {
    thoughts.iter().rev().find(|t| {
        !t.is_from(source::PROACTIVE_REFLECTION)
            && !t.is_from(source::PROACTIVE_PLANNING)
            && !t.is_from(source::RESPONSE_ECHO)
    })
}

#[async_trait]
impl Interpreter for EchoInterpreter {
    async fn interpret(
        &self,
        events: &[RawEvent],
        _context: &InterpretContext,
    ) -> PonderResult<Vec<Interpretation>> {
        Ok(events.iter().map(restate).collect())
    }

    async fn reflect(
        &self,
        mode: ReflectionMode,
        context: &InterpretContext,
    ) -> PonderResult<Interpretation> {
        // Only muse once per new outside thought; otherwise stay quiet.
        let anchor = match (
            context.recent_thoughts.last(),
            last_external(&context.recent_thoughts),
        ) {
            (Some(last), Some(external)) if last.id == external.id => last,
            _ => return Ok(Interpretation::default()),
        };

        let content = match mode {
            ReflectionMode::Reflective => match context.memories.first() {
                Some(hit) => format!("That reminds me of: {}", hit.record.text),
                None => format!("Thinking back on: {}", anchor.content),
            },
            ReflectionMode::Planning => match context.tool_awareness.lines().next() {
                Some(line) if !line.trim().is_empty() => {
                    format!("Keeping an eye on: {}", line.trim())
                }
                _ => format!("Next I could follow up on: {}", anchor.content),
            },
        };
        Ok(Interpretation::new(content))
    }
}

/// Summarises the unspoken thoughts into a single reply.
#[derive(Default)]
pub struct RecapGenerator;

const RECAP_LIMIT: usize = 3;

#[async_trait]
impl Generator for RecapGenerator {
    async fn generate(&self, request: &GenerationRequest) -> PonderResult<String> {
        if request.unspoken.is_empty() {
            return Err(PonderError::generation("no unspoken thoughts"));
        }
        let skip = request.unspoken.len().saturating_sub(RECAP_LIMIT);
        let points: Vec<&str> = request.unspoken[skip..]
            .iter()
            .map(|t| t.content.as_str())
            .collect();

        let lead = match request.reason {
            SpeakReason::Critical => "Right away: ",
            SpeakReason::HighPriorityWaitElapsed => "",
            SpeakReason::AccumulatedObservations | SpeakReason::HighVolume => {
                "A few things on my mind: "
            }
        };
        let mut reply = format!("{}{}", lead, points.join("; "));
        if let Some(hit) = request.memories.first() {
            reply.push_str(&format!(" (I remember: {})", hit.record.text));
        }
        Ok(reply)
    }
}

/// Condenses a day into a count plus its first few lines.
pub struct DigestSummarizer;

const DIGEST_LINES: usize = 3;
const DIGEST_LINE_CHARS: usize = 80;

#[async_trait]
impl Summarizer for DigestSummarizer {
    async fn summarize(&self, day: NaiveDate, records: &[MemoryRecord]) -> PonderResult<String> {
        let lines: Vec<String> = records
            .iter()
            .take(DIGEST_LINES)
            .map(|r| r.text.chars().take(DIGEST_LINE_CHARS).collect())
            .collect();
        Ok(format!(
            "{}: {} exchanges. {}",
            day,
            records.len(),
            lines.join(" / ")
        ))
    }
}

/// Reports the current UTC time.
pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "clock"
    }

    fn description(&self) -> &str {
        "reports the current time"
    }

    async fn execute(&self, _args: &serde_json::Value) -> PonderResult<String> {
        Ok(format!("It is {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC")))
    }
}

/// Returns its `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "repeats the given text"
    }

    async fn execute(&self, args: &serde_json::Value) -> PonderResult<String> {
        match args.get("text").and_then(|t| t.as_str()) {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => Err(PonderError::tool("echo", "nothing to echo")),
        }
    }
}

pub fn registry() -> ToolRegistry {
    ToolRegistry::new()
        .with_tool(Arc::new(ClockTool))
        .with_tool(Arc::new(EchoTool))
}

/// Everything the runtime needs, wired from the offline implementations.
pub fn collaborators() -> Collaborators {
    Collaborators {
        interpreter: Arc::new(EchoInterpreter),
        generator: Arc::new(RecapGenerator),
        embedder: Arc::new(HashingEmbedder::default()),
        summarizer: Arc::new(DigestSummarizer),
        tools: Arc::new(registry()),
        sink: None,
    }
}
