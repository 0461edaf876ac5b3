//! ponder-core - Core library for ponder.
//!
//! A continuously running cognitive agent: raw events become prioritised
//! thoughts, a rule decides when thoughts are worth saying out loud, tool
//! actions run in the background, and conversation history flows through
//! a four-tier semantic memory.
//!
//! # Example
//!
//! ```ignore
//! use ponder_core::{AgentConfig, AgentRuntime, Collaborators, RawEvent};
//!
//! let mut runtime = AgentRuntime::new(AgentConfig::from_env(), collaborators).await?;
//! let mut events = runtime.subscribe();
//! runtime.start().await?;
//!
//! runtime.ingest(RawEvent::user_input("what did we talk about yesterday?"));
//! while let Some(event) = events.recv().await {
//!     // AgentEvent::Response(..) carries what the agent said
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod events;
pub mod memory;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod tools;
pub mod traits;
pub mod ttl;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use buffer::ThoughtBuffer;
pub use config::AgentConfig;
pub use error::{ErrorCode, PonderError, PonderResult};
pub use events::{AgentEvent, EventBus, EventSubscriber};
pub use memory::TieredMemoryStore;
pub use runtime::{AgentRuntime, Collaborators, RuntimeConfig};
pub use scheduler::{
    CognitiveScheduler, CycleKind, CycleOutcome, CycleStats, ResponseDecider, SchedulerParts,
};
pub use store::SqliteStateStore;
pub use tools::{ToolActionTracker, ToolRegistry};
pub use traits::{
    Embedder, EventIngest, GenerationRequest, Generator, InterpretContext, Interpretation,
    Interpreter, ReflectionMode, ResponseSink, Summarizer, Tool, ToolBackend, ToolCall,
};
pub use ttl::InstructionTTLCache;
pub use types::{
    source, Action, ActionStatus, MemoryRecord, Priority, PriorityMap, RawEvent, Response,
    SearchHit, SearchScope, SpeakReason, Thought, Tier,
};
