//! Collaborator traits. Implementations live outside the core.

mod embedder;
mod generator;
mod ingest;
mod interpreter;
mod sink;
mod summarizer;
mod tool;

pub use embedder::Embedder;
pub use generator::{GenerationRequest, Generator};
pub use ingest::EventIngest;
pub use interpreter::{InterpretContext, Interpretation, Interpreter, ReflectionMode, ToolCall};
pub use sink::ResponseSink;
pub use summarizer::Summarizer;
pub use tool::{Tool, ToolBackend};
