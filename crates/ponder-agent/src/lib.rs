//! ponder-agent - Console front end for ponder.
//!
//! Wires the cognitive core to stdin/stdout with offline collaborators so
//! the agent can be run and poked at without any model backend.

pub mod console;
pub mod local;

pub use console::{forward_lines, render, spawn_printer, spawn_stdin_adapter, QUIT_COMMAND};
pub use local::{
    collaborators, registry, ClockTool, DigestSummarizer, EchoInterpreter, EchoTool,
    HashingEmbedder, RecapGenerator,
};
