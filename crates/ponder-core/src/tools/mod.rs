//! Tool registry and asynchronous action tracking.

mod registry;
mod tracker;

pub use registry::ToolRegistry;
pub use tracker::{FailureSummary, ToolActionTracker, ToolHealth, ToolHealthReport};
