//! Core data types.

mod action;
mod event;
mod memory_record;
mod priority;
mod response;
mod thought;

pub use action::{Action, ActionId, ActionOutcome, ActionStatus, FailureKind};
pub use event::{source, RawEvent};
pub use memory_record::{MemoryRecord, SearchHit, SearchScope, Tier};
pub use priority::{Priority, PriorityMap};
pub use response::{Response, SpeakReason};
pub use thought::{Thought, ThoughtId};
