//! Agent event broadcasting.

mod bus;
mod event;

pub use bus::{EventBus, EventSubscriber};
pub use event::AgentEvent;
