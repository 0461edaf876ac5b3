//! Event bus using tokio broadcast channel
//!
//! Non-blocking emission with multiple subscribers. Slow subscribers miss
//! events rather than blocking the cognitive loop.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::PonderResult;
use crate::events::AgentEvent;
use crate::traits::ResponseSink;
use crate::types::Response;

/// Default channel capacity
const DEFAULT_CAPACITY: usize = 1024;

/// Broadcast bus for [`AgentEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus with custom capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    /// Emit an event to all subscribers. Dropped if nobody listens.
    pub fn emit(&self, event: AgentEvent) {
        let _ = self.sender.send(event);
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResponseSink for EventBus {
    async fn deliver(&self, response: &Response) -> PonderResult<()> {
        self.emit(AgentEvent::Response(response.clone()));
        Ok(())
    }
}

/// Subscriber to event bus
pub struct EventSubscriber {
    receiver: broadcast::Receiver<AgentEvent>,
}

impl EventSubscriber {
    /// Receive the next event. Returns None once the bus is dropped.
    pub async fn recv(&mut self) -> Option<AgentEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event subscriber lagged by {} events", n);
                    continue;
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Option<AgentEvent> {
        self.receiver.try_recv().ok()
    }
}
