//! Destination for raw events.

use crate::types::RawEvent;

/// Anything that accepts raw events without blocking.
pub trait EventIngest: Send + Sync {
    fn ingest(&self, event: RawEvent);
}
