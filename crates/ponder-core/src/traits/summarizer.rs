//! Summarizer trait used by day rollover.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::PonderResult;
use crate::types::MemoryRecord;

/// Condenses one day's entries into a single summary text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, day: NaiveDate, records: &[MemoryRecord]) -> PonderResult<String>;
}
