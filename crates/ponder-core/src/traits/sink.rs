//! Response sink trait.

use async_trait::async_trait;

use crate::error::PonderResult;
use crate::types::Response;

/// Receives responses once generation succeeds (speech, chat, UI...).
#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn deliver(&self, response: &Response) -> PonderResult<()>;
}
