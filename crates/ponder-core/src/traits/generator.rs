//! Generator trait.

use async_trait::async_trait;

use crate::error::PonderResult;
use crate::types::{SearchHit, SpeakReason, Thought};

/// Everything the generator gets for one response.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub reason: SpeakReason,
    /// Unspoken thoughts, oldest first.
    pub unspoken: Vec<Thought>,
    /// Recent thought history including spoken ones.
    pub recent: Vec<Thought>,
    pub memories: Vec<SearchHit>,
}

/// Produces the outward response text.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> PonderResult<String>;
}
