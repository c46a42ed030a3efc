//! Embedding provider trait

use crate::error::EmbedResult;
use crate::types::{EmbeddingRequest, EmbeddingResponse};
use async_trait::async_trait;

/// Provider-agnostic embedding interface
///
/// Implementations own authentication, HTTP transport and the mapping of
/// provider error payloads onto [`EmbedError`](crate::EmbedError).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name (e.g. "openai")
    fn name(&self) -> &str;

    /// Model used when the request does not override it
    fn default_model(&self) -> &str;

    /// Embed every input text of the request
    async fn embed(&self, request: &EmbeddingRequest) -> EmbedResult<EmbeddingResponse>;
}
