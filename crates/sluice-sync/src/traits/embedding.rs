//! Embedding generation for `vector` mappings

use crate::error::TransformResult;
use crate::mapping::EmbeddingConfig;
use async_trait::async_trait;

/// Turns text into an embedding vector
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    async fn generate_embedding(
        &self,
        text: &str,
        config: &EmbeddingConfig,
    ) -> TransformResult<Vec<f32>>;
}
