//! Embedding generation for `vector` mappings
//!
//! One provider client is built per distinct endpoint/model/key and reused.
//! Vectors are memoized per (model, dimensions, text) so repeated values in a
//! batch hit the API once.

use crate::error::{TransformError, TransformResult};
use crate::mapping::{EmbeddingConfig, EmbeddingMode};
use crate::retry::RetryConfig;
use crate::traits::EmbeddingGenerator;
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use sluice_embed::openai::OpenAiProvider;
use sluice_embed::{EmbeddingProvider, EmbeddingRequest};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const VECTOR_CACHE_LIMIT: usize = 4096;

pub struct ProviderEmbeddingGenerator {
    providers: Mutex<HashMap<String, Arc<dyn EmbeddingProvider>>>,
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    retry: RetryConfig,
}

impl Default for ProviderEmbeddingGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderEmbeddingGenerator {
    pub fn new() -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            vectors: Mutex::new(HashMap::new()),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn provider(&self, config: &EmbeddingConfig) -> TransformResult<Arc<dyn EmbeddingProvider>> {
        let key = digest(&[
            config.base_url.as_deref().unwrap_or_default(),
            &config.model,
            config.api_key.expose_secret(),
        ]);
        if let Some(provider) = self.providers.lock().get(&key) {
            return Ok(provider.clone());
        }

        let provider: Arc<dyn EmbeddingProvider> = match config.mode {
            EmbeddingMode::OpenAi => {
                let mut builder = OpenAiProvider::builder()
                    .api_key(config.api_key.expose_secret())
                    .model(&config.model);
                if let Some(url) = &config.base_url {
                    builder = builder.base_url(url);
                }
                Arc::new(builder.build()?)
            }
        };
        debug!(model = %config.model, "Created embedding provider");
        self.providers.lock().insert(key, provider.clone());
        Ok(provider)
    }
}

#[async_trait]
impl EmbeddingGenerator for ProviderEmbeddingGenerator {
    async fn generate_embedding(
        &self,
        text: &str,
        config: &EmbeddingConfig,
    ) -> TransformResult<Vec<f32>> {
        let dimensions = config.dimensions.map(|d| d.to_string()).unwrap_or_default();
        let cache_key = digest(&[&config.model, &dimensions, text]);
        if let Some(vector) = self.vectors.lock().get(&cache_key) {
            return Ok(vector.clone());
        }

        let provider = self.provider(config)?;
        let mut request = EmbeddingRequest::single(text).with_model(&config.model);
        if let Some(d) = config.dimensions {
            request = request.with_dimensions(d);
        }

        let mut attempt = 0;
        let response = loop {
            match provider.embed(&request).await {
                Ok(response) => break response,
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(model = %config.model, attempt, error = %err, "Retrying embedding");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        };

        let vector = response
            .first_embedding()
            .map(<[f32]>::to_vec)
            .ok_or_else(|| TransformError::Embedding("provider returned no vector".into()))?;

        let mut vectors = self.vectors.lock();
        if vectors.len() >= VECTOR_CACHE_LIMIT {
            vectors.clear();
        }
        vectors.insert(cache_key, vector.clone());
        Ok(vector)
    }
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
