//! OpenAI embeddings via the `/embeddings` REST endpoint
//!
//! Works against OpenAI, Azure OpenAI and compatible servers (Ollama, vLLM)
//! by pointing `base_url` at them.

use crate::error::{EmbedError, EmbedResult};
use crate::provider::EmbeddingProvider;
use crate::types::{Embedding, EmbeddingRequest, EmbeddingResponse, EmbeddingUsage};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Cap on error bodies read into memory
const MAX_ERROR_BODY_BYTES: usize = 4096;

#[derive(Debug, Clone)]
struct OpenAiConfig {
    api_key: SecretString,
    base_url: String,
    model: String,
    timeout: Duration,
    organization: Option<String>,
}

/// Builder for [`OpenAiProvider`]
#[derive(Debug, Default)]
pub struct OpenAiProviderBuilder {
    api_key: Option<SecretString>,
    base_url: Option<String>,
    model: Option<String>,
    timeout: Option<Duration>,
    organization: Option<String>,
}

impl OpenAiProviderBuilder {
    /// API key (required)
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn api_key_secret(mut self, key: SecretString) -> Self {
        self.api_key = Some(key);
        self
    }

    /// Override the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Default embedding model
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Request timeout (default: 30s)
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    pub fn build(self) -> EmbedResult<OpenAiProvider> {
        let api_key = self
            .api_key
            .ok_or_else(|| EmbedError::Config("api_key is required".to_string()))?;
        if api_key.expose_secret().is_empty() {
            return Err(EmbedError::Config("api_key must not be empty".to_string()));
        }

        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !base_url.starts_with("https://") && !base_url.starts_with("http://") {
            return Err(EmbedError::Config(format!(
                "base_url must start with http:// or https://, got: {base_url}"
            )));
        }
        if base_url.starts_with("http://")
            && !base_url.contains("localhost")
            && !base_url.contains("127.0.0.1")
        {
            warn!("embedding base_url uses plain HTTP, API key will be sent in cleartext");
        }

        let timeout = self.timeout.unwrap_or(Duration::from_secs(30));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbedError::Config(format!("failed to build HTTP client: {e}")))?;

        let config = OpenAiConfig {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: self
                .model
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            timeout,
            organization: self.organization,
        };
        debug!(
            base_url = %config.base_url,
            model = %config.model,
            "openai embedding provider ready"
        );

        Ok(OpenAiProvider { config, client })
    }
}

/// OpenAI-compatible embedding provider
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("timeout", &self.config.timeout)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl OpenAiProvider {
    pub fn builder() -> OpenAiProviderBuilder {
        OpenAiProviderBuilder::default()
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.bearer_auth(self.config.api_key.expose_secret());
        match self.config.organization {
            Some(ref org) => builder.header("OpenAI-Organization", org),
            None => builder,
        }
    }

    async fn error_from_response(response: reqwest::Response) -> EmbedError {
        let status = response.status().as_u16();
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let body = match response.bytes().await {
            Ok(b) => String::from_utf8_lossy(&b[..b.len().min(MAX_ERROR_BODY_BYTES)]).to_string(),
            Err(_) => String::new(),
        };
        let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
            Ok(parsed) => parsed.error.message.chars().take(MAX_ERROR_BODY_BYTES).collect(),
            Err(_) => body,
        };

        match status {
            401 | 403 => EmbedError::Auth(message),
            404 => EmbedError::ModelNotFound(message),
            429 => EmbedError::RateLimited {
                message,
                retry_after_secs,
            },
            400 if message.to_lowercase().contains("maximum context") => {
                EmbedError::InputTooLong(message)
            }
            _ => EmbedError::Provider { status, message },
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    async fn embed(&self, request: &EmbeddingRequest) -> EmbedResult<EmbeddingResponse> {
        if request.input.is_empty() {
            return Err(EmbedError::Config(
                "embedding input must not be empty".to_string(),
            ));
        }

        let model = request.model.as_deref().unwrap_or(&self.config.model);
        let body = ApiEmbeddingRequest {
            model,
            input: &request.input,
            dimensions: request.dimensions,
            encoding_format: "float",
        };

        let url = format!("{}/embeddings", self.config.base_url);
        debug!(url = %url, model = %model, inputs = request.input.len(), "embedding request");

        let resp = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }

        let parsed: ApiEmbeddingResponse = resp.json().await.map_err(|e| {
            EmbedError::Serialization(format!("failed to parse embedding response: {e}"))
        })?;
        if parsed.data.is_empty() {
            return Err(EmbedError::EmptyResponse(format!(
                "model {} returned no embeddings",
                parsed.model
            )));
        }

        let mut embeddings: Vec<Embedding> = parsed
            .data
            .into_iter()
            .map(|d| Embedding {
                index: d.index,
                values: d.embedding,
            })
            .collect();
        embeddings.sort_by_key(|e| e.index);

        Ok(EmbeddingResponse {
            model: parsed.model,
            embeddings,
            usage: EmbeddingUsage {
                prompt_tokens: parsed.usage.prompt_tokens,
                total_tokens: parsed.usage.total_tokens,
            },
        })
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct ApiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
    encoding_format: &'a str,
}

#[derive(Deserialize)]
struct ApiEmbeddingResponse {
    model: String,
    data: Vec<ApiEmbeddingData>,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Deserialize)]
struct ApiEmbeddingData {
    index: u32,
    embedding: Vec<f32>,
}

#[derive(Deserialize, Default)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}
