//! Request and response types

/// Request for text embeddings
#[derive(Debug, Clone, Default)]
pub struct EmbeddingRequest {
    /// Input texts to embed
    pub input: Vec<String>,
    /// Model override (provider default if None)
    pub model: Option<String>,
    /// Output dimensions, for models that support truncation
    pub dimensions: Option<u32>,
}

impl EmbeddingRequest {
    /// Single-text request
    pub fn single(text: impl Into<String>) -> Self {
        Self {
            input: vec![text.into()],
            ..Default::default()
        }
    }

    /// Multi-text request
    pub fn batch(texts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            input: texts.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_dimensions(mut self, dimensions: u32) -> Self {
        self.dimensions = Some(dimensions);
        self
    }
}

/// A single embedding vector
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    /// Position of the input this vector belongs to
    pub index: u32,
    pub values: Vec<f32>,
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbeddingUsage {
    pub prompt_tokens: u32,
    pub total_tokens: u32,
}

/// Response from an embedding request
#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    /// Model that produced the vectors
    pub model: String,
    /// One vector per input, ordered by `index`
    pub embeddings: Vec<Embedding>,
    pub usage: EmbeddingUsage,
}

impl EmbeddingResponse {
    /// First vector, the common case for single-text requests
    pub fn first_embedding(&self) -> Option<&[f32]> {
        self.embeddings.first().map(|e| e.values.as_slice())
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_request() {
        let req = EmbeddingRequest::single("hello").with_model("m1");
        assert_eq!(req.input, vec!["hello".to_string()]);
        assert_eq!(req.model.as_deref(), Some("m1"));
        assert!(req.dimensions.is_none());
    }

    #[test]
    fn test_batch_request() {
        let req = EmbeddingRequest::batch(["a", "b"]).with_dimensions(256);
        assert_eq!(req.input.len(), 2);
        assert_eq!(req.dimensions, Some(256));
    }

    #[test]
    fn test_first_embedding() {
        let resp = EmbeddingResponse {
            model: "m".into(),
            embeddings: vec![Embedding {
                index: 0,
                values: vec![0.5, -0.25],
            }],
            usage: EmbeddingUsage::default(),
        };
        assert_eq!(resp.first_embedding(), Some(&[0.5, -0.25][..]));
        assert_eq!(resp.len(), 1);
        assert!(!resp.is_empty());
    }
}
