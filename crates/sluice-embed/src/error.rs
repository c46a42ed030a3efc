//! Error types for sluice-embed

/// Result type alias for embedding operations
pub type EmbedResult<T> = std::result::Result<T, EmbedError>;

/// Errors raised while generating embeddings
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Provider configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid or expired credentials
    #[error("authentication error: {0}")]
    Auth(String),

    /// Rate limited by the provider
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Retry-after hint in seconds
        retry_after_secs: Option<u64>,
    },

    #[error("timeout: {0}")]
    Timeout(String),

    /// Embedding model unknown to the provider
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Input exceeds the model's token window
    #[error("input too long: {0}")]
    InputTooLong(String),

    /// Non-success response not covered above
    #[error("provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Provider answered but returned no vector
    #[error("empty response: {0}")]
    EmptyResponse(String),
}

impl EmbedError {
    /// Whether the call may succeed if repeated
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbedError::RateLimited { .. } | EmbedError::Timeout(_) | EmbedError::Connection(_)
        ) || matches!(self, EmbedError::Provider { status, .. } if *status >= 500)
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, EmbedError::Auth(_))
    }

    /// Retry-after hint if the provider sent one
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            EmbedError::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

#[cfg(feature = "openai")]
impl From<reqwest::Error> for EmbedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EmbedError::Timeout("request timed out".to_string())
        } else if err.is_connect() {
            EmbedError::Connection(err.to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                401 | 403 => EmbedError::Auth(err.to_string()),
                429 => EmbedError::RateLimited {
                    message: err.to_string(),
                    retry_after_secs: None,
                },
                code => EmbedError::Provider {
                    status: code,
                    message: err.to_string(),
                },
            }
        } else {
            EmbedError::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for EmbedError {
    fn from(err: serde_json::Error) -> Self {
        EmbedError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(EmbedError::RateLimited {
            message: "slow down".into(),
            retry_after_secs: None,
        }
        .is_retryable());
        assert!(EmbedError::Timeout("t".into()).is_retryable());
        assert!(EmbedError::Connection("c".into()).is_retryable());
        assert!(EmbedError::Provider {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!EmbedError::Provider {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!EmbedError::Auth("a".into()).is_retryable());
        assert!(!EmbedError::Config("c".into()).is_retryable());
    }

    #[test]
    fn test_retry_after() {
        let err = EmbedError::RateLimited {
            message: "x".into(),
            retry_after_secs: Some(7),
        };
        assert_eq!(err.retry_after_secs(), Some(7));
        assert_eq!(EmbedError::Timeout("x".into()).retry_after_secs(), None);
    }

    #[test]
    fn test_display() {
        let err = EmbedError::Provider {
            status: 502,
            message: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "provider error (502): bad gateway");
        assert!(EmbedError::Auth("nope".into()).is_auth());
    }
}
