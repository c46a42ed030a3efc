//! Error types for sluice-sync
//!
//! Errors are contained at the smallest scope that still preserves partial
//! progress. `TransformError` stays with the record that produced it,
//! `BatchIo` stays with its chunk or sub-batch, and only setup and
//! batch-read failures abort an extraction.

use std::fmt;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Result type alias for record transformation
pub type TransformResult<T> = std::result::Result<T, TransformError>;

/// Main error type for the sync engine
#[derive(Error, Debug)]
pub enum SyncError {
    /// Source or destination unreachable, or credentials rejected
    #[error("connection error: {0}")]
    Connection(String),

    /// A record could not be transformed
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// One batch read, lookup or write call failed
    #[error("batch {operation} failed: {message}")]
    BatchIo { operation: String, message: String },

    /// Illegal sync or run status change
    #[error("cannot {event} {entity} in status '{from}'")]
    StateTransition {
        entity: Entity,
        from: String,
        event: &'static str,
    },

    /// Scheduling, termination or heartbeat call failed
    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// A sync definition violates an invariant
    #[error("validation error: {0}")]
    Validation(String),

    /// Persistence collaborator failure
    #[error("store error: {0}")]
    Store(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: String },

    /// Operation conflicts with in-flight work (e.g. a run is already active)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Destination or source HTTP API answered with an error
    #[error("http error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Http { status: Option<u16>, message: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Entities addressed by state-machine and lookup errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Sync,
    SyncRun,
    SyncRecord,
    Stream,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Sync => write!(f, "sync"),
            Entity::SyncRun => write!(f, "sync run"),
            Entity::SyncRecord => write!(f, "sync record"),
            Entity::Stream => write!(f, "stream"),
        }
    }
}

impl SyncError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn batch_io(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::BatchIo {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    pub fn transition(entity: Entity, from: impl fmt::Display, event: &'static str) -> Self {
        Self::StateTransition {
            entity,
            from: from.to_string(),
            event,
        }
    }

    pub fn orchestrator(msg: impl Into<String>) -> Self {
        Self::Orchestrator(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn not_found(entity: Entity, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn http(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: msg.into(),
        }
    }

    /// Whether repeating the failed call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::BatchIo { .. } | Self::Orchestrator(_) => true,
            Self::Http {
                status: Some(code), ..
            } => *code == 429 || *code >= 500,
            Self::Http { status: None, .. } => true,
            _ => false,
        }
    }

    /// Short classification used in logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Transform(_) => "transform",
            Self::BatchIo { .. } => "batch_io",
            Self::StateTransition { .. } => "state_transition",
            Self::Orchestrator(_) => "orchestrator",
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::Store(_) => "store",
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Http { .. } => "http",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
        }
    }

    /// Human-readable text stored on runs and records
    ///
    /// Never carries raw upstream payloads.
    pub fn user_message(&self) -> String {
        match self {
            Self::Connection(_) => "Could not connect to the source or destination".to_string(),
            Self::Transform(e) => e.user_message(),
            Self::BatchIo { operation, .. } => format!("A {operation} batch failed"),
            Self::StateTransition { entity, from, event } => {
                format!("The {entity} cannot {event} while {from}")
            }
            Self::Orchestrator(_) => "The scheduler could not be reached".to_string(),
            Self::Config(_) | Self::Validation(_) => format!("Invalid configuration: {self}"),
            Self::Store(_) | Self::Io(_) => "Internal storage error".to_string(),
            Self::NotFound { entity, .. } => format!("The {entity} no longer exists"),
            Self::Conflict(msg) => msg.clone(),
            Self::Http {
                status: Some(401 | 403),
                ..
            } => "The destination rejected the credentials".to_string(),
            Self::Http {
                status: Some(429), ..
            } => "The destination rate limit was exceeded".to_string(),
            Self::Http { .. } => "The destination API returned an error".to_string(),
            Self::Serialization(_) => "A payload could not be encoded".to_string(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for SyncError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Connection(err.to_string())
        } else {
            Self::Http {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

/// Per-record transformation failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    /// Template could not be parsed
    #[error("template syntax error: {0}")]
    Syntax(String),

    /// Template rendering failed
    #[error("template render error: {0}")]
    Render(String),

    /// A filter rejected its input
    #[error("filter '{filter}' failed: {message}")]
    Filter { filter: String, message: String },

    /// Destination path cannot be written
    #[error("invalid destination path: {0}")]
    Path(String),

    /// Embedding service failure for a vector mapping
    #[error("embedding error: {0}")]
    Embedding(String),
}

impl TransformError {
    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::Syntax(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn filter(filter: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Filter {
            filter: filter.into(),
            message: msg.into(),
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Syntax(_) | Self::Render(_) => format!("Mapping template failed: {self}"),
            Self::Filter { filter, message } => format!("Filter {filter} failed: {message}"),
            Self::Path(msg) => format!("Invalid destination path: {msg}"),
            Self::Embedding(_) => "Embedding generation failed".to_string(),
        }
    }
}

impl From<sluice_embed::EmbedError> for TransformError {
    fn from(err: sluice_embed::EmbedError) -> Self {
        Self::Embedding(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_display() {
        let err = SyncError::transition(Entity::Sync, "disabled", "disable");
        assert_eq!(err.to_string(), "cannot disable sync in status 'disabled'");
        assert_eq!(err.kind(), "state_transition");
    }

    #[test]
    fn test_http_display() {
        assert_eq!(
            SyncError::http(Some(422), "bad field").to_string(),
            "http error (422): bad field"
        );
        assert_eq!(
            SyncError::http(None, "reset").to_string(),
            "http error: reset"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(SyncError::connection("refused").is_retryable());
        assert!(SyncError::http(Some(429), "slow").is_retryable());
        assert!(SyncError::http(Some(503), "down").is_retryable());
        assert!(!SyncError::http(Some(422), "bad").is_retryable());
        assert!(!SyncError::validation("x").is_retryable());
        assert!(!SyncError::Transform(TransformError::render("x")).is_retryable());
    }

    #[test]
    fn test_user_message_hides_payload() {
        let err = SyncError::http(Some(401), "token sk-abc is invalid");
        let msg = err.user_message();
        assert!(!msg.contains("sk-abc"));
        assert_eq!(msg, "The destination rejected the credentials");
    }

    #[test]
    fn test_transform_error_conversion() {
        let err: SyncError = TransformError::filter("match_regex", "no match").into();
        assert_eq!(err.kind(), "transform");
        assert_eq!(err.to_string(), "filter 'match_regex' failed: no match");
    }

    #[test]
    fn test_not_found_display() {
        let err = SyncError::not_found(Entity::SyncRun, 42);
        assert_eq!(err.to_string(), "sync run 42 not found");
    }
}
