//! Discovered streams and connection-check results

use super::sync::SyncMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Streams a connector exposes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<Stream>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stream(mut self, stream: Stream) -> Self {
        self.streams.push(stream);
        self
    }

    pub fn find_stream(&self, name: &str) -> Option<&Stream> {
        self.streams.iter().find(|s| s.name == name)
    }
}

/// A writable (or readable) collection: a table, an API resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    /// Unique name within the catalog (e.g. "Sales/orders")
    pub name: String,

    /// Endpoint the writer addresses for this stream, if HTTP based
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// JSON Schema of the stream's records
    pub json_schema: serde_json::Value,

    #[serde(default)]
    pub supported_sync_modes: Vec<SyncMode>,

    /// Maximum records per write call, if the destination caps it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Stream {
    pub fn new(name: impl Into<String>, json_schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            url: None,
            json_schema,
            supported_sync_modes: vec![SyncMode::FullRefresh],
            batch_size: None,
            metadata: HashMap::new(),
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn sync_modes(mut self, modes: Vec<SyncMode>) -> Self {
        self.supported_sync_modes = modes;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Result of a `check_connection` call
///
/// Connection problems are reported here, never raised.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub success: bool,
    pub message: Option<String>,
    pub checks: Vec<CheckDetail>,
}

/// One named probe within a connection check
#[derive(Debug, Clone, PartialEq)]
pub struct CheckDetail {
    pub name: String,
    pub passed: bool,
    pub message: Option<String>,
}

impl CheckDetail {
    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: None,
        }
    }

    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: Some(message.into()),
        }
    }
}

impl CheckResult {
    pub fn success() -> Self {
        Self {
            success: true,
            message: None,
            checks: Vec::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            checks: Vec::new(),
        }
    }

    /// Build a result from individual probes; fails if any probe failed
    pub fn from_checks(checks: Vec<CheckDetail>) -> Self {
        let failed: Vec<&str> = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect();
        let message = if failed.is_empty() {
            None
        } else {
            Some(format!("failed checks: {}", failed.join(", ")))
        };
        Self {
            success: failed.is_empty(),
            message,
            checks,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_find_stream() {
        let catalog = Catalog::new()
            .add_stream(Stream::new("Sales/orders", json!({"type": "object"})).url("https://x/a"))
            .add_stream(Stream::new("Sales/customers", json!({})));
        assert_eq!(
            catalog.find_stream("Sales/orders").and_then(|s| s.url.as_deref()),
            Some("https://x/a")
        );
        assert!(catalog.find_stream("missing").is_none());
    }

    #[test]
    fn test_check_result_from_checks() {
        let ok = CheckResult::from_checks(vec![CheckDetail::passed("auth")]);
        assert!(ok.is_success());

        let bad = CheckResult::from_checks(vec![
            CheckDetail::passed("auth"),
            CheckDetail::failed("base", "base app1 not visible"),
        ]);
        assert!(!bad.is_success());
        assert_eq!(bad.message.as_deref(), Some("failed checks: base"));
    }
}
