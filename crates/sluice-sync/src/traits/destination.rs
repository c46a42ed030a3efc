//! Destination connector interface

use crate::error::Result;
use crate::model::{Catalog, CheckResult, RecordAction, RequestLog, Stream};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// What a destination needs from a sync definition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestinationCapabilities {
    /// Both halves of the primary-key mapping must be set
    pub requires_upsert_identity: bool,
}

/// One transformed record handed to the destination
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    /// Source primary key of the record
    pub key: String,
    pub fields: Map<String, Value>,
}

impl WriteRecord {
    pub fn new(key: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            key: key.into(),
            fields,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub stream: Stream,
    pub records: Vec<WriteRecord>,
    /// Destination field matched for upserts
    pub primary_key: String,
    pub action: RecordAction,
}

/// Result of one write pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    pub success: u64,
    pub failure: u64,
    pub logs: Vec<RequestLog>,
    /// Keys of the records counted in `failure`
    pub failed_keys: HashSet<String>,
}

impl WriteOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_success(&mut self, count: u64) {
        self.success += count;
    }

    pub fn add_failures<'a>(&mut self, keys: impl IntoIterator<Item = &'a str>) {
        for key in keys {
            self.failure += 1;
            self.failed_keys.insert(key.to_string());
        }
    }

    pub fn log(&mut self, entry: RequestLog) {
        self.logs.push(entry);
    }

    pub fn merge(&mut self, other: WriteOutcome) {
        self.success += other.success;
        self.failure += other.failure;
        self.logs.extend(other.logs);
        self.failed_keys.extend(other.failed_keys);
    }

    pub fn total(&self) -> u64 {
        self.success + self.failure
    }
}

/// A destination API
#[async_trait]
pub trait DestinationConnector: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> DestinationCapabilities {
        DestinationCapabilities::default()
    }

    /// Never fails; problems are reported in the result
    async fn check_connection(&self) -> CheckResult;

    async fn discover_schema(&self) -> Result<Catalog>;

    /// Write a group of records sharing one action
    ///
    /// Per-record failures are counted in the outcome. `Err` means nothing
    /// could be attempted.
    async fn write(&self, request: WriteRequest) -> Result<WriteOutcome>;
}
