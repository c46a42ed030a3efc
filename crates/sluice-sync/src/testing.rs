//! In-memory collaborators for tests
//!
//! Every fake records what it was asked to do and can be told to fail, so
//! tests can drive the extractor, loader and lifecycle without a database,
//! destination API or orchestrator.
//!
//! ```rust,ignore
//! use sluice_sync::testing::*;
//!
//! let source = MemorySource::new(rows).fail_on_read(2);
//! let destination = MemoryDestination::new("Sales/orders").fail_keys(["7"]);
//! let orchestrator = RecordingOrchestrator::new().cancel_after(1);
//! ```

use crate::batch::compare_cursor;
use crate::error::{Result, SyncError, TransformError, TransformResult};
use crate::mapping::EmbeddingConfig;
use crate::model::{
    Catalog, CheckResult, LogLevel, RecordAction, RequestLog, Stream,
};
use crate::traits::{
    DestinationCapabilities, DestinationConnector, EmbeddingGenerator, ErrorReporter, Heartbeat,
    HeartbeatAck, Orchestrator, ReadRequest, ReportContext, ScheduleRequest, SourceConnector,
    WriteOutcome, WriteRequest,
};
use crate::types::Row;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

// ============================================================================
// Source
// ============================================================================

/// A source serving rows from memory
#[derive(Debug, Default)]
pub struct MemorySource {
    rows: Mutex<Vec<Row>>,
    requests: Mutex<Vec<ReadRequest>>,
    fail_on_read: Option<usize>,
    check_result: Option<CheckResult>,
    catalog: Catalog,
}

impl MemorySource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Default::default()
        }
    }

    /// Fail the n-th read (1-based)
    pub fn fail_on_read(mut self, n: usize) -> Self {
        self.fail_on_read = Some(n);
        self
    }

    pub fn with_check_result(mut self, result: CheckResult) -> Self {
        self.check_result = Some(result);
        self
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Replace the rows served by later reads
    pub fn set_rows(&self, rows: Vec<Row>) {
        *self.rows.lock() = rows;
    }

    pub fn requests(&self) -> Vec<ReadRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl SourceConnector for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn check_connection(&self) -> CheckResult {
        self.check_result.clone().unwrap_or_else(CheckResult::success)
    }

    async fn discover_schema(&self) -> Result<Catalog> {
        Ok(self.catalog.clone())
    }

    async fn read(&self, request: &ReadRequest) -> Result<Vec<Row>> {
        let call = {
            let mut requests = self.requests.lock();
            requests.push(request.clone());
            requests.len()
        };
        if self.fail_on_read == Some(call) {
            return Err(SyncError::connection(format!("read {call} failed")));
        }

        let mut rows: Vec<Row> = self.rows.lock().clone();
        if let Some(field) = &request.cursor_field {
            if let Some(snapshot) = &request.cursor_value {
                rows.retain(|row| {
                    row.get(field).is_some_and(|v| {
                        matches!(
                            compare_cursor(v, snapshot),
                            Some(Ordering::Greater | Ordering::Equal)
                        )
                    })
                });
            }
            rows.sort_by(|a, b| match (a.get(field), b.get(field)) {
                (Some(x), Some(y)) => compare_cursor(x, y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            });
        }

        Ok(rows
            .into_iter()
            .skip(request.row_offset() as usize)
            .take(request.limit as usize)
            .collect())
    }
}

// ============================================================================
// Destination
// ============================================================================

/// A destination keeping remote records in memory, keyed by primary-key value
#[derive(Debug)]
pub struct MemoryDestination {
    stream: Stream,
    capabilities: DestinationCapabilities,
    remote: Mutex<BTreeMap<String, Map<String, Value>>>,
    requests: Mutex<Vec<(RecordAction, Vec<String>)>>,
    fail_keys: HashSet<String>,
    fail_writes: bool,
}

impl MemoryDestination {
    pub fn new(stream_name: &str) -> Self {
        Self {
            stream: Stream::new(stream_name, json!({"type": "object"}))
                .url(format!("memory://{stream_name}")),
            capabilities: DestinationCapabilities {
                requires_upsert_identity: true,
            },
            remote: Mutex::new(BTreeMap::new()),
            requests: Mutex::new(Vec::new()),
            fail_keys: HashSet::new(),
            fail_writes: false,
        }
    }

    pub fn with_capabilities(mut self, capabilities: DestinationCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Records with these keys are rejected
    pub fn fail_keys<'a>(mut self, keys: impl IntoIterator<Item = &'a str>) -> Self {
        self.fail_keys = keys.into_iter().map(str::to_string).collect();
        self
    }

    /// Every write returns `Err`
    pub fn fail_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    /// Seed a record that already exists remotely
    pub fn seed(&self, key: &str, fields: Value) {
        if let Value::Object(map) = fields {
            self.remote.lock().insert(key.to_string(), map);
        }
    }

    pub fn remote(&self) -> BTreeMap<String, Map<String, Value>> {
        self.remote.lock().clone()
    }

    /// `(action, keys)` of every write call
    pub fn requests(&self) -> Vec<(RecordAction, Vec<String>)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl DestinationConnector for MemoryDestination {
    fn name(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> DestinationCapabilities {
        self.capabilities
    }

    async fn check_connection(&self) -> CheckResult {
        CheckResult::success()
    }

    async fn discover_schema(&self) -> Result<Catalog> {
        Ok(Catalog::new().add_stream(self.stream.clone()))
    }

    async fn write(&self, request: WriteRequest) -> Result<WriteOutcome> {
        self.requests.lock().push((
            request.action,
            request.records.iter().map(|r| r.key.clone()).collect(),
        ));
        if self.fail_writes {
            return Err(SyncError::connection("destination unavailable"));
        }

        let mut outcome = WriteOutcome::new();
        let mut remote = self.remote.lock();
        for record in request.records {
            if self.fail_keys.contains(&record.key) {
                outcome.add_failures([record.key.as_str()]);
                continue;
            }
            let remote_key = match record.fields.get(&request.primary_key) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => record.key.clone(),
            };
            match request.action {
                RecordAction::Delete => {
                    remote.remove(&remote_key);
                }
                RecordAction::Insert | RecordAction::Update => {
                    remote.insert(remote_key, record.fields);
                }
            }
            outcome.add_success(1);
        }
        outcome.log(RequestLog::new(
            LogLevel::Info,
            json!({"action": request.action.to_string()}),
            json!({"success": outcome.success, "failure": outcome.failure}),
        ));
        Ok(outcome)
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// An orchestrator that records every call
#[derive(Debug, Default)]
pub struct RecordingOrchestrator {
    schedules: Mutex<Vec<ScheduleRequest>>,
    cancels: Mutex<Vec<String>>,
    heartbeats: Mutex<Vec<Heartbeat>>,
    cancel_after: Option<usize>,
    failing: bool,
}

impl RecordingOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation from the n-th heartbeat on
    pub fn cancel_after(mut self, n: usize) -> Self {
        self.cancel_after = Some(n);
        self
    }

    /// Every call returns an orchestrator error
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn schedules(&self) -> Vec<ScheduleRequest> {
        self.schedules.lock().clone()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().clone()
    }

    pub fn heartbeats(&self) -> Vec<Heartbeat> {
        self.heartbeats.lock().clone()
    }
}

#[async_trait]
impl Orchestrator for RecordingOrchestrator {
    async fn schedule(&self, request: &ScheduleRequest) -> Result<()> {
        self.schedules.lock().push(request.clone());
        if self.failing {
            return Err(SyncError::orchestrator("schedule rejected"));
        }
        Ok(())
    }

    async fn cancel(&self, workflow_id: &str) -> Result<()> {
        self.cancels.lock().push(workflow_id.to_string());
        if self.failing {
            return Err(SyncError::orchestrator("terminate rejected"));
        }
        Ok(())
    }

    async fn heartbeat(&self, heartbeat: &Heartbeat) -> Result<HeartbeatAck> {
        let count = {
            let mut heartbeats = self.heartbeats.lock();
            heartbeats.push(heartbeat.clone());
            heartbeats.len()
        };
        if self.failing {
            return Err(SyncError::orchestrator("heartbeat rejected"));
        }
        Ok(match self.cancel_after {
            Some(n) if count >= n => HeartbeatAck::cancel(),
            _ => HeartbeatAck::proceed(),
        })
    }
}

// ============================================================================
// Reporter
// ============================================================================

/// A reported error or log line
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub level: LogLevel,
    pub message: String,
    pub context: ReportContext,
}

/// A reporter that keeps everything in memory
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<Report>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().clone()
    }

    /// Reported errors only
    pub fn errors(&self) -> Vec<Report> {
        self.reports
            .lock()
            .iter()
            .filter(|r| r.level == LogLevel::Error)
            .cloned()
            .collect()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, error: &(dyn Error + Send + Sync + 'static), context: &ReportContext) {
        self.reports.lock().push(Report {
            level: LogLevel::Error,
            message: error.to_string(),
            context: context.clone(),
        });
    }

    fn log(&self, level: LogLevel, message: &str, context: &ReportContext) {
        self.reports.lock().push(Report {
            level,
            message: message.to_string(),
            context: context.clone(),
        });
    }
}

// ============================================================================
// Embeddings
// ============================================================================

/// Returns the same vector for every input
#[derive(Debug, Default)]
pub struct StubEmbedder {
    vector: Vec<f32>,
    calls: Mutex<Vec<String>>,
    failures: AtomicU64,
    fail: bool,
}

impl StubEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(AtomicOrdering::Relaxed)
    }
}

#[async_trait]
impl EmbeddingGenerator for StubEmbedder {
    async fn generate_embedding(
        &self,
        text: &str,
        _config: &EmbeddingConfig,
    ) -> TransformResult<Vec<f32>> {
        self.calls.lock().push(text.to_string());
        if self.fail {
            self.failures.fetch_add(1, AtomicOrdering::Relaxed);
            return Err(TransformError::Embedding("embedding service unavailable".into()));
        }
        Ok(self.vector.clone())
    }
}

/// Build a row from a JSON object literal
pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Row::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
