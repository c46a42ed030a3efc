//! Incremental extraction of one sync run
//!
//! The extractor pulls bounded batches from the source, maps and fingerprints
//! every row on a bounded worker pool, stores a pending [`SyncRecord`] for each
//! changed row, checkpoints after every batch and heartbeats the orchestrator.
//! When the source is exhausted, records of the sync that the run did not see
//! are marked for deletion and the run is queued for the loader.

use crate::batch::{BatchParams, BatchQueryRunner};
use crate::error::{Result, SyncError};
use crate::fingerprint::fingerprint;
use crate::mapping::RecordTransformer;
use crate::model::{
    LogLevel, RecordAction, RecordStatus, RunEvent, RunId, SyncDefinition, SyncRecord, SyncRun,
};
use crate::traits::{
    Checkpoint, ErrorReporter, Heartbeat, Orchestrator, ReportContext, SourceConnector, SyncStore,
};
use crate::types::Row;
use metrics::counter;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

fn default_workers() -> usize {
    5
}

fn default_batch_size() -> u64 {
    1000
}

/// Extraction tuning
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ExtractorConfig {
    /// Rows transformed concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Rows per source read when the sync has no increment strategy limit
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
        }
    }
}

/// Counters of one extraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub batches: u64,
    pub current_offset: u64,
    pub total_query_rows: u64,
    pub skipped_rows: u64,
    pub rejected_rows: u64,
    /// Rows whose mapping failed
    pub failed_rows: u64,
    /// Records marked for deletion
    pub deleted_rows: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// The run was not in a state to be extracted
    Skipped,
    /// The run is queued for loading
    Completed(ExtractStats),
    /// Cancellation was requested at a batch boundary
    Cancelled(ExtractStats),
}

#[derive(Debug, Default)]
struct Counters {
    skipped: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

/// Everything a row worker needs
struct RowContext {
    store: Arc<dyn SyncStore>,
    reporter: Arc<dyn ErrorReporter>,
    transformer: Arc<RecordTransformer>,
    sync: Arc<SyncDefinition>,
    run_id: RunId,
    seen: Arc<Mutex<HashSet<String>>>,
    counters: Arc<Counters>,
}

pub struct IncrementalExtractor {
    store: Arc<dyn SyncStore>,
    orchestrator: Arc<dyn Orchestrator>,
    reporter: Arc<dyn ErrorReporter>,
    transformer: Arc<RecordTransformer>,
    config: ExtractorConfig,
}

impl IncrementalExtractor {
    pub fn new(
        store: Arc<dyn SyncStore>,
        orchestrator: Arc<dyn Orchestrator>,
        reporter: Arc<dyn ErrorReporter>,
        transformer: Arc<RecordTransformer>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            reporter,
            transformer,
            config: ExtractorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExtractorConfig) -> Self {
        self.config = config;
        self
    }

    /// Extract run `run_id` from `source`
    ///
    /// Errors are reported and returned; the run keeps the status it reached.
    pub async fn read(
        &self,
        run_id: RunId,
        source: Arc<dyn SourceConnector>,
    ) -> Result<ExtractOutcome> {
        match self.extract(run_id, source).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.reporter
                    .report(&err, &ReportContext::new().run(run_id).stage("extract"));
                Err(err)
            }
        }
    }

    async fn extract(
        &self,
        run_id: RunId,
        source: Arc<dyn SourceConnector>,
    ) -> Result<ExtractOutcome> {
        let mut run = self.store.get_run(run_id).await?;
        if !run.may_query() {
            self.reporter.log(
                LogLevel::Warn,
                &format!("sync run is in status '{}', nothing to extract", run.status),
                &ReportContext::new().sync(run.sync_id).run(run.id),
            );
            return Ok(ExtractOutcome::Skipped);
        }

        let sync = Arc::new(self.store.get_sync(run.sync_id).await?);
        run.apply(RunEvent::Query)?;
        self.store.save_run(&run).await?;

        let params = BatchParams::for_run(&sync, &run, self.config.batch_size);
        let cursor_filtered = params.cursor_value.is_some();
        let mut runner = BatchQueryRunner::new(source, params)?;

        info!(
            sync_id = sync.id,
            run_id = run.id,
            stream = %sync.stream_name,
            offset = runner.offset(),
            "Starting extraction"
        );

        let ctx = Arc::new(RowContext {
            store: Arc::clone(&self.store),
            reporter: Arc::clone(&self.reporter),
            transformer: Arc::clone(&self.transformer),
            sync: Arc::clone(&sync),
            run_id: run.id,
            seen: Arc::new(Mutex::new(HashSet::new())),
            counters: Arc::new(Counters {
                skipped: AtomicU64::new(run.skipped_rows),
                rejected: AtomicU64::new(run.rejected_rows),
                failed: AtomicU64::new(0),
            }),
        });
        let initial_cursor = run.current_cursor_field.clone();
        let mut stats = ExtractStats {
            current_offset: runner.offset(),
            total_query_rows: run.total_query_rows,
            ..Default::default()
        };

        while let Some(batch) = runner.next_batch().await? {
            let rows = batch.records.len() as u64;
            stats.batches += 1;
            stats.total_query_rows += rows;
            stats.current_offset = batch.next_offset;
            counter!("sluice_extractor_batches_total").increment(1);
            counter!("sluice_extractor_rows_total").increment(rows);

            self.process_batch(&ctx, batch.records).await?;

            stats.skipped_rows = ctx.counters.skipped.load(Ordering::Relaxed);
            stats.rejected_rows = ctx.counters.rejected.load(Ordering::Relaxed);
            stats.failed_rows = ctx.counters.failed.load(Ordering::Relaxed);

            self.store
                .checkpoint(&Checkpoint {
                    run_id: run.id,
                    sync_id: sync.id,
                    current_offset: stats.current_offset,
                    total_query_rows: stats.total_query_rows,
                    skipped_rows: stats.skipped_rows,
                    rejected_rows: stats.rejected_rows,
                    cursor: batch.cursor_value,
                })
                .await?;
            run.current_offset = stats.current_offset;
            run.total_query_rows = stats.total_query_rows;
            run.skipped_rows = stats.skipped_rows;
            run.rejected_rows = stats.rejected_rows;

            debug!(
                run_id = run.id,
                offset = stats.current_offset,
                rows = stats.total_query_rows,
                skipped = stats.skipped_rows,
                "Checkpointed batch"
            );

            if self.cancel_requested(&run, &stats, initial_cursor.clone()).await {
                run.apply(RunEvent::Cancel)?;
                self.store.save_run(&run).await?;
                info!(
                    sync_id = sync.id,
                    run_id = run.id,
                    offset = stats.current_offset,
                    "Extraction cancelled"
                );
                return Ok(ExtractOutcome::Cancelled(stats));
            }
        }

        if sync.emits(RecordAction::Delete) && !cursor_filtered {
            let seen = ctx.seen.lock().clone();
            stats.deleted_rows = self.mark_deleted(&sync, run.id, &seen).await?;
        }

        run.apply(RunEvent::Queue)?;
        self.store.save_run(&run).await?;
        counter!("sluice_extractor_rows_skipped_total").increment(stats.skipped_rows);

        info!(
            sync_id = sync.id,
            run_id = run.id,
            rows = stats.total_query_rows,
            skipped = stats.skipped_rows,
            rejected = stats.rejected_rows,
            failed = stats.failed_rows,
            deleted = stats.deleted_rows,
            "Extraction finished"
        );
        Ok(ExtractOutcome::Completed(stats))
    }

    /// Transform and store one batch on the worker pool
    async fn process_batch(&self, ctx: &Arc<RowContext>, rows: Vec<Row>) -> Result<()> {
        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();

        for row in rows {
            let permit = Arc::clone(&permits)
                .acquire_owned()
                .await
                .map_err(|e| SyncError::batch_io("process rows", e.to_string()))?;
            let ctx = Arc::clone(ctx);
            tasks.spawn(async move {
                let result = process_row(&ctx, row).await;
                drop(permit);
                result
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| SyncError::batch_io("process rows", e.to_string()));
            if let Err(err) = result.and_then(|r| r) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn cancel_requested(
        &self,
        run: &SyncRun,
        stats: &ExtractStats,
        initial_cursor: Option<Value>,
    ) -> bool {
        let heartbeat = Heartbeat {
            run_id: run.id,
            sync_id: run.sync_id,
            current_offset: stats.current_offset,
            total_query_rows: stats.total_query_rows,
            skipped_rows: stats.skipped_rows,
            initial_cursor,
        };
        match self.orchestrator.heartbeat(&heartbeat).await {
            Ok(ack) => ack.cancel_requested,
            Err(err) => {
                warn!(run_id = run.id, error = %err, "Heartbeat failed, continuing");
                self.reporter.report(
                    &err,
                    &ReportContext::new()
                        .sync(run.sync_id)
                        .run(run.id)
                        .stage("heartbeat"),
                );
                false
            }
        }
    }

    /// Mark live records that this run did not see as deleted
    async fn mark_deleted(
        &self,
        sync: &SyncDefinition,
        run_id: RunId,
        seen: &HashSet<String>,
    ) -> Result<u64> {
        let live = self.store.live_primary_keys(sync.id).await?;
        let mut deleted = 0;
        for key in live.difference(seen) {
            let Some(mut record) = self.store.find_record(sync.id, key).await? else {
                continue;
            };
            record.action = RecordAction::Delete;
            record.status = RecordStatus::Pending;
            record.sync_run_id = run_id;
            record.logs = None;
            self.store.upsert_record(record).await?;
            deleted += 1;
        }
        if deleted > 0 {
            info!(sync_id = sync.id, run_id, deleted, "Detected deleted records");
        }
        Ok(deleted)
    }
}

/// String form of a primary-key value; `None` when it cannot identify a row
fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

async fn process_row(ctx: &RowContext, row: Row) -> Result<()> {
    let sync = &ctx.sync;
    let report_ctx = ReportContext::new()
        .sync(sync.id)
        .run(ctx.run_id)
        .stream(sync.stream_name.clone());

    let key = sync
        .source_primary_key()
        .and_then(|field| row.get(field))
        .and_then(key_string);
    let Some(key) = key else {
        ctx.counters.rejected.fetch_add(1, Ordering::Relaxed);
        ctx.reporter.log(
            LogLevel::Warn,
            "row rejected: primary key missing or empty",
            &report_ctx,
        );
        return Ok(());
    };
    ctx.seen.lock().insert(key.clone());

    let existing = ctx.store.find_record(sync.id, &key).await?;

    let payload = match ctx.transformer.transform(&sync.mapping, &row).await {
        Ok(payload) => payload,
        Err(err) => {
            ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
            ctx.reporter.report(&err, &report_ctx.clone().primary_key(&key));
            let (record, action) = match &existing {
                Some(r) if r.is_live() => (r.record.clone(), r.action),
                Some(r) => (r.record.clone(), RecordAction::Insert),
                None => (Value::Null, RecordAction::Insert),
            };
            let mut failed = SyncRecord::new(sync.id, ctx.run_id, key, "", record, action);
            failed.status = RecordStatus::Failed;
            failed.logs = Some(json!({ "error": err.user_message() }));
            return ctx.store.upsert_record(failed).await;
        }
    };

    let fp = fingerprint(&payload);
    if existing.as_ref().is_some_and(|r| r.is_unchanged(&fp)) {
        ctx.counters.skipped.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    }

    let action = match &existing {
        Some(r) if r.is_live() && r.status == RecordStatus::Success => RecordAction::Update,
        Some(r) if r.is_live() => r.action,
        _ => RecordAction::Insert,
    };
    ctx.store
        .upsert_record(SyncRecord::new(sync.id, ctx.run_id, key, fp, payload, action))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunStatus;
    use crate::store::MemoryStore;
    use crate::testing::{row, MemorySource, RecordingOrchestrator, RecordingReporter};

    struct Harness {
        store: Arc<MemoryStore>,
        orchestrator: Arc<RecordingOrchestrator>,
        reporter: Arc<RecordingReporter>,
        sync_id: u64,
    }

    impl Harness {
        async fn new(mapping: &str, orchestrator: RecordingOrchestrator) -> Self {
            Self::with_definition("", mapping, orchestrator).await
        }

        async fn with_definition(
            extra: &str,
            mapping: &str,
            orchestrator: RecordingOrchestrator,
        ) -> Self {
            let store = Arc::new(MemoryStore::new());
            let sync: SyncDefinition = serde_yaml::from_str(&format!(
                "model: {{name: m, query: SELECT * FROM t, primary_key: id}}\nstream_name: s\n{extra}mapping:\n{mapping}"
            ))
            .unwrap();
            let sync = store.save_sync(&sync).await.unwrap();
            Self {
                store,
                orchestrator: Arc::new(orchestrator),
                reporter: Arc::new(RecordingReporter::new()),
                sync_id: sync.id,
            }
        }

        fn extractor(&self, workers: usize, batch_size: u64) -> IncrementalExtractor {
            IncrementalExtractor::new(
                self.store.clone(),
                self.orchestrator.clone(),
                self.reporter.clone(),
                Arc::new(RecordTransformer::new()),
            )
            .with_config(ExtractorConfig {
                workers,
                batch_size,
            })
        }

        async fn new_run(&self) -> RunId {
            let sync = self.store.get_sync(self.sync_id).await.unwrap();
            self.store
                .insert_run(SyncRun::new(0, sync.id, 0, sync.current_cursor_field.clone()))
                .await
                .unwrap()
                .id
        }
    }

    const MAPPING: &str = "  id: id\n  name: fields.name\n";

    fn rows(ids: &[u64]) -> Vec<Row> {
        ids.iter()
            .map(|i| row(json!({"id": i, "name": format!("n{i}")})))
            .collect()
    }

    fn completed(outcome: ExtractOutcome) -> ExtractStats {
        match outcome {
            ExtractOutcome::Completed(stats) => stats,
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_run_inserts_everything() {
        let h = Harness::new(MAPPING, RecordingOrchestrator::new()).await;
        let run_id = h.new_run().await;
        let source = Arc::new(MemorySource::new(rows(&[1, 2, 3, 4, 5])));

        let stats = completed(h.extractor(3, 2).read(run_id, source).await.unwrap());
        assert_eq!(stats.total_query_rows, 5);
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.skipped_rows, 0);

        let run = h.store.get_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.total_query_rows, 5);
        assert_eq!(run.current_offset, 6);

        let records = h.store.pending_records(run_id).await.unwrap();
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.action == RecordAction::Insert));
        assert_eq!(records[0].record, json!({"id": 1, "fields": {"name": "n1"}}));
        assert_eq!(h.orchestrator.heartbeats().len(), 3);
    }

    #[tokio::test]
    async fn test_unchanged_rows_are_skipped() {
        let h = Harness::new(MAPPING, RecordingOrchestrator::new()).await;
        let source = Arc::new(MemorySource::new(rows(&[1, 2, 3])));

        let first = h.new_run().await;
        h.extractor(2, 10).read(first, source.clone()).await.unwrap();
        let updates: Vec<_> = ["1", "2", "3"]
            .iter()
            .map(|k| crate::traits::RecordStatusUpdate {
                primary_key: k.to_string(),
                status: RecordStatus::Success,
                logs: None,
            })
            .collect();
        h.store.update_record_statuses(h.sync_id, &updates).await.unwrap();

        let mut changed = rows(&[1, 2, 3]);
        changed[1].insert("name".into(), json!("renamed"));
        source.set_rows(changed);

        let second = h.new_run().await;
        let stats = completed(h.extractor(2, 10).read(second, source).await.unwrap());
        assert_eq!(stats.skipped_rows, 2);

        let pending = h.store.pending_records(second).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].primary_key, "2");
        assert_eq!(pending[0].action, RecordAction::Update);
    }

    #[tokio::test]
    async fn test_pending_record_with_same_content_is_requeued() {
        let h = Harness::new(MAPPING, RecordingOrchestrator::new()).await;
        let source = Arc::new(MemorySource::new(rows(&[1])));

        let first = h.new_run().await;
        h.extractor(1, 10).read(first, source.clone()).await.unwrap();
        let second = h.new_run().await;
        let stats = completed(h.extractor(1, 10).read(second, source).await.unwrap());

        assert_eq!(stats.skipped_rows, 0);
        let pending = h.store.pending_records(second).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action, RecordAction::Insert);
    }

    #[tokio::test]
    async fn test_missing_rows_are_marked_deleted() {
        let h = Harness::new(MAPPING, RecordingOrchestrator::new()).await;
        let source = Arc::new(MemorySource::new(rows(&[1, 2, 3])));
        let first = h.new_run().await;
        h.extractor(2, 10).read(first, source.clone()).await.unwrap();

        source.set_rows(rows(&[1, 3]));
        let second = h.new_run().await;
        let stats = completed(h.extractor(2, 10).read(second, source).await.unwrap());
        assert_eq!(stats.deleted_rows, 1);

        let record = h.store.find_record(h.sync_id, "2").await.unwrap().unwrap();
        assert_eq!(record.action, RecordAction::Delete);
        assert_eq!(record.status, RecordStatus::Pending);
        assert_eq!(record.sync_run_id, second);
    }

    #[tokio::test]
    async fn test_rows_without_key_are_rejected() {
        let h = Harness::new(MAPPING, RecordingOrchestrator::new()).await;
        let run_id = h.new_run().await;
        let source = Arc::new(MemorySource::new(vec![
            row(json!({"id": 1, "name": "a"})),
            row(json!({"name": "no id"})),
            row(json!({"id": "  ", "name": "blank id"})),
        ]));

        let stats = completed(h.extractor(2, 10).read(run_id, source).await.unwrap());
        assert_eq!(stats.rejected_rows, 2);
        assert_eq!(h.store.get_run(run_id).await.unwrap().rejected_rows, 2);
        assert_eq!(h.store.pending_records(run_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transform_error_stores_failed_record() {
        let mapping = "  - {mapping_type: standard, from: id, to: id}\n  - {mapping_type: template, from: \"{{ id | divided_by: 0 }}\", to: ratio}\n";
        let h = Harness::new(mapping, RecordingOrchestrator::new()).await;
        let run_id = h.new_run().await;
        let source = Arc::new(MemorySource::new(rows(&[1, 2])));

        let stats = completed(h.extractor(2, 10).read(run_id, source).await.unwrap());
        assert_eq!(stats.failed_rows, 2);

        let record = h.store.find_record(h.sync_id, "1").await.unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Failed);
        assert!(record.logs.unwrap()["error"].as_str().unwrap().contains("divided_by"));
        assert_eq!(h.reporter.errors().len(), 2);
    }

    #[tokio::test]
    async fn test_arithmetic_overflow_fails_only_its_row() {
        let mapping = "  - {mapping_type: standard, from: id, to: id}\n  - {mapping_type: template, from: \"{{ big | modulo: -1 }}\", to: rem}\n";
        let h = Harness::new(mapping, RecordingOrchestrator::new()).await;
        let run_id = h.new_run().await;
        let source = Arc::new(MemorySource::new(vec![
            row(json!({"id": 1, "big": i64::MIN})),
            row(json!({"id": 2, "big": 5})),
        ]));

        let stats = completed(h.extractor(2, 10).read(run_id, source).await.unwrap());
        assert_eq!(stats.failed_rows, 1);
        assert_eq!(h.store.get_run(run_id).await.unwrap().status, RunStatus::Queued);

        let failed = h.store.find_record(h.sync_id, "1").await.unwrap().unwrap();
        assert_eq!(failed.status, RecordStatus::Failed);
        let pending = h.store.pending_records(run_id).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record, json!({"id": 2, "rem": 0}));
    }

    #[tokio::test]
    async fn test_cursor_filtered_run_marks_no_deletions() {
        let h = Harness::with_definition(
            "cursor_field: updated_at\n",
            MAPPING,
            RecordingOrchestrator::new(),
        )
        .await;
        let versioned = |ids: &[u64]| -> Vec<Row> {
            ids.iter()
                .map(|i| row(json!({"id": i, "name": format!("n{i}"), "updated_at": i * 10})))
                .collect()
        };
        let source = Arc::new(MemorySource::new(versioned(&[1, 2, 3])));
        let first = h.new_run().await;
        h.extractor(2, 10).read(first, source.clone()).await.unwrap();

        // only rows at or past the committed cursor come back
        source.set_rows(versioned(&[3]));
        let second = h.new_run().await;
        let stats = completed(h.extractor(2, 10).read(second, source.clone()).await.unwrap());
        assert_eq!(stats.deleted_rows, 0);
        assert_eq!(source.requests().last().unwrap().cursor_value, Some(json!(30)));

        for key in ["1", "2"] {
            let record = h.store.find_record(h.sync_id, key).await.unwrap().unwrap();
            assert_eq!(record.action, RecordAction::Insert);
            assert_eq!(record.sync_run_id, first);
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_at_batch_boundary() {
        let h = Harness::new(MAPPING, RecordingOrchestrator::new().cancel_after(1)).await;
        let run_id = h.new_run().await;
        let source = Arc::new(MemorySource::new(rows(&[1, 2, 3, 4, 5])));

        let outcome = h.extractor(2, 2).read(run_id, source.clone()).await.unwrap();
        assert!(matches!(outcome, ExtractOutcome::Cancelled(_)));
        assert_eq!(source.requests().len(), 1);

        let run = h.store.get_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Canceled);
        assert_eq!(run.current_offset, 2);
    }

    #[tokio::test]
    async fn test_heartbeat_failure_does_not_stop_extraction() {
        let h = Harness::new(MAPPING, RecordingOrchestrator::new().failing()).await;
        let run_id = h.new_run().await;
        let source = Arc::new(MemorySource::new(rows(&[1, 2, 3])));

        let stats = completed(h.extractor(2, 2).read(run_id, source).await.unwrap());
        assert_eq!(stats.total_query_rows, 3);
        assert_eq!(h.reporter.errors().len(), 2);
    }

    #[tokio::test]
    async fn test_read_failure_is_reported() {
        let h = Harness::new(MAPPING, RecordingOrchestrator::new()).await;
        let run_id = h.new_run().await;
        let source = Arc::new(MemorySource::new(rows(&[1, 2, 3])).fail_on_read(2));

        let err = h.extractor(2, 2).read(run_id, source).await.unwrap_err();
        assert_eq!(err.kind(), "batch_io");
        assert_eq!(h.reporter.errors().len(), 1);

        let run = h.store.get_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Querying);
        assert_eq!(run.current_offset, 2);
    }

    #[tokio::test]
    async fn test_run_not_queryable_is_skipped() {
        let h = Harness::new(MAPPING, RecordingOrchestrator::new()).await;
        let run_id = h.new_run().await;
        let mut run = h.store.get_run(run_id).await.unwrap();
        run.apply(RunEvent::Cancel).unwrap();
        h.store.save_run(&run).await.unwrap();

        let source = Arc::new(MemorySource::new(rows(&[1])));
        let outcome = h.extractor(1, 10).read(run_id, source.clone()).await.unwrap();
        assert_eq!(outcome, ExtractOutcome::Skipped);
        assert!(source.requests().is_empty());
    }
}
