//! Write pass of a sync run
//!
//! Hands the run's pending records to the destination grouped by action,
//! records each record's delivery status, aggregates counters and request
//! logs onto the run, then completes (or fails) the run and the sync.

use crate::error::{Result, SyncError};
use crate::lifecycle::transition_sync;
use crate::model::{
    RecordAction, RecordStatus, RunEvent, RunId, RunStatus, Stream, SyncEvent, SyncRecord,
    SyncRun,
};
use crate::traits::{
    DestinationConnector, ErrorReporter, RecordStatusUpdate, ReportContext, SyncStore,
    WriteOutcome, WriteRecord, WriteRequest,
};
use metrics::{counter, histogram};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Counters of one write pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub success: u64,
    pub failure: u64,
    /// Records handed to the destination
    pub total: u64,
    /// Pending records whose action the sync does not emit
    pub filtered: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The run was not queued for loading
    Skipped,
    Completed(LoadStats),
}

pub struct Loader {
    store: Arc<dyn SyncStore>,
    reporter: Arc<dyn ErrorReporter>,
}

impl Loader {
    pub fn new(store: Arc<dyn SyncStore>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self { store, reporter }
    }

    /// Deliver the pending records of run `run_id`
    ///
    /// A write that cannot be attempted at all aborts the run and fails the
    /// sync; the error is reported and returned.
    pub async fn load(
        &self,
        run_id: RunId,
        destination: Arc<dyn DestinationConnector>,
    ) -> Result<LoadOutcome> {
        let mut run = self.store.get_run(run_id).await?;
        if !matches!(run.status, RunStatus::Queued | RunStatus::InProgress) {
            warn!(run_id, status = %run.status, "Run is not queued, nothing to load");
            return Ok(LoadOutcome::Skipped);
        }
        run.apply(RunEvent::Progress)?;
        self.store.save_run(&run).await?;

        match self.deliver(&mut run, destination.as_ref()).await {
            Ok(stats) => {
                run.apply(RunEvent::Complete)?;
                self.store.save_run(&run).await?;
                self.finish_sync(&run, SyncEvent::Complete).await;
                info!(
                    sync_id = run.sync_id,
                    run_id,
                    success = stats.success,
                    failure = stats.failure,
                    "Load finished"
                );
                Ok(LoadOutcome::Completed(stats))
            }
            Err(err) => {
                self.reporter.report(
                    &err,
                    &ReportContext::new()
                        .sync(run.sync_id)
                        .run(run_id)
                        .stage("load"),
                );
                run.error = Some(err.user_message());
                run.apply(RunEvent::Abort)?;
                self.store.save_run(&run).await?;
                self.finish_sync(&run, SyncEvent::Fail).await;
                Err(err)
            }
        }
    }

    async fn deliver(
        &self,
        run: &mut SyncRun,
        destination: &dyn DestinationConnector,
    ) -> Result<LoadStats> {
        let sync = self.store.get_sync(run.sync_id).await?;
        let primary_key = sync
            .destination_primary_key()
            .ok_or_else(|| SyncError::validation("destination primary key is not configured"))?
            .to_string();
        let catalog = destination.discover_schema().await?;
        let stream = catalog
            .find_stream(&sync.stream_name)
            .cloned()
            .ok_or_else(|| {
                SyncError::validation(format!(
                    "stream '{}' not found at destination '{}'",
                    sync.stream_name,
                    destination.name()
                ))
            })?;

        let records = self.store.pending_records(run.id).await?;
        let group_size = sync.destination_settings.batch_size.max(1);
        let mut stats = LoadStats::default();

        for action in [RecordAction::Insert, RecordAction::Update, RecordAction::Delete] {
            let group: Vec<&SyncRecord> = records.iter().filter(|r| r.action == action).collect();
            if group.is_empty() {
                continue;
            }
            if !sync.emits(action) {
                stats.filtered += group.len() as u64;
                continue;
            }
            for chunk in group.chunks(group_size) {
                let outcome = self
                    .write_chunk(destination, &stream, &primary_key, action, chunk)
                    .await?;
                self.record_statuses(run.sync_id, chunk, &outcome).await?;

                stats.success += outcome.success;
                stats.failure += outcome.failure;
                stats.total += chunk.len() as u64;
                run.successful_rows += outcome.success;
                run.failed_rows += outcome.failure;
                run.total_rows += chunk.len() as u64;
                run.logs.extend(outcome.logs);
                self.store.save_run(run).await?;
            }
        }
        Ok(stats)
    }

    async fn write_chunk(
        &self,
        destination: &dyn DestinationConnector,
        stream: &Stream,
        primary_key: &str,
        action: RecordAction,
        chunk: &[&SyncRecord],
    ) -> Result<WriteOutcome> {
        let request = WriteRequest {
            stream: stream.clone(),
            records: chunk
                .iter()
                .map(|r| {
                    let fields = match &r.record {
                        Value::Object(map) => map.clone(),
                        _ => Map::new(),
                    };
                    WriteRecord::new(r.primary_key.clone(), fields)
                })
                .collect(),
            primary_key: primary_key.to_string(),
            action,
        };

        let started = Instant::now();
        let outcome = destination.write(request).await?;
        histogram!("sluice_writer_request_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        counter!("sluice_writer_records_total", "outcome" => "success").increment(outcome.success);
        counter!("sluice_writer_records_total", "outcome" => "failure").increment(outcome.failure);
        Ok(outcome)
    }

    async fn record_statuses(
        &self,
        sync_id: u64,
        chunk: &[&SyncRecord],
        outcome: &WriteOutcome,
    ) -> Result<()> {
        let updates: Vec<RecordStatusUpdate> = chunk
            .iter()
            .map(|r| {
                if outcome.failed_keys.contains(&r.primary_key) {
                    RecordStatusUpdate {
                        primary_key: r.primary_key.clone(),
                        status: RecordStatus::Failed,
                        logs: Some(json!({"error": "The destination rejected the record"})),
                    }
                } else {
                    RecordStatusUpdate {
                        primary_key: r.primary_key.clone(),
                        status: RecordStatus::Success,
                        logs: None,
                    }
                }
            })
            .collect();
        self.store.update_record_statuses(sync_id, &updates).await
    }

    async fn finish_sync(&self, run: &SyncRun, event: SyncEvent) {
        if let Err(err) = transition_sync(self.store.as_ref(), run.sync_id, event).await {
            warn!(sync_id = run.sync_id, error = %err, "Could not update sync status");
            self.reporter.report(
                &err,
                &ReportContext::new().sync(run.sync_id).run(run.id).stage("load"),
            );
        }
    }
}
