//! Persistence interface

use crate::error::Result;
use crate::model::{RecordStatus, RunId, SyncDefinition, SyncId, SyncRecord, SyncRun};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;

/// Progress committed after each batch, applied atomically
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub run_id: RunId,
    pub sync_id: SyncId,
    pub current_offset: u64,
    pub total_query_rows: u64,
    pub skipped_rows: u64,
    pub rejected_rows: u64,
    /// New value of the sync's `current_cursor_field`, when advanced
    pub cursor: Option<Value>,
}

/// Delivery result for one record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordStatusUpdate {
    pub primary_key: String,
    pub status: RecordStatus,
    pub logs: Option<Value>,
}

/// Storage for syncs, runs and records
///
/// Lookups of missing syncs and runs return `SyncError::NotFound`.
#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn get_sync(&self, id: SyncId) -> Result<SyncDefinition>;

    /// Persist a sync; an id of 0 is assigned a fresh one
    async fn save_sync(&self, sync: &SyncDefinition) -> Result<SyncDefinition>;

    /// Persist a new run and assign its id
    async fn insert_run(&self, run: SyncRun) -> Result<SyncRun>;

    async fn get_run(&self, id: RunId) -> Result<SyncRun>;

    async fn save_run(&self, run: &SyncRun) -> Result<()>;

    /// Runs of a sync that are not discarded, oldest first
    async fn runs_for_sync(&self, sync_id: SyncId) -> Result<Vec<SyncRun>>;

    /// Soft-delete every run of a sync, returning how many were discarded
    async fn discard_runs(&self, sync_id: SyncId, at: DateTime<Utc>) -> Result<u64>;

    async fn checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    async fn find_record(&self, sync_id: SyncId, primary_key: &str) -> Result<Option<SyncRecord>>;

    /// Insert or replace the record with the same sync and primary key
    async fn upsert_record(&self, record: SyncRecord) -> Result<()>;

    /// Primary keys of records not marked deleted
    async fn live_primary_keys(&self, sync_id: SyncId) -> Result<HashSet<String>>;

    /// Pending records last touched by a run
    async fn pending_records(&self, run_id: RunId) -> Result<Vec<SyncRecord>>;

    async fn update_record_statuses(
        &self,
        sync_id: SyncId,
        updates: &[RecordStatusUpdate],
    ) -> Result<()>;
}
