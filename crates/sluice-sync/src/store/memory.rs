//! In-process store used by the CLI and tests

use crate::error::{Entity, Result, SyncError};
use crate::model::{
    RecordStatus, RunId, SyncDefinition, SyncId, SyncRecord, SyncRun,
};
use crate::traits::{Checkpoint, RecordStatusUpdate, SyncStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Default)]
struct Inner {
    next_sync_id: SyncId,
    next_run_id: RunId,
    syncs: BTreeMap<SyncId, SyncDefinition>,
    runs: BTreeMap<RunId, SyncRun>,
    records: HashMap<(SyncId, String), SyncRecord>,
}

/// `SyncStore` backed by in-memory maps
///
/// Every operation takes the lock once, so checkpoints are atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records of a sync, ordered by primary key
    pub fn records(&self, sync_id: SyncId) -> Vec<SyncRecord> {
        let inner = self.inner.read();
        let mut records: Vec<SyncRecord> = inner
            .records
            .values()
            .filter(|r| r.sync_id == sync_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.primary_key.cmp(&b.primary_key));
        records
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn get_sync(&self, id: SyncId) -> Result<SyncDefinition> {
        self.inner
            .read()
            .syncs
            .get(&id)
            .cloned()
            .ok_or_else(|| SyncError::not_found(Entity::Sync, id))
    }

    async fn save_sync(&self, sync: &SyncDefinition) -> Result<SyncDefinition> {
        let mut inner = self.inner.write();
        let mut saved = sync.clone();
        if saved.id == 0 {
            inner.next_sync_id += 1;
            saved.id = inner.next_sync_id;
        } else {
            inner.next_sync_id = inner.next_sync_id.max(saved.id);
        }
        inner.syncs.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn insert_run(&self, mut run: SyncRun) -> Result<SyncRun> {
        let mut inner = self.inner.write();
        if !inner.syncs.contains_key(&run.sync_id) {
            return Err(SyncError::not_found(Entity::Sync, run.sync_id));
        }
        inner.next_run_id += 1;
        run.id = inner.next_run_id;
        inner.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get_run(&self, id: RunId) -> Result<SyncRun> {
        self.inner
            .read()
            .runs
            .get(&id)
            .cloned()
            .ok_or_else(|| SyncError::not_found(Entity::SyncRun, id))
    }

    async fn save_run(&self, run: &SyncRun) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.runs.get_mut(&run.id) {
            Some(slot) => {
                *slot = run.clone();
                Ok(())
            }
            None => Err(SyncError::not_found(Entity::SyncRun, run.id)),
        }
    }

    async fn runs_for_sync(&self, sync_id: SyncId) -> Result<Vec<SyncRun>> {
        Ok(self
            .inner
            .read()
            .runs
            .values()
            .filter(|r| r.sync_id == sync_id && r.discarded_at.is_none())
            .cloned()
            .collect())
    }

    async fn discard_runs(&self, sync_id: SyncId, at: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.write();
        let mut count = 0;
        for run in inner
            .runs
            .values_mut()
            .filter(|r| r.sync_id == sync_id && r.discarded_at.is_none())
        {
            run.discarded_at = Some(at);
            count += 1;
        }
        Ok(count)
    }

    async fn checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.syncs.contains_key(&checkpoint.sync_id) {
            return Err(SyncError::not_found(Entity::Sync, checkpoint.sync_id));
        }
        let run = inner
            .runs
            .get_mut(&checkpoint.run_id)
            .ok_or_else(|| SyncError::not_found(Entity::SyncRun, checkpoint.run_id))?;
        run.current_offset = checkpoint.current_offset;
        run.total_query_rows = checkpoint.total_query_rows;
        run.skipped_rows = checkpoint.skipped_rows;
        run.rejected_rows = checkpoint.rejected_rows;

        if let Some(cursor) = &checkpoint.cursor {
            if let Some(sync) = inner.syncs.get_mut(&checkpoint.sync_id) {
                sync.current_cursor_field = Some(cursor.clone());
            }
        }
        Ok(())
    }

    async fn find_record(&self, sync_id: SyncId, primary_key: &str) -> Result<Option<SyncRecord>> {
        Ok(self
            .inner
            .read()
            .records
            .get(&(sync_id, primary_key.to_string()))
            .cloned())
    }

    async fn upsert_record(&self, record: SyncRecord) -> Result<()> {
        self.inner
            .write()
            .records
            .insert((record.sync_id, record.primary_key.clone()), record);
        Ok(())
    }

    async fn live_primary_keys(&self, sync_id: SyncId) -> Result<HashSet<String>> {
        Ok(self
            .inner
            .read()
            .records
            .values()
            .filter(|r| r.sync_id == sync_id && r.is_live())
            .map(|r| r.primary_key.clone())
            .collect())
    }

    async fn pending_records(&self, run_id: RunId) -> Result<Vec<SyncRecord>> {
        let inner = self.inner.read();
        let mut records: Vec<SyncRecord> = inner
            .records
            .values()
            .filter(|r| r.sync_run_id == run_id && r.status == RecordStatus::Pending)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.primary_key.cmp(&b.primary_key));
        Ok(records)
    }

    async fn update_record_statuses(
        &self,
        sync_id: SyncId,
        updates: &[RecordStatusUpdate],
    ) -> Result<()> {
        let mut inner = self.inner.write();
        for update in updates {
            if let Some(record) = inner
                .records
                .get_mut(&(sync_id, update.primary_key.clone()))
            {
                record.status = update.status;
                if update.logs.is_some() {
                    record.logs = update.logs.clone();
                }
            }
        }
        Ok(())
    }
}
