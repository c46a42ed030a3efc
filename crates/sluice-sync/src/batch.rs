//! Bounded, resumable reads against a source
//!
//! The runner walks the model query in pages of `limit` rows. With a cursor
//! column every read is filtered to `cursor >= snapshot` (the value the run
//! started from) and the highest cursor seen so far travels with each batch,
//! so a checkpoint after any batch can resume the next run.

use crate::error::{Result, SyncError};
use crate::model::{PagingStrategy, SyncDefinition, SyncRun};
use crate::traits::{ReadRequest, SourceConnector};
use crate::types::Row;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Paging parameters resolved for one run
#[derive(Debug, Clone, PartialEq)]
pub struct BatchParams {
    pub query: String,
    pub primary_key: Option<String>,
    pub strategy: PagingStrategy,
    pub start_offset: u64,
    pub limit: u64,
    pub offset_param: Option<String>,
    pub limit_param: Option<String>,
    pub cursor_field: Option<String>,
    pub cursor_value: Option<Value>,
}

impl BatchParams {
    /// Parameters for `run` of `sync`; `default_limit` applies when the sync
    /// has no increment strategy limit
    pub fn for_run(sync: &SyncDefinition, run: &SyncRun, default_limit: u64) -> Self {
        let strategy = sync.increment_strategy.clone().unwrap_or_default();
        let start_offset = if run.current_offset > 0 {
            run.current_offset
        } else {
            strategy.start_offset()
        };
        let cursor_field = sync.active_cursor_field().map(str::to_string);
        let cursor_value = cursor_field
            .as_ref()
            .and(run.current_cursor_field.clone());

        Self {
            query: sync.model.query.clone(),
            primary_key: sync.source_primary_key().map(str::to_string),
            strategy: strategy.strategy,
            start_offset,
            limit: strategy.limit_or(default_limit),
            offset_param: strategy.offset_param,
            limit_param: strategy.limit_param,
            cursor_field,
            cursor_value,
        }
    }
}

/// One page of source rows
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub records: Vec<Row>,
    /// Offset the following read starts from
    pub next_offset: u64,
    /// Highest cursor value observed so far
    pub cursor_value: Option<Value>,
}

pub struct BatchQueryRunner {
    source: Arc<dyn SourceConnector>,
    params: BatchParams,
    offset: u64,
    max_cursor: Option<Value>,
    exhausted: bool,
}

impl BatchQueryRunner {
    pub fn new(source: Arc<dyn SourceConnector>, params: BatchParams) -> Result<Self> {
        if params.limit == 0 {
            return Err(SyncError::validation("batch limit must be greater than 0"));
        }
        Ok(Self {
            source,
            offset: params.start_offset,
            max_cursor: None,
            exhausted: false,
            params,
        })
    }

    /// Offset of the next read
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next batch; `None` once the source is exhausted
    pub async fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.exhausted {
            return Ok(None);
        }

        let request = ReadRequest {
            query: self.params.query.clone(),
            primary_key: self.params.primary_key.clone(),
            offset: self.offset,
            limit: self.params.limit,
            strategy: self.params.strategy,
            offset_param: self.params.offset_param.clone(),
            limit_param: self.params.limit_param.clone(),
            cursor_field: self.params.cursor_field.clone(),
            cursor_value: self.params.cursor_value.clone(),
        };
        let records = self.source.read(&request).await.map_err(|e| {
            SyncError::batch_io(format!("read at offset {}", self.offset), e.to_string())
        })?;

        debug!(
            source = self.source.name(),
            offset = self.offset,
            rows = records.len(),
            "Read batch"
        );

        if records.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        if (records.len() as u64) < self.params.limit {
            self.exhausted = true;
        }

        if let Some(field) = &self.params.cursor_field {
            for value in records.iter().filter_map(|row| row.get(field)) {
                if value.is_null() {
                    continue;
                }
                let higher = match &self.max_cursor {
                    None => true,
                    Some(max) => compare_cursor(value, max) == Some(Ordering::Greater),
                };
                if higher {
                    self.max_cursor = Some(value.clone());
                }
            }
        }

        self.offset = match self.params.strategy {
            PagingStrategy::Offset => self.offset + self.params.limit,
            PagingStrategy::Page => self.offset + 1,
        };

        Ok(Some(Batch {
            records,
            next_offset: self.offset,
            cursor_value: self.max_cursor.clone(),
        }))
    }
}

/// Order two cursor values: numbers numerically, strings lexically
///
/// ISO-8601 timestamps order correctly as strings. Mixed kinds don't compare.
pub fn compare_cursor(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
