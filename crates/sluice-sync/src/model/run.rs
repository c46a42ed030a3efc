//! Sync runs and their status machine

use super::{RunId, SyncId};
use crate::error::{Entity, Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Started,
    Querying,
    Queued,
    InProgress,
    Success,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    Start,
    Query,
    Queue,
    Progress,
    Complete,
    Abort,
    Cancel,
}

impl RunEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::Start => "start",
            RunEvent::Query => "query",
            RunEvent::Queue => "queue",
            RunEvent::Progress => "progress",
            RunEvent::Complete => "complete",
            RunEvent::Abort => "abort",
            RunEvent::Cancel => "cancel",
        }
    }
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failed | RunStatus::Canceled
        )
    }

    pub fn next(self, event: RunEvent) -> Option<RunStatus> {
        use RunStatus::*;
        match (event, self) {
            (RunEvent::Start, Pending) => Some(Started),
            (RunEvent::Query, Pending | Started) => Some(Querying),
            (RunEvent::Queue, Querying) => Some(Queued),
            (RunEvent::Progress, Queued | InProgress) => Some(InProgress),
            (RunEvent::Complete, InProgress) => Some(Success),
            (RunEvent::Abort, s) if !s.is_terminal() => Some(Failed),
            (RunEvent::Cancel, s) if !s.is_terminal() => Some(Canceled),
            _ => None,
        }
    }

    pub fn may(self, event: RunEvent) -> bool {
        self.next(event).is_some()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Started => "started",
            RunStatus::Querying => "querying",
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Severity of a run log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A request/response pair recorded for observability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLog {
    pub level: LogLevel,
    pub request: serde_json::Value,
    pub response: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl RequestLog {
    pub fn new(level: LogLevel, request: serde_json::Value, response: serde_json::Value) -> Self {
        Self {
            level,
            request,
            response,
            at: Utc::now(),
        }
    }
}

/// One execution attempt of a sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: RunId,
    pub sync_id: SyncId,
    pub status: RunStatus,
    /// Offset of the next batch to read
    pub current_offset: u64,
    /// Cursor value the run started from
    pub current_cursor_field: Option<serde_json::Value>,
    pub total_query_rows: u64,
    pub skipped_rows: u64,
    /// Rows without a usable primary key
    pub rejected_rows: u64,
    /// Records the destination accepted
    pub successful_rows: u64,
    /// Records the destination rejected
    pub failed_rows: u64,
    /// Records handed to the destination
    pub total_rows: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<RequestLog>,
    #[serde(default)]
    pub discarded_at: Option<DateTime<Utc>>,
}

impl SyncRun {
    pub fn new(
        id: RunId,
        sync_id: SyncId,
        current_offset: u64,
        cursor: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id,
            sync_id,
            status: RunStatus::Pending,
            current_offset,
            current_cursor_field: cursor,
            total_query_rows: 0,
            skipped_rows: 0,
            rejected_rows: 0,
            successful_rows: 0,
            failed_rows: 0,
            total_rows: 0,
            started_at: None,
            finished_at: None,
            error: None,
            logs: Vec::new(),
            discarded_at: None,
        }
    }

    /// A fresh run may begin extraction
    pub fn may_query(&self) -> bool {
        self.status.may(RunEvent::Query)
    }

    /// Apply a status event; the status is untouched on error
    pub fn apply(&mut self, event: RunEvent) -> Result<RunStatus> {
        let next = self
            .status
            .next(event)
            .ok_or_else(|| SyncError::transition(Entity::SyncRun, self.status, event.name()))?;
        self.status = next;
        match next {
            RunStatus::Querying if self.started_at.is_none() => self.started_at = Some(Utc::now()),
            s if s.is_terminal() => self.finished_at = Some(Utc::now()),
            _ => {}
        }
        Ok(next)
    }
}
