//! Workflow orchestrator interface

use crate::error::Result;
use crate::model::{RunId, SyncId};
use async_trait::async_trait;
use serde_json::Value;

/// Request to run a sync on a cron schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub workflow_id: String,
    pub sync_id: SyncId,
    pub cron: String,
}

/// Progress signal sent after every checkpointed batch
#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub run_id: RunId,
    pub sync_id: SyncId,
    pub current_offset: u64,
    pub total_query_rows: u64,
    pub skipped_rows: u64,
    pub initial_cursor: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatAck {
    pub cancel_requested: bool,
}

impl HeartbeatAck {
    pub fn proceed() -> Self {
        Self::default()
    }

    pub fn cancel() -> Self {
        Self {
            cancel_requested: true,
        }
    }
}

/// Workflow id under which a sync is scheduled
pub fn sync_workflow_id(sync_id: SyncId) -> String {
    format!("sync-{sync_id}")
}

/// Request id used when terminating a workflow
pub fn termination_request_id(workflow_id: &str) -> String {
    format!("terminate-{workflow_id}")
}

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Create or replace the schedule of a workflow
    async fn schedule(&self, request: &ScheduleRequest) -> Result<()>;

    /// Terminate a workflow and any execution in flight
    async fn cancel(&self, workflow_id: &str) -> Result<()>;

    async fn heartbeat(&self, heartbeat: &Heartbeat) -> Result<HeartbeatAck>;
}
