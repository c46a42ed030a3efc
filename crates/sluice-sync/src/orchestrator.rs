//! In-process orchestrator
//!
//! Keeps schedules in memory and maps workflow cancellation onto
//! [`CancellationToken`]s. Heartbeats report a pending cancellation back to
//! the extractor at the next batch boundary.

use crate::error::Result;
use crate::traits::{
    sync_workflow_id, termination_request_id, Heartbeat, HeartbeatAck, Orchestrator,
    ScheduleRequest,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct LocalOrchestrator {
    schedules: Mutex<HashMap<String, ScheduleRequest>>,
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl LocalOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when the workflow is terminated
    pub fn token(&self, workflow_id: &str) -> CancellationToken {
        self.tokens
            .lock()
            .entry(workflow_id.to_string())
            .or_default()
            .clone()
    }

    pub fn schedule_for(&self, workflow_id: &str) -> Option<ScheduleRequest> {
        self.schedules.lock().get(workflow_id).cloned()
    }
}

#[async_trait]
impl Orchestrator for LocalOrchestrator {
    async fn schedule(&self, request: &ScheduleRequest) -> Result<()> {
        info!(
            workflow_id = %request.workflow_id,
            sync_id = request.sync_id,
            cron = %request.cron,
            "Scheduling workflow"
        );
        self.schedules
            .lock()
            .insert(request.workflow_id.clone(), request.clone());

        let mut tokens = self.tokens.lock();
        if tokens
            .get(&request.workflow_id)
            .is_some_and(CancellationToken::is_cancelled)
        {
            tokens.insert(request.workflow_id.clone(), CancellationToken::new());
        }
        Ok(())
    }

    async fn cancel(&self, workflow_id: &str) -> Result<()> {
        info!(
            workflow_id,
            request_id = %termination_request_id(workflow_id),
            "Terminating workflow"
        );
        self.schedules.lock().remove(workflow_id);
        self.token(workflow_id).cancel();
        Ok(())
    }

    async fn heartbeat(&self, heartbeat: &Heartbeat) -> Result<HeartbeatAck> {
        debug!(
            run_id = heartbeat.run_id,
            sync_id = heartbeat.sync_id,
            offset = heartbeat.current_offset,
            rows = heartbeat.total_query_rows,
            skipped = heartbeat.skipped_rows,
            "Heartbeat"
        );
        let workflow_id = sync_workflow_id(heartbeat.sync_id);
        let cancelled = self
            .tokens
            .lock()
            .get(&workflow_id)
            .is_some_and(CancellationToken::is_cancelled);
        Ok(HeartbeatAck {
            cancel_requested: cancelled,
        })
    }
}
