//! Sync lifecycle service
//!
//! Commits status changes to the store first, then tells the orchestrator.
//! Orchestrator calls are best-effort: a failure is logged and reported but
//! never rolls back the committed state.

use crate::error::{Entity, Result, SyncError};
use crate::model::{Catalog, SyncDefinition, SyncEvent, SyncId, SyncRun, SyncStatus};
use crate::traits::{
    DestinationCapabilities, ErrorReporter, Orchestrator, ReportContext, ScheduleRequest,
    SyncStore,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// Apply `event` to sync `id` and persist it
pub(crate) async fn transition_sync(
    store: &dyn SyncStore,
    id: SyncId,
    event: SyncEvent,
) -> Result<SyncDefinition> {
    let mut sync = store.get_sync(id).await?;
    let from = sync.status;
    sync.apply(event)?;
    let sync = store.save_sync(&sync).await?;
    info!(sync_id = id, from = %from, to = %sync.status, event = event.name(), "Sync transitioned");
    Ok(sync)
}

pub struct SyncLifecycle {
    store: Arc<dyn SyncStore>,
    orchestrator: Arc<dyn Orchestrator>,
    reporter: Arc<dyn ErrorReporter>,
}

impl SyncLifecycle {
    pub fn new(
        store: Arc<dyn SyncStore>,
        orchestrator: Arc<dyn Orchestrator>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            reporter,
        }
    }

    /// Validate against the destination catalog, persist, then schedule
    pub async fn create(
        &self,
        sync: SyncDefinition,
        catalog: &Catalog,
        capabilities: DestinationCapabilities,
    ) -> Result<SyncDefinition> {
        sync.validate(catalog, capabilities.requires_upsert_identity)?;
        let sync = self.store.save_sync(&sync).await?;
        info!(sync_id = sync.id, stream = %sync.stream_name, "Sync created");
        self.schedule(&sync).await;
        Ok(sync)
    }

    /// Persist changes to an existing sync
    ///
    /// The definition is revalidated against the destination catalog. A
    /// status change must be a legal transition from the stored status.
    /// The workflow is rescheduled when the schedule changed or the sync went
    /// back to `pending`; it is terminated when the sync becomes disabled or
    /// switches to a manual schedule.
    pub async fn update(
        &self,
        sync: SyncDefinition,
        catalog: &Catalog,
        capabilities: DestinationCapabilities,
    ) -> Result<SyncDefinition> {
        let previous = self.store.get_sync(sync.id).await?;
        if previous.is_discarded() {
            return Err(SyncError::conflict(format!("sync {} is discarded", sync.id)));
        }
        sync.validate(catalog, capabilities.requires_upsert_identity)?;
        if sync.status != previous.status {
            let event = event_towards(sync.status);
            if previous.status.next(event) != Some(sync.status) {
                return Err(SyncError::transition(
                    Entity::Sync,
                    previous.status,
                    event.name(),
                ));
            }
        }
        let sync = self.store.save_sync(&sync).await?;

        let schedule_changed = previous.schedule != sync.schedule;
        let status_changed = previous.status != sync.status;
        if status_changed && sync.status == SyncStatus::Disabled {
            self.terminate(&sync).await;
        } else if sync.schedule.is_manual() {
            if schedule_changed {
                self.terminate(&sync).await;
            }
        } else if schedule_changed || (status_changed && sync.status == SyncStatus::Pending) {
            self.schedule(&sync).await;
        }
        Ok(sync)
    }

    pub async fn disable(&self, id: SyncId) -> Result<SyncDefinition> {
        let sync = transition_sync(self.store.as_ref(), id, SyncEvent::Disable).await?;
        self.terminate(&sync).await;
        Ok(sync)
    }

    pub async fn enable(&self, id: SyncId) -> Result<SyncDefinition> {
        let sync = transition_sync(self.store.as_ref(), id, SyncEvent::Enable).await?;
        self.schedule(&sync).await;
        Ok(sync)
    }

    /// Soft-delete the sync and its runs
    pub async fn discard(&self, id: SyncId) -> Result<SyncDefinition> {
        let mut sync = self.store.get_sync(id).await?;
        if sync.is_discarded() {
            return Ok(sync);
        }
        let now = Utc::now();
        sync.discarded_at = Some(now);
        let sync = self.store.save_sync(&sync).await?;
        let runs = self.store.discard_runs(id, now).await?;
        info!(sync_id = id, runs, "Sync discarded");
        self.terminate(&sync).await;
        Ok(sync)
    }

    /// Create a pending run starting from the sync's committed cursor
    pub async fn trigger_run(&self, id: SyncId) -> Result<SyncRun> {
        let sync = self.store.get_sync(id).await?;
        if sync.is_discarded() {
            return Err(SyncError::conflict(format!("sync {id} is discarded")));
        }
        if sync.status == SyncStatus::Disabled {
            return Err(SyncError::conflict(format!("sync {id} is disabled")));
        }
        if let Some(run) = self.active_runs(id).await?.first() {
            return Err(SyncError::conflict(format!(
                "sync {id} already has run {} in status '{}'",
                run.id, run.status
            )));
        }

        let cursor = sync
            .active_cursor_field()
            .and(sync.current_cursor_field.clone());
        let run = self.store.insert_run(SyncRun::new(0, id, 0, cursor)).await?;
        info!(sync_id = id, run_id = run.id, "Run triggered");
        Ok(run)
    }

    /// Mark the sync healthy or failed after a write pass
    pub async fn record_outcome(&self, id: SyncId, ok: bool) -> Result<SyncDefinition> {
        let event = if ok { SyncEvent::Complete } else { SyncEvent::Fail };
        transition_sync(self.store.as_ref(), id, event).await
    }

    /// Runs of a sync that have not finished
    pub async fn active_runs(&self, id: SyncId) -> Result<Vec<SyncRun>> {
        Ok(self
            .store
            .runs_for_sync(id)
            .await?
            .into_iter()
            .filter(|r| !r.status.is_terminal())
            .collect())
    }

    async fn schedule(&self, sync: &SyncDefinition) {
        let Some(cron) = sync.schedule.cron_expression() else {
            return;
        };
        let request = ScheduleRequest {
            workflow_id: sync.workflow_id(),
            sync_id: sync.id,
            cron,
        };
        if let Err(err) = self.orchestrator.schedule(&request).await {
            warn!(sync_id = sync.id, error = %err, "Scheduling failed");
            self.reporter.report(
                &err,
                &ReportContext::new().sync(sync.id).stage("schedule"),
            );
        }
    }

    async fn terminate(&self, sync: &SyncDefinition) {
        if let Err(err) = self.orchestrator.cancel(&sync.workflow_id()).await {
            warn!(sync_id = sync.id, error = %err, "Workflow termination failed");
            self.reporter.report(
                &err,
                &ReportContext::new().sync(sync.id).stage("terminate"),
            );
        }
    }
}

/// The event whose transition ends in `status`
fn event_towards(status: SyncStatus) -> SyncEvent {
    match status {
        SyncStatus::Pending => SyncEvent::Enable,
        SyncStatus::Healthy => SyncEvent::Complete,
        SyncStatus::Failed => SyncEvent::Fail,
        SyncStatus::Disabled => SyncEvent::Disable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunEvent, RunStatus, Schedule, Stream};
    use crate::store::MemoryStore;
    use crate::testing::{RecordingOrchestrator, RecordingReporter};
    use serde_json::json;

    struct Harness {
        store: Arc<MemoryStore>,
        orchestrator: Arc<RecordingOrchestrator>,
        reporter: Arc<RecordingReporter>,
        lifecycle: SyncLifecycle,
    }

    fn harness_with(orchestrator: RecordingOrchestrator) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Arc::new(orchestrator);
        let reporter = Arc::new(RecordingReporter::new());
        let lifecycle = SyncLifecycle::new(store.clone(), orchestrator.clone(), reporter.clone());
        Harness {
            store,
            orchestrator,
            reporter,
            lifecycle,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingOrchestrator::new())
    }

    fn definition(schedule: &str) -> SyncDefinition {
        serde_yaml::from_str(&format!(
            r#"
model: {{name: orders, query: SELECT * FROM orders, primary_key: id}}
stream_name: Sales/orders
cursor_field: updated_at
current_cursor_field: "2024-01-01"
mapping: {{id: id}}
{schedule}
"#
        ))
        .unwrap()
    }

    fn catalog() -> Catalog {
        Catalog::new().add_stream(Stream::new("Sales/orders", json!({})))
    }

    fn caps() -> DestinationCapabilities {
        DestinationCapabilities {
            requires_upsert_identity: true,
        }
    }

    #[tokio::test]
    async fn test_create_schedules_non_manual() {
        let h = harness();
        let sync = h
            .lifecycle
            .create(
                definition("schedule: {type: interval, every: 2, unit: hours}"),
                &catalog(),
                caps(),
            )
            .await
            .unwrap();
        assert_eq!(sync.id, 1);

        let schedules = h.orchestrator.schedules();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].workflow_id, "sync-1");
        assert_eq!(schedules[0].cron, "0 */2 * * *");
    }

    #[tokio::test]
    async fn test_create_manual_does_not_schedule() {
        let h = harness();
        h.lifecycle
            .create(definition(""), &catalog(), caps())
            .await
            .unwrap();
        assert!(h.orchestrator.schedules().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_stream() {
        let h = harness();
        let mut sync = definition("");
        sync.stream_name = "Sales/missing".into();
        let err = h.lifecycle.create(sync, &catalog(), caps()).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(h.store.get_sync(1).await.is_err());
    }

    #[tokio::test]
    async fn test_orchestrator_failure_keeps_committed_state() {
        let h = harness_with(RecordingOrchestrator::new().failing());
        let sync = h
            .lifecycle
            .create(
                definition("schedule: {type: cron, expression: '0 * * * *'}"),
                &catalog(),
                caps(),
            )
            .await
            .unwrap();

        let disabled = h.lifecycle.disable(sync.id).await.unwrap();
        assert_eq!(disabled.status, SyncStatus::Disabled);
        assert_eq!(
            h.store.get_sync(sync.id).await.unwrap().status,
            SyncStatus::Disabled
        );
        assert_eq!(h.reporter.errors().len(), 2);
    }

    #[tokio::test]
    async fn test_disable_enable() {
        let h = harness();
        let sync = h
            .lifecycle
            .create(
                definition("schedule: {type: interval, every: 5, unit: minutes}"),
                &catalog(),
                caps(),
            )
            .await
            .unwrap();

        h.lifecycle.disable(sync.id).await.unwrap();
        assert_eq!(h.orchestrator.cancels(), vec!["sync-1".to_string()]);

        let err = h.lifecycle.disable(sync.id).await.unwrap_err();
        assert_eq!(err.kind(), "state_transition");

        let enabled = h.lifecycle.enable(sync.id).await.unwrap();
        assert_eq!(enabled.status, SyncStatus::Pending);
        assert_eq!(h.orchestrator.schedules().len(), 2);

        assert!(h.lifecycle.enable(sync.id).await.is_err());
    }

    #[tokio::test]
    async fn test_update_reschedules_only_on_change() {
        let h = harness();
        let sync = h
            .lifecycle
            .create(
                definition("schedule: {type: interval, every: 1, unit: days}"),
                &catalog(),
                caps(),
            )
            .await
            .unwrap();
        assert_eq!(h.orchestrator.schedules().len(), 1);

        let mut renamed = sync.clone();
        renamed.name = "renamed".into();
        h.lifecycle.update(renamed, &catalog(), caps()).await.unwrap();
        assert_eq!(h.orchestrator.schedules().len(), 1);

        let mut rescheduled = sync.clone();
        rescheduled.schedule = Schedule::Cron {
            expression: "15 3 * * *".into(),
        };
        h.lifecycle
            .update(rescheduled.clone(), &catalog(), caps())
            .await
            .unwrap();
        let schedules = h.orchestrator.schedules();
        assert_eq!(schedules.len(), 2);
        assert_eq!(schedules[1].cron, "15 3 * * *");

        let mut manual = rescheduled;
        manual.schedule = Schedule::Manual;
        h.lifecycle.update(manual, &catalog(), caps()).await.unwrap();
        assert_eq!(h.orchestrator.cancels().len(), 1);
    }

    #[tokio::test]
    async fn test_update_rejects_illegal_status_change() {
        let h = harness();
        let sync = h
            .lifecycle
            .create(definition(""), &catalog(), caps())
            .await
            .unwrap();
        let disabled = h.lifecycle.disable(sync.id).await.unwrap();

        let mut revived = disabled.clone();
        revived.status = SyncStatus::Healthy;
        let err = h
            .lifecycle
            .update(revived, &catalog(), caps())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::StateTransition { .. }));
        assert_eq!(
            h.store.get_sync(sync.id).await.unwrap().status,
            SyncStatus::Disabled
        );

        let mut enabled = disabled;
        enabled.status = SyncStatus::Pending;
        let enabled = h
            .lifecycle
            .update(enabled, &catalog(), caps())
            .await
            .unwrap();
        assert_eq!(enabled.status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_to_disabled_terminates_workflow() {
        let h = harness();
        let sync = h
            .lifecycle
            .create(
                definition("schedule: {type: interval, every: 1, unit: hours}"),
                &catalog(),
                caps(),
            )
            .await
            .unwrap();

        let mut disabled = sync.clone();
        disabled.status = SyncStatus::Disabled;
        h.lifecycle
            .update(disabled, &catalog(), caps())
            .await
            .unwrap();
        assert_eq!(h.orchestrator.cancels(), vec!["sync-1".to_string()]);
        assert_eq!(h.orchestrator.schedules().len(), 1);
    }

    #[tokio::test]
    async fn test_update_rejects_unknown_stream() {
        let h = harness();
        let sync = h
            .lifecycle
            .create(definition(""), &catalog(), caps())
            .await
            .unwrap();

        let mut moved = sync.clone();
        moved.stream_name = "No/such".into();
        let err = h
            .lifecycle
            .update(moved, &catalog(), caps())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(
            h.store.get_sync(sync.id).await.unwrap().stream_name,
            "Sales/orders"
        );
    }

    #[tokio::test]
    async fn test_trigger_run_snapshots_cursor_and_rejects_concurrent() {
        let h = harness();
        let sync = h
            .lifecycle
            .create(definition(""), &catalog(), caps())
            .await
            .unwrap();

        let run = h.lifecycle.trigger_run(sync.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.current_cursor_field, Some(json!("2024-01-01")));

        let err = h.lifecycle.trigger_run(sync.id).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");
        assert_eq!(h.lifecycle.active_runs(sync.id).await.unwrap().len(), 1);

        let mut finished = h.store.get_run(run.id).await.unwrap();
        finished.apply(RunEvent::Cancel).unwrap();
        h.store.save_run(&finished).await.unwrap();
        assert!(h.lifecycle.trigger_run(sync.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_trigger_run_rejects_disabled_and_discarded() {
        let h = harness();
        let sync = h
            .lifecycle
            .create(definition(""), &catalog(), caps())
            .await
            .unwrap();
        h.lifecycle.disable(sync.id).await.unwrap();
        assert_eq!(
            h.lifecycle.trigger_run(sync.id).await.unwrap_err().kind(),
            "conflict"
        );

        h.lifecycle.enable(sync.id).await.unwrap();
        h.lifecycle.discard(sync.id).await.unwrap();
        assert_eq!(
            h.lifecycle.trigger_run(sync.id).await.unwrap_err().kind(),
            "conflict"
        );
    }

    #[tokio::test]
    async fn test_discard_cascades_to_runs() {
        let h = harness();
        let sync = h
            .lifecycle
            .create(definition(""), &catalog(), caps())
            .await
            .unwrap();
        h.lifecycle.trigger_run(sync.id).await.unwrap();

        let discarded = h.lifecycle.discard(sync.id).await.unwrap();
        assert!(discarded.is_discarded());
        assert!(h.store.runs_for_sync(sync.id).await.unwrap().is_empty());
        assert_eq!(h.orchestrator.cancels(), vec!["sync-1".to_string()]);
    }

    #[tokio::test]
    async fn test_record_outcome() {
        let h = harness();
        let sync = h
            .lifecycle
            .create(definition(""), &catalog(), caps())
            .await
            .unwrap();

        let failed = h.lifecycle.record_outcome(sync.id, false).await.unwrap();
        assert_eq!(failed.status, SyncStatus::Failed);
        let healthy = h.lifecycle.record_outcome(sync.id, true).await.unwrap();
        assert_eq!(healthy.status, SyncStatus::Healthy);
    }
}
