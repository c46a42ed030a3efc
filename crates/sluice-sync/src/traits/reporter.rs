//! Error reporting and run-scoped logging

use crate::model::{LogLevel, RunId, SyncId};
use std::error::Error;
use tracing::{debug, error, info, warn};

/// Where an error or log line came from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportContext {
    pub sync_id: Option<SyncId>,
    pub run_id: Option<RunId>,
    pub stream: Option<String>,
    pub stage: Option<&'static str>,
    pub primary_key: Option<String>,
}

impl ReportContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync(mut self, id: SyncId) -> Self {
        self.sync_id = Some(id);
        self
    }

    pub fn run(mut self, id: RunId) -> Self {
        self.run_id = Some(id);
        self
    }

    pub fn stream(mut self, name: impl Into<String>) -> Self {
        self.stream = Some(name.into());
        self
    }

    pub fn stage(mut self, stage: &'static str) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = Some(key.into());
        self
    }
}

pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &(dyn Error + Send + Sync + 'static), context: &ReportContext);

    fn log(&self, level: LogLevel, message: &str, context: &ReportContext);
}

/// Reports through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, err: &(dyn Error + Send + Sync + 'static), ctx: &ReportContext) {
        error!(
            sync_id = ctx.sync_id,
            run_id = ctx.run_id,
            stream = ctx.stream.as_deref(),
            stage = ctx.stage,
            primary_key = ctx.primary_key.as_deref(),
            "{err}"
        );
    }

    fn log(&self, level: LogLevel, message: &str, ctx: &ReportContext) {
        match level {
            LogLevel::Debug => debug!(sync_id = ctx.sync_id, run_id = ctx.run_id, "{message}"),
            LogLevel::Info => info!(sync_id = ctx.sync_id, run_id = ctx.run_id, "{message}"),
            LogLevel::Warn => warn!(sync_id = ctx.sync_id, run_id = ctx.run_id, "{message}"),
            LogLevel::Error => error!(sync_id = ctx.sync_id, run_id = ctx.run_id, "{message}"),
        }
    }
}
