//! Persistent entities of the sync engine
//!
//! - [`SyncDefinition`]: durable source→destination job configuration
//! - [`SyncRun`]: one execution attempt with progress counters
//! - [`SyncRecord`]: per-row lineage used for dedup and deletion detection
//! - [`Catalog`]: streams discovered at a connector

pub mod catalog;
pub mod record;
pub mod run;
pub mod sync;

pub use catalog::{Catalog, CheckDetail, CheckResult, Stream};
pub use record::{RecordAction, RecordStatus, SyncRecord};
pub use run::{LogLevel, RequestLog, RunEvent, RunStatus, SyncRun};
pub use sync::{
    DestinationSettings, IncrementStrategyConfig, IntervalUnit, Model, PagingStrategy,
    PrimaryKeyMapping, Schedule, SyncDefinition, SyncEvent, SyncMode, SyncStatus,
};

/// Identifier of a sync definition
pub type SyncId = u64;

/// Identifier of a sync run
pub type RunId = u64;
