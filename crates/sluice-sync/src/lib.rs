//! sluice-sync - reverse-ETL sync execution engine
//!
//! Moves rows from a queryable source into a destination API: rows are read
//! incrementally, mapped into destination payloads, fingerprinted so that
//! unchanged rows are skipped, and written with upsert semantics.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ReadRequest   ┌───────────────────────┐
//! │ SourceConn.  │◄────────────────│ IncrementalExtractor  │──► SyncStore
//! └──────────────┘                 │  BatchQueryRunner     │    (pending records,
//!                                  │  RecordTransformer    │     checkpoints)
//!                                  └───────────┬───────────┘
//!                                              │ run queued
//! ┌──────────────┐   WriteRequest  ┌───────────▼───────────┐
//! │ Destination  │◄────────────────│ Loader                │──► SyncStore
//! └──────────────┘                 └───────────────────────┘    (statuses, logs)
//!
//! SyncLifecycle: create / update / enable / disable / discard / trigger_run
//!                ──► Orchestrator (schedule, terminate, heartbeat)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use sluice_sync::prelude::*;
//!
//! let store = Arc::new(MemoryStore::new());
//! let orchestrator = Arc::new(LocalOrchestrator::new());
//! let reporter = Arc::new(TracingReporter);
//!
//! let lifecycle = SyncLifecycle::new(store.clone(), orchestrator.clone(), reporter.clone());
//! let sync = lifecycle.create(definition, &catalog, destination.capabilities()).await?;
//! let run = lifecycle.trigger_run(sync.id).await?;
//!
//! IncrementalExtractor::new(store.clone(), orchestrator, reporter.clone(), transformer)
//!     .read(run.id, source)
//!     .await?;
//! Loader::new(store, reporter).load(run.id, destination).await?;
//! ```

pub mod error;
pub mod types;

pub mod config;
pub mod model;

pub mod fingerprint;
pub mod mapping;
pub mod template;

pub mod traits;

pub mod orchestrator;
pub mod store;

pub mod batch;
pub mod extractor;
pub mod lifecycle;
pub mod loader;
pub mod schema;

pub mod connectors;
pub mod rate_limiter;
pub mod retry;

pub mod testing;

pub use error::{Result, SyncError, TransformError, TransformResult};
pub use types::{Row, SensitiveString};

pub use config::JobConfig;
pub use extractor::{ExtractOutcome, ExtractStats, ExtractorConfig, IncrementalExtractor};
pub use lifecycle::SyncLifecycle;
pub use loader::{LoadOutcome, LoadStats, Loader};
pub use mapping::{MappingConfig, MappingEntry, RecordTransformer};
pub use model::{
    Catalog, RecordAction, RecordStatus, RunStatus, SyncDefinition, SyncRecord, SyncRun,
    SyncStatus,
};
pub use orchestrator::LocalOrchestrator;
pub use schema::{infer_model_schema, ColumnType, ModelSchema};
pub use store::MemoryStore;

pub mod prelude {
    pub use crate::connectors::{AirtableConfig, AirtableDestination, ProviderEmbeddingGenerator};
    pub use crate::error::{Result, SyncError};
    pub use crate::extractor::{ExtractOutcome, ExtractorConfig, IncrementalExtractor};
    pub use crate::lifecycle::SyncLifecycle;
    pub use crate::loader::{LoadOutcome, Loader};
    pub use crate::mapping::{MappingConfig, RecordTransformer};
    pub use crate::model::{Catalog, SyncDefinition, SyncRun};
    pub use crate::orchestrator::LocalOrchestrator;
    pub use crate::store::MemoryStore;
    pub use crate::traits::{
        DestinationConnector, ErrorReporter, Orchestrator, SourceConnector, SyncStore,
        TracingReporter,
    };
    pub use std::sync::Arc;
}
