//! Collaborator interfaces of the sync engine
//!
//! - `SourceConnector` - bounded reads from a queryable source
//! - `DestinationConnector` - upsert/delete writes to a destination API
//! - `Orchestrator` - workflow scheduling, cancellation and heartbeats
//! - `SyncStore` - persistence of syncs, runs and records
//! - `ErrorReporter` - error reporting and run-scoped logging
//! - `EmbeddingGenerator` - text embeddings for `vector` mappings

pub mod destination;
pub mod embedding;
pub mod orchestrator;
pub mod reporter;
pub mod source;
pub mod store;

pub use destination::{
    DestinationCapabilities, DestinationConnector, WriteOutcome, WriteRecord, WriteRequest,
};
pub use embedding::EmbeddingGenerator;
pub use orchestrator::{
    sync_workflow_id, termination_request_id, Heartbeat, HeartbeatAck, Orchestrator,
    ScheduleRequest,
};
pub use reporter::{ErrorReporter, ReportContext, TracingReporter};
pub use source::{ReadRequest, SourceConnector};
pub use store::{Checkpoint, RecordStatusUpdate, SyncStore};
