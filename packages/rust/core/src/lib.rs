//! Ingestion orchestration for PolicyHarvest.
//!
//! This crate ties together source adapters, query expansion, the batch
//! executor, storage and the graphs into the per-source ingestion action
//! ([`IngestSourceAction`]) and the workflow scaffolding that sequences it.

pub mod action;
pub mod diagnostics;
pub mod discovery;
pub mod executor;
pub mod run_log;
pub mod workflow;

pub use action::{
    ActionOutcome, EtlEmission, IngestOptions, IngestParams, IngestServices, IngestSourceAction,
};
pub use diagnostics::FailureDiagnostics;
pub use discovery::{DiscoveryConfig, DiscoveryOutcome, discover_all};
pub use executor::{
    BatchCounters, BatchExecutor, BatchItem, BatchOutcome, BatchProgress, ExecutorConfig,
    RecordOutcome,
};
pub use run_log::{LogLevel, RunLogger, TracingRunLogger, log_quietly};
pub use workflow::{Action, ActionRegistry, StepContext, StepOutput};
