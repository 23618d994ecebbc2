//! Domain module - Core entities of a bulk clean-data run
//!
//! Targets, run configuration, per-item outcomes, progress counters and the
//! persisted run log record. Nothing in here performs I/O.
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod target;
pub mod selection;
pub mod run;
pub mod progress;
pub mod run_log;
pub mod services;
pub mod repositories;

// Re-export commonly used items for convenience
pub use target::{Target, TargetKind};
pub use selection::{Selection, SelectionError};
pub use run::{
    BatchMetadata, BatchResult, BatchStatus, FailedItem, RunConfigError, RunConfiguration,
    RunMode, RunPhase, RunScope,
};
pub use progress::{ProgressSnapshot, RunProgress};
pub use run_log::RunLogEntry;
pub use services::{
    EndpointError, ProductCleanOutcome, ProductCleaningService, StoreCleanOutcome,
    StoreCleaningService,
};
pub use repositories::{RunLogRepository, RunLogSink};
