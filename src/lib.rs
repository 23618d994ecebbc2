//! Catalog Bulk Ops - batch orchestration for store and product clean-data runs
//!
//! Takes a set of stores or products, cleans them against the backend in
//! small sequential batches, tracks live progress with an ETA, supports
//! cancelling mid-run, records per-item outcomes in an activity timeline and
//! retries only what failed.

// Module declarations
pub mod domain;
pub mod application;
pub mod infrastructure;

pub use application::{BulkOrchestrator, OrchestratorError, RunOutcome, RunReport, StartOutcome};
pub use domain::{RunConfiguration, RunMode, Selection, Target, TargetKind};
pub use infrastructure::AppConfig;
