//! Application layer - Run orchestration
//!
//! Coordinates the domain types into a bulk run: resolve targets, dispatch
//! them in sequential batches, track progress, log completed runs and retry
//! the failed subset.

pub mod resolver;
pub mod cancellation;
pub mod progress_tracker;
pub mod scheduler;
pub mod run_logger;
pub mod retry;
pub mod events;
pub mod orchestrator;

// Re-export commonly used items
pub use resolver::TargetResolver;
pub use cancellation::CancellationController;
pub use progress_tracker::ProgressTracker;
pub use scheduler::{BatchScheduler, SchedulerError, SchedulerOutcome};
pub use run_logger::{PersistenceError, RunLogger};
pub use retry::RetryCoordinator;
pub use events::{EventEmitter, Notice, OrchestratorEvent};
pub use orchestrator::{
    BulkOrchestrator, OrchestratorError, OrchestratorView, RunOutcome, RunReport, StartOutcome,
};
