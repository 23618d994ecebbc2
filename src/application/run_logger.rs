//! Builds and persists the activity timeline entry of a completed run

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{BatchResult, RunConfiguration, RunLogEntry, RunLogSink};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// The entry was built but could not be stored; it is kept so the caller
    /// can still show the summary.
    #[error("Failed to persist run log {}: {message}", entry.id)]
    WriteFailed {
        entry: Box<RunLogEntry>,
        message: String,
    },
}

impl PersistenceError {
    pub fn entry(&self) -> &RunLogEntry {
        match self {
            Self::WriteFailed { entry, .. } => entry,
        }
    }
}

pub struct RunLogger {
    sink: Arc<dyn RunLogSink>,
}

impl RunLogger {
    pub fn new(sink: Arc<dyn RunLogSink>) -> Self {
        Self { sink }
    }

    /// Summarize and persist one finished run.
    ///
    /// Call only on natural completion; cancelled runs are never logged.
    pub async fn log(
        &self,
        results: &[BatchResult],
        config: &RunConfiguration,
        elapsed_ms: u64,
    ) -> Result<RunLogEntry, PersistenceError> {
        let entry = RunLogEntry::from_results(config.mode(), results, elapsed_ms);

        match self.sink.persist(&entry).await {
            Ok(()) => {
                info!("📝 Run log {} saved: {}", entry.id, entry.message);
                Ok(entry)
            }
            Err(e) => {
                warn!("⚠️ Failed to save run log {}: {:#}", entry.id, e);
                Err(PersistenceError::WriteFailed {
                    message: e.to_string(),
                    entry: Box::new(entry),
                })
            }
        }
    }
}
