//! Repository interfaces for the activity timeline

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::run_log::RunLogEntry;

/// Write side: anything that can durably accept a finished run's log
#[async_trait]
pub trait RunLogSink: Send + Sync {
    async fn persist(&self, entry: &RunLogEntry) -> Result<()>;
}

/// Read side used by the activity timeline
#[async_trait]
pub trait RunLogRepository: RunLogSink {
    async fn get_entry(&self, id: &str) -> Result<Option<RunLogEntry>>;
    async fn recent_entries(&self, limit: u32) -> Result<Vec<RunLogEntry>>;
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}
