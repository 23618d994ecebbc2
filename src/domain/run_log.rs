//! Persisted summary of a completed run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run::{BatchResult, RunMode};

/// One activity timeline record, created once when a run completes.
///
/// `items_skipped` carries the error count; the column keeps the timeline's
/// historical name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub id: String,
    pub scope: String,
    pub items_processed: u32,
    pub items_updated: u32,
    pub items_skipped: u32,
    pub message: String,
    pub details: Vec<BatchResult>,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl RunLogEntry {
    pub fn from_results(mode: RunMode, results: &[BatchResult], elapsed_ms: u64) -> Self {
        let updated = results.iter().filter(|r| r.is_success()).count();
        let errors = results.len() - updated;

        Self {
            id: Uuid::new_v4().to_string(),
            scope: mode.scope_tag().to_string(),
            items_processed: results.len() as u32,
            items_updated: updated as u32,
            items_skipped: errors as u32,
            message: summary_message(mode, updated, errors),
            details: results.to_vec(),
            elapsed_ms,
            created_at: Utc::now(),
        }
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.details
            .iter()
            .filter(|r| r.is_error())
            .map(|r| r.id.as_str())
            .collect()
    }
}

pub fn summary_message(mode: RunMode, updated: usize, errors: usize) -> String {
    let noun = mode.noun_for(updated);
    match errors {
        0 => format!("Cleaned {updated} {noun}"),
        1 => format!("Cleaned {updated} {noun}, 1 error"),
        n => format!("Cleaned {updated} {noun}, {n} errors"),
    }
}
