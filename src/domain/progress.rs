//! Progress counters and derived completion estimates

use serde::{Deserialize, Serialize};

/// Live counters for one run.
///
/// `updated + errors <= done <= total` holds after every mutation and `done`
/// never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub total: usize,
    pub done: usize,
    pub updated: usize,
    pub errors: usize,
}

impl RunProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Account for one finished unit of work covering `processed` targets.
    ///
    /// Counts are clamped so a misbehaving caller can never push `done` past
    /// `total`.
    pub fn record(&mut self, processed: usize, updated: usize, errors: usize) {
        let processed = processed.min(self.remaining());
        let updated = updated.min(processed);
        let errors = errors.min(processed - updated);

        self.done += processed;
        self.updated += updated;
        self.errors += errors;
    }

    pub fn remaining(&self) -> usize {
        self.total - self.done
    }

    pub fn is_finished(&self) -> bool {
        self.done >= self.total
    }

    /// `round(done / total * 100)`, 0 for an empty run
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.done as f64 / self.total as f64) * 100.0).round() as u8
    }

    /// Linear extrapolation from observed throughput.
    ///
    /// Only defined while `0 < done < total`.
    pub fn eta_ms(&self, elapsed_ms: u64) -> Option<u64> {
        if self.done == 0 || self.done >= self.total {
            return None;
        }
        let per_item = elapsed_ms as f64 / self.done as f64;
        Some((per_item * self.remaining() as f64).round() as u64)
    }
}

/// What presentation code renders while a run is active
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub progress: RunProgress,
    pub percent: u8,
    pub elapsed_ms: u64,
    pub eta_ms: Option<u64>,
}

impl ProgressSnapshot {
    pub fn new(progress: RunProgress, elapsed_ms: u64) -> Self {
        Self {
            progress,
            percent: progress.percent(),
            elapsed_ms,
            eta_ms: progress.eta_ms(elapsed_ms),
        }
    }
}
