//! Live progress of the active run
//!
//! The tracker owns the run's counters and its elapsed-time ticker. The
//! ticker is a periodic task started exactly once when the tracker is created
//! and stopped exactly once, either by `stop()` or when the tracker is
//! dropped, so repeated runs never leak timers.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::application::events::EventEmitter;
use crate::domain::{ProgressSnapshot, RunProgress};

pub struct ProgressTracker {
    progress: RunProgress,
    started_at: Instant,
    snapshot_tx: Arc<watch::Sender<ProgressSnapshot>>,
    emitter: Option<EventEmitter>,
    ticker: Option<JoinHandle<()>>,
    final_elapsed_ms: Option<u64>,
}

impl ProgressTracker {
    /// Reset the published snapshot to a fresh run and start ticking
    pub fn start(
        total: usize,
        tick_interval: Duration,
        snapshot_tx: Arc<watch::Sender<ProgressSnapshot>>,
        emitter: Option<EventEmitter>,
    ) -> Self {
        let progress = RunProgress::new(total);
        let started_at = Instant::now();
        snapshot_tx.send_replace(ProgressSnapshot::new(progress, 0));

        let ticker = spawn_ticker(started_at, tick_interval, Arc::clone(&snapshot_tx));
        debug!("Progress tracker started for {} targets", total);

        Self {
            progress,
            started_at,
            snapshot_tx,
            emitter,
            ticker: Some(ticker),
            final_elapsed_ms: None,
        }
    }

    /// Apply one finished chunk/item and publish the new snapshot
    pub async fn record(&mut self, processed: usize, updated: usize, errors: usize) -> RunProgress {
        self.progress.record(processed, updated, errors);
        let snapshot = ProgressSnapshot::new(self.progress, self.elapsed_ms());
        self.snapshot_tx.send_replace(snapshot);

        if let Some(emitter) = &self.emitter {
            emitter.emit_progress(snapshot).await;
        }
        self.progress
    }

    pub fn progress(&self) -> RunProgress {
        self.progress
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.final_elapsed_ms
            .unwrap_or_else(|| elapsed_ms_since(self.started_at))
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.snapshot_tx.borrow()
    }

    /// Stop the ticker and freeze elapsed time. Idempotent.
    ///
    /// The final snapshot carries no ETA: the run is over.
    pub fn stop(&mut self) -> u64 {
        if let Some(elapsed) = self.final_elapsed_ms {
            return elapsed;
        }
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }

        let elapsed = elapsed_ms_since(self.started_at);
        self.final_elapsed_ms = Some(elapsed);
        self.snapshot_tx.send_replace(ProgressSnapshot {
            progress: self.progress,
            percent: self.progress.percent(),
            elapsed_ms: elapsed,
            eta_ms: None,
        });
        debug!("Progress tracker stopped after {} ms", elapsed);
        elapsed
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.is_some()
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

fn elapsed_ms_since(started_at: Instant) -> u64 {
    started_at.elapsed().as_millis() as u64
}

fn spawn_ticker(
    started_at: Instant,
    tick_interval: Duration,
    snapshot_tx: Arc<watch::Sender<ProgressSnapshot>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = interval_at(started_at + tick_interval, tick_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            let elapsed = elapsed_ms_since(started_at);
            snapshot_tx.send_modify(|snapshot| {
                *snapshot = ProgressSnapshot::new(snapshot.progress, elapsed);
            });
        }
    })
}
