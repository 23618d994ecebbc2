//! # Bulk Orchestrator
//!
//! Owns the run phase of one bulk operation screen and drives a run through
//! resolution, the bulk-confirmation gate, scheduling, logging and retry.
//!
//! ```text
//! configure ──start──▶ running ──done──▶ complete ──close──▶ configure
//!     │                  ▲   │                │
//!     └──start (gate)──▶ confirm            retry
//!                        │   └──cancel──▶ configure
//!                        └──confirm──▶ running
//! ```
//!
//! Only one run can be active per instance. The state lock is never held
//! while a run is in progress so `cancel()` can always get in.
//!
//! Each run executes on a task the orchestrator spawns and owns. Callers of
//! `start`/`confirm`/`retry` await that task; dropping their future leaves
//! the run going, and `cancel()` still stops it and returns to configure.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{error, info, warn};

use crate::application::cancellation::CancellationController;
use crate::application::events::{EventEmitter, Notice, OrchestratorEvent};
use crate::application::progress_tracker::ProgressTracker;
use crate::application::resolver::TargetResolver;
use crate::application::retry::RetryCoordinator;
use crate::application::run_logger::{PersistenceError, RunLogger};
use crate::application::scheduler::{BatchScheduler, SchedulerError, SchedulerOutcome};
use crate::domain::{
    BatchResult, FailedItem, ProductCleaningService, ProgressSnapshot, RunConfiguration,
    RunLogEntry, RunLogSink, RunMode, RunPhase, RunProgress, RunScope, Selection,
    StoreCleaningService, Target,
};
use crate::infrastructure::config::OrchestratorSettings;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("Cannot {action} while in the {phase} phase")]
    InvalidTransition {
        action: &'static str,
        phase: RunPhase,
    },

    #[error("A run is already in progress")]
    AlreadyRunning,

    #[error("The last run has no failed items to retry")]
    NothingToRetry,

    #[error("Run failed: {0}")]
    RunFailed(#[from] SchedulerError),

    #[error("Run task ended unexpectedly: {0}")]
    TaskFailed(String),
}

/// Summary of a naturally completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub mode: RunMode,
    pub progress: RunProgress,
    pub results: Vec<BatchResult>,
    pub elapsed: Duration,
    pub failed_items: Vec<FailedItem>,
    /// Present when the log entry was stored
    pub log_entry: Option<RunLogEntry>,
    /// Present when storing the log entry failed; the run still completed
    pub persistence_error: Option<PersistenceError>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        !self.failed_items.is_empty()
    }

    /// The entry built for this run, stored or not
    pub fn entry(&self) -> Option<&RunLogEntry> {
        self.log_entry
            .as_ref()
            .or_else(|| self.persistence_error.as_ref().map(PersistenceError::entry))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunReport),
    /// Stopped by the user after `processed` targets; nothing was logged
    Cancelled { processed: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The configuration resolved to no targets
    NothingToProcess,
    /// Bulk gate: call `confirm()` or `decline()`
    AwaitingConfirmation { target_count: usize },
    Finished(RunOutcome),
}

/// Read-only state for presentation code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorView {
    pub phase: RunPhase,
    pub snapshot: ProgressSnapshot,
    /// Failures of the completed run; empty outside the complete phase
    pub failed_items: Vec<FailedItem>,
}

struct PendingRun {
    config: RunConfiguration,
    targets: Vec<Target>,
}

struct LastRun {
    targets: Vec<Target>,
    report: RunReport,
}

struct OrchestratorState {
    phase: RunPhase,
    pending: Option<PendingRun>,
    controller: Option<CancellationController>,
    last_run: Option<LastRun>,
}

struct Inner {
    scheduler: BatchScheduler,
    run_logger: RunLogger,
    settings: OrchestratorSettings,
    emitter: EventEmitter,
    state: RwLock<OrchestratorState>,
    snapshot_tx: Arc<watch::Sender<ProgressSnapshot>>,
}

#[derive(Clone)]
pub struct BulkOrchestrator {
    inner: Arc<Inner>,
}

impl BulkOrchestrator {
    pub fn new(
        products: Arc<dyn ProductCleaningService>,
        stores: Arc<dyn StoreCleaningService>,
        log_sink: Arc<dyn RunLogSink>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(ProgressSnapshot::default());
        let inner = Inner {
            scheduler: BatchScheduler::new(products, stores, settings.product_chunk_size),
            run_logger: RunLogger::new(log_sink),
            emitter: EventEmitter::new(settings.event_buffer_size),
            settings,
            state: RwLock::new(OrchestratorState {
                phase: RunPhase::Configure,
                pending: None,
                controller: None,
                last_run: None,
            }),
            snapshot_tx: Arc::new(snapshot_tx),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.inner.emitter
    }

    pub async fn phase(&self) -> RunPhase {
        self.inner.state.read().await.phase
    }

    pub async fn view(&self) -> OrchestratorView {
        let state = self.inner.state.read().await;
        let failed_items = match (&state.phase, &state.last_run) {
            (RunPhase::Complete, Some(last)) => last.report.failed_items.clone(),
            _ => Vec::new(),
        };

        OrchestratorView {
            phase: state.phase,
            snapshot: *self.inner.snapshot_tx.borrow(),
            failed_items,
        }
    }

    /// Live progress; yields the current snapshot first, then every change
    pub fn subscribe_progress(&self) -> WatchStream<ProgressSnapshot> {
        WatchStream::new(self.inner.snapshot_tx.subscribe())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.emitter.subscribe()
    }

    /// Empty selection capped for the mode's target kind
    pub fn new_selection(&self, mode: RunMode) -> Selection {
        let limit = match mode {
            RunMode::Stores => self.inner.settings.max_selected_stores,
            RunMode::Products => self.inner.settings.max_selected_products,
        };
        Selection::new(mode.target_kind(), limit)
    }

    /// Resolve `config` against `universe` and either run it, stop at the
    /// bulk gate, or report that there is nothing to do.
    pub async fn start(
        &self,
        config: RunConfiguration,
        universe: &[Target],
    ) -> Result<StartOutcome, OrchestratorError> {
        let mut state = self.inner.state.write().await;
        match state.phase {
            RunPhase::Configure => {}
            RunPhase::Running => return Err(OrchestratorError::AlreadyRunning),
            phase => {
                return Err(OrchestratorError::InvalidTransition {
                    action: "start",
                    phase,
                })
            }
        }

        let targets = TargetResolver::resolve(&config, universe);
        if targets.is_empty() {
            info!("Nothing to process for {} run", config.mode());
            self.inner.emitter.emit_notice(Notice::NothingToProcess).await;
            return Ok(StartOutcome::NothingToProcess);
        }

        let threshold = self.inner.settings.confirmation_threshold;
        if config.scope() == RunScope::Selected && targets.len() > threshold {
            let target_count = targets.len();
            info!(
                "⏸️ {} targets exceed the bulk threshold of {}, awaiting confirmation",
                target_count, threshold
            );
            state.pending = Some(PendingRun { config, targets });
            self.transition(&mut state, RunPhase::Confirm).await;
            self.inner
                .emitter
                .emit_notice(Notice::ConfirmationRequired {
                    count: target_count,
                })
                .await;
            return Ok(StartOutcome::AwaitingConfirmation { target_count });
        }

        let controller = self.begin_run(&mut state).await;
        drop(state);

        self.execute(config, targets, controller)
            .await
            .map(StartOutcome::Finished)
    }

    /// Accept the bulk gate and run the pending targets
    pub async fn confirm(&self) -> Result<RunOutcome, OrchestratorError> {
        let mut state = self.inner.state.write().await;
        let pending = match (state.phase, state.pending.take()) {
            (RunPhase::Confirm, Some(pending)) => pending,
            (phase, _) => {
                return Err(OrchestratorError::InvalidTransition {
                    action: "confirm",
                    phase,
                })
            }
        };

        let controller = self.begin_run(&mut state).await;
        drop(state);

        self.execute(pending.config, pending.targets, controller)
            .await
    }

    /// Reject the bulk gate; nothing runs
    pub async fn decline(&self) -> Result<(), OrchestratorError> {
        let mut state = self.inner.state.write().await;
        if state.phase != RunPhase::Confirm {
            return Err(OrchestratorError::InvalidTransition {
                action: "decline",
                phase: state.phase,
            });
        }
        state.pending = None;
        self.transition(&mut state, RunPhase::Configure).await;
        Ok(())
    }

    /// Stop the active run, or back out of the confirm phase.
    ///
    /// Returns `true` when this call changed anything.
    pub async fn cancel(&self) -> bool {
        let mut state = self.inner.state.write().await;
        match state.phase {
            RunPhase::Running => state
                .controller
                .as_ref()
                .is_some_and(CancellationController::cancel),
            RunPhase::Confirm => {
                state.pending = None;
                self.transition(&mut state, RunPhase::Configure).await;
                true
            }
            _ => false,
        }
    }

    /// Dismiss the summary of a completed run
    pub async fn close(&self) -> Result<(), OrchestratorError> {
        let mut state = self.inner.state.write().await;
        if state.phase != RunPhase::Complete {
            return Err(OrchestratorError::InvalidTransition {
                action: "close",
                phase: state.phase,
            });
        }
        self.transition(&mut state, RunPhase::Configure).await;
        Ok(())
    }

    /// Re-run only the failed items of the completed run, without the gate
    pub async fn retry(&self) -> Result<RunOutcome, OrchestratorError> {
        let mut state = self.inner.state.write().await;
        if state.phase != RunPhase::Complete {
            return Err(OrchestratorError::InvalidTransition {
                action: "retry",
                phase: state.phase,
            });
        }

        let config = state
            .last_run
            .as_ref()
            .and_then(|last| {
                RetryCoordinator::retry_failed(last.report.mode, &last.report.results, &last.targets)
            })
            .ok_or(OrchestratorError::NothingToRetry)?;

        let targets = config.selected_targets().to_vec();
        let controller = self.begin_run(&mut state).await;
        drop(state);

        self.execute(config, targets, controller).await
    }

    /// Report of the most recent completed run, if any
    pub async fn last_report(&self) -> Option<RunReport> {
        self.inner
            .state
            .read()
            .await
            .last_run
            .as_ref()
            .map(|last| last.report.clone())
    }

    async fn transition(&self, state: &mut OrchestratorState, to: RunPhase) {
        let from = std::mem::replace(&mut state.phase, to);
        if from != to {
            info!("Phase {} -> {}", from, to);
            self.inner.emitter.emit_phase_change(from, to).await;
        }
    }

    async fn begin_run(&self, state: &mut OrchestratorState) -> CancellationController {
        let controller = CancellationController::new();
        state.controller = Some(controller.clone());
        self.transition(state, RunPhase::Running).await;
        controller
    }

    async fn execute(
        &self,
        config: RunConfiguration,
        targets: Vec<Target>,
        controller: CancellationController,
    ) -> Result<RunOutcome, OrchestratorError> {
        self.spawn_run(config, targets, controller)
            .await
            .map_err(|e| OrchestratorError::TaskFailed(e.to_string()))?
    }

    /// Run on an owned task; a panicking run still leaves the running phase
    fn spawn_run(
        &self,
        config: RunConfiguration,
        targets: Vec<Target>,
        controller: CancellationController,
    ) -> JoinHandle<Result<RunOutcome, OrchestratorError>> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let worker = orchestrator.clone();
            let run = tokio::spawn(async move { worker.drive(config, targets, controller).await });

            match run.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("❌ Run task ended unexpectedly: {}", e);
                    orchestrator.finish(RunPhase::Configure, None).await;
                    orchestrator
                        .inner
                        .emitter
                        .emit_notice(Notice::RunFailed {
                            message: e.to_string(),
                        })
                        .await;
                    Err(OrchestratorError::TaskFailed(e.to_string()))
                }
            }
        })
    }

    async fn drive(
        &self,
        config: RunConfiguration,
        targets: Vec<Target>,
        controller: CancellationController,
    ) -> Result<RunOutcome, OrchestratorError> {
        let mode = config.mode();
        let mut tracker = ProgressTracker::start(
            targets.len(),
            self.inner.settings.tick_interval(),
            Arc::clone(&self.inner.snapshot_tx),
            Some(self.inner.emitter.clone()),
        );

        let scheduled = self
            .inner
            .scheduler
            .run(&targets, mode, &mut tracker, &controller.token())
            .await;
        let elapsed_ms = tracker.stop();

        match scheduled {
            Err(e) => {
                error!("❌ {} run ended abnormally: {}", mode, e);
                self.finish(RunPhase::Configure, None).await;
                self.inner
                    .emitter
                    .emit_notice(Notice::RunFailed {
                        message: e.to_string(),
                    })
                    .await;
                Err(e.into())
            }
            Ok(outcome) if outcome.cancelled => {
                let processed = outcome.progress.done;
                info!("🛑 {} run cancelled after {} targets", mode, processed);
                self.finish(RunPhase::Configure, None).await;
                self.inner
                    .emitter
                    .emit_notice(Notice::Cancelled { processed })
                    .await;
                Ok(RunOutcome::Cancelled { processed })
            }
            Ok(outcome) => {
                let report = self.complete(&config, outcome, elapsed_ms).await;
                self.finish(
                    RunPhase::Complete,
                    Some(LastRun {
                        targets,
                        report: report.clone(),
                    }),
                )
                .await;
                Ok(RunOutcome::Completed(report))
            }
        }
    }

    async fn complete(
        &self,
        config: &RunConfiguration,
        outcome: SchedulerOutcome,
        elapsed_ms: u64,
    ) -> RunReport {
        let mode = config.mode();
        let SchedulerOutcome {
            results, progress, ..
        } = outcome;

        let (log_entry, persistence_error) =
            match self.inner.run_logger.log(&results, config, elapsed_ms).await {
                Ok(entry) => (Some(entry), None),
                Err(e) => {
                    warn!("⚠️ {}", e);
                    self.inner
                        .emitter
                        .emit_notice(Notice::PersistenceFailed {
                            message: e.to_string(),
                        })
                        .await;
                    (None, Some(e))
                }
            };

        self.inner
            .emitter
            .emit_notice(Notice::Completed {
                updated: progress.updated,
                errors: progress.errors,
            })
            .await;
        info!(
            "✅ {} run complete: {} updated, {} errors in {} ms",
            mode, progress.updated, progress.errors, elapsed_ms
        );

        RunReport {
            mode,
            progress,
            failed_items: results.iter().filter_map(FailedItem::from_result).collect(),
            results,
            elapsed: Duration::from_millis(elapsed_ms),
            log_entry,
            persistence_error,
        }
    }

    async fn finish(&self, to: RunPhase, last_run: Option<LastRun>) {
        let mut state = self.inner.state.write().await;
        state.controller = None;
        if last_run.is_some() {
            state.last_run = last_run;
        }
        self.transition(&mut state, to).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BatchStatus, EndpointError, ProductCleanOutcome, StoreCleanOutcome, TargetKind,
    };
    use async_trait::async_trait;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;
    use tokio_stream::StreamExt;
    use tokio_util::sync::CancellationToken;

    /// In-memory backend for every collaborator the orchestrator needs
    #[derive(Default)]
    struct Backend {
        product_calls: Mutex<Vec<Vec<String>>>,
        failing_ids: Mutex<Vec<String>>,
        block_on_call: Option<usize>,
        entered: Notify,
        calls: AtomicUsize,
        logs: Mutex<Vec<RunLogEntry>>,
        fail_persist: bool,
        /// Call that never answers and ignores the token
        hang_on_call: Option<usize>,
    }

    #[async_trait]
    impl ProductCleaningService for Backend {
        async fn clean_products(
            &self,
            product_ids: &[String],
            _scope: &str,
            cancellation_token: &CancellationToken,
        ) -> Result<Vec<ProductCleanOutcome>, EndpointError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.product_calls.lock().unwrap().push(product_ids.to_vec());
            if self.hang_on_call == Some(call) {
                self.entered.notify_one();
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.block_on_call == Some(call) {
                self.entered.notify_one();
                cancellation_token.cancelled().await;
                return Err(EndpointError::Cancelled);
            }

            let failing = self.failing_ids.lock().unwrap().clone();
            Ok(product_ids
                .iter()
                .map(|id| ProductCleanOutcome {
                    product_id: id.clone(),
                    status: if failing.contains(id) {
                        BatchStatus::Error
                    } else {
                        BatchStatus::Success
                    },
                    error: failing.contains(id).then(|| "no price".to_string()),
                    descriptions_generated: None,
                })
                .collect())
        }
    }

    #[async_trait]
    impl StoreCleaningService for Backend {
        async fn clean_store(
            &self,
            _store_id: &str,
            _cancellation_token: &CancellationToken,
        ) -> Result<StoreCleanOutcome, EndpointError> {
            Ok(StoreCleanOutcome {
                status: BatchStatus::Success,
                error: None,
                source: None,
                descriptions_generated: None,
            })
        }
    }

    #[async_trait]
    impl RunLogSink for Backend {
        async fn persist(&self, entry: &RunLogEntry) -> anyhow::Result<()> {
            if self.fail_persist {
                anyhow::bail!("disk full");
            }
            self.logs.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    fn orchestrator(backend: Arc<Backend>) -> BulkOrchestrator {
        let settings = OrchestratorSettings {
            max_selected_products: 20,
            ..OrchestratorSettings::default()
        };
        BulkOrchestrator::new(backend.clone(), backend.clone(), backend, settings)
    }

    fn universe(count: usize) -> Vec<Target> {
        (1..=count)
            .map(|i| Target::product(format!("p{i}"), format!("Product {i}"), "s1"))
            .collect()
    }

    fn selected(orchestrator: &BulkOrchestrator, targets: &[Target]) -> RunConfiguration {
        let mut selection = orchestrator.new_selection(RunMode::Products);
        for target in targets {
            selection.insert(target.clone()).unwrap();
        }
        RunConfiguration::selected(RunMode::Products, selection).unwrap()
    }

    #[rstest]
    #[case::seven_selected_runs_immediately(7, false)]
    #[case::ten_selected_is_not_bulk(10, false)]
    #[case::twelve_selected_needs_confirmation(12, true)]
    #[tokio::test]
    async fn test_bulk_gate(#[case] count: usize, #[case] gated: bool) {
        let backend = Arc::new(Backend::default());
        let orchestrator = orchestrator(backend.clone());
        let targets = universe(count);
        let config = selected(&orchestrator, &targets);

        let outcome = orchestrator.start(config, &targets).await.unwrap();

        if gated {
            assert_eq!(
                outcome,
                StartOutcome::AwaitingConfirmation {
                    target_count: count
                }
            );
            assert_eq!(orchestrator.phase().await, RunPhase::Confirm);
            assert!(backend.product_calls.lock().unwrap().is_empty());
        } else {
            assert!(matches!(
                outcome,
                StartOutcome::Finished(RunOutcome::Completed(_))
            ));
            assert_eq!(orchestrator.phase().await, RunPhase::Complete);
        }
    }

    #[tokio::test]
    async fn test_all_scope_is_never_gated() {
        let backend = Arc::new(Backend::default());
        let orchestrator = orchestrator(backend);
        let outcome = orchestrator
            .start(RunConfiguration::all(RunMode::Products), &universe(25))
            .await
            .unwrap();
        assert!(matches!(outcome, StartOutcome::Finished(_)));
    }

    #[tokio::test]
    async fn test_confirm_runs_twelve_in_four_chunks() {
        let backend = Arc::new(Backend::default());
        let orchestrator = orchestrator(backend.clone());
        let targets = universe(12);
        orchestrator
            .start(selected(&orchestrator, &targets), &targets)
            .await
            .unwrap();

        let RunOutcome::Completed(report) = orchestrator.confirm().await.unwrap() else {
            panic!("expected a completed run");
        };

        assert_eq!(backend.product_calls.lock().unwrap().len(), 4);
        assert_eq!(report.progress.done, 12);
        assert_eq!(report.progress.updated, 12);
        let entry = report.log_entry.as_ref().unwrap();
        assert_eq!(entry.items_processed, 12);
        assert_eq!(backend.logs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_decline_returns_to_configure() {
        let backend = Arc::new(Backend::default());
        let orchestrator = orchestrator(backend.clone());
        let targets = universe(11);
        orchestrator
            .start(selected(&orchestrator, &targets), &targets)
            .await
            .unwrap();

        orchestrator.decline().await.unwrap();
        assert_eq!(orchestrator.phase().await, RunPhase::Configure);
        assert!(matches!(
            orchestrator.confirm().await,
            Err(OrchestratorError::InvalidTransition { action: "confirm", .. })
        ));
        assert!(backend.product_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_resolution_notifies_and_stays_idle() {
        let orchestrator = orchestrator(Arc::new(Backend::default()));
        let mut events = orchestrator.subscribe_events();

        let outcome = orchestrator
            .start(RunConfiguration::all(RunMode::Stores), &universe(3))
            .await
            .unwrap();

        assert_eq!(outcome, StartOutcome::NothingToProcess);
        assert_eq!(orchestrator.phase().await, RunPhase::Configure);
        assert_eq!(
            events.recv().await.unwrap(),
            OrchestratorEvent::Notice(Notice::NothingToProcess)
        );
    }

    #[tokio::test]
    async fn test_cancel_mid_run_skips_log_and_resets() {
        let backend = Arc::new(Backend {
            block_on_call: Some(2),
            ..Default::default()
        });
        let orchestrator = orchestrator(backend.clone());

        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator
                    .start(RunConfiguration::all(RunMode::Products), &universe(9))
                    .await
            }
        });

        backend.entered.notified().await;
        assert_eq!(orchestrator.phase().await, RunPhase::Running);
        assert_eq!(
            orchestrator
                .start(RunConfiguration::all(RunMode::Products), &universe(9))
                .await,
            Err(OrchestratorError::AlreadyRunning)
        );

        assert!(orchestrator.cancel().await);
        let outcome = handle.await.unwrap().unwrap();

        assert_eq!(
            outcome,
            StartOutcome::Finished(RunOutcome::Cancelled { processed: 3 })
        );
        assert_eq!(orchestrator.phase().await, RunPhase::Configure);
        assert!(backend.logs.lock().unwrap().is_empty());
        assert!(!orchestrator.cancel().await);

        // The next run starts from zero
        let mut progress = orchestrator.subscribe_progress();
        let backend_calls = backend.calls.load(Ordering::SeqCst);
        assert_eq!(backend_calls, 2);
        let first = orchestrator
            .start(RunConfiguration::all(RunMode::Products), &universe(2))
            .await
            .unwrap();
        assert!(matches!(first, StartOutcome::Finished(RunOutcome::Completed(_))));
        let latest = progress.next().await.unwrap();
        assert_eq!(latest.progress.total, 2);
        assert_eq!(latest.progress.done, 2);
    }

    #[tokio::test]
    async fn test_abandoned_start_can_still_be_cancelled() {
        let backend = Arc::new(Backend {
            hang_on_call: Some(1),
            ..Default::default()
        });
        let orchestrator = orchestrator(backend.clone());
        let mut events = orchestrator.subscribe_events();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            orchestrator.start(RunConfiguration::all(RunMode::Products), &universe(1)),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(orchestrator.phase().await, RunPhase::Running);

        assert!(orchestrator.cancel().await);
        loop {
            if let OrchestratorEvent::PhaseChanged {
                to: RunPhase::Configure,
                ..
            } = events.recv().await.unwrap()
            {
                break;
            }
        }
        assert_eq!(orchestrator.phase().await, RunPhase::Configure);
        assert!(backend.logs.lock().unwrap().is_empty());

        let restarted = orchestrator
            .start(RunConfiguration::all(RunMode::Products), &universe(2))
            .await
            .unwrap();
        let StartOutcome::Finished(RunOutcome::Completed(report)) = restarted else {
            panic!("expected a completed run");
        };
        assert_eq!(report.progress.done, 2);
    }

    #[tokio::test]
    async fn test_retry_runs_only_failed_items() {
        let backend = Arc::new(Backend::default());
        backend
            .failing_ids
            .lock()
            .unwrap()
            .extend(["p2".to_string(), "p5".to_string()]);
        let orchestrator = orchestrator(backend.clone());

        let first = orchestrator
            .start(RunConfiguration::all(RunMode::Products), &universe(6))
            .await
            .unwrap();
        let StartOutcome::Finished(RunOutcome::Completed(report)) = first else {
            panic!("expected a completed run");
        };
        assert_eq!(report.progress.errors, 2);
        let view = orchestrator.view().await;
        let failed: Vec<_> = view.failed_items.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(failed, vec!["p2", "p5"]);

        backend.failing_ids.lock().unwrap().clear();
        let RunOutcome::Completed(retried) = orchestrator.retry().await.unwrap() else {
            panic!("expected a completed retry");
        };

        let calls = backend.product_calls.lock().unwrap();
        assert_eq!(calls.last().unwrap(), &vec!["p2".to_string(), "p5".to_string()]);
        assert_eq!(retried.progress.total, 2);
        assert!(!retried.has_failures());
        assert_eq!(backend.logs.lock().unwrap().len(), 2);
        drop(calls);

        assert_eq!(
            orchestrator.retry().await,
            Err(OrchestratorError::NothingToRetry)
        );
        orchestrator.close().await.unwrap();
        assert_eq!(orchestrator.phase().await, RunPhase::Configure);
        assert!(orchestrator.view().await.failed_items.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_still_completes() {
        let backend = Arc::new(Backend {
            fail_persist: true,
            ..Default::default()
        });
        let orchestrator = orchestrator(backend);
        let mut events = orchestrator.subscribe_events();

        let outcome = orchestrator
            .start(RunConfiguration::all(RunMode::Products), &universe(2))
            .await
            .unwrap();
        let StartOutcome::Finished(RunOutcome::Completed(report)) = outcome else {
            panic!("expected a completed run");
        };

        assert!(report.log_entry.is_none());
        assert!(report.persistence_error.is_some());
        assert_eq!(report.entry().unwrap().items_updated, 2);
        assert_eq!(orchestrator.phase().await, RunPhase::Complete);

        let mut saw_warning = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, OrchestratorEvent::Notice(Notice::PersistenceFailed { .. })) {
                saw_warning = true;
            }
        }
        assert!(saw_warning);
    }

    #[test]
    fn test_new_selection_uses_configured_caps() {
        let orchestrator = BulkOrchestrator::new(
            Arc::new(Backend::default()),
            Arc::new(Backend::default()),
            Arc::new(Backend::default()),
            OrchestratorSettings::default(),
        );
        let selection = orchestrator.new_selection(RunMode::Stores);
        assert_eq!(selection.kind(), TargetKind::Store);
        assert_eq!(selection.limit(), 5);
    }
}
