//! # Batch Scheduler
//!
//! Walks the resolved targets strictly one unit of work at a time:
//! - products are sent in fixed-size chunks, one batched request per chunk
//! - stores are sent one request per store
//!
//! There is never more than one outstanding request. The cancellation token is
//! checked before every dispatch and is handed to the request itself so an
//! in-flight call is aborted too.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::progress_tracker::ProgressTracker;
use crate::domain::{
    BatchResult, BatchStatus, EndpointError, ProductCleaningService, RunMode, RunProgress,
    StoreCleaningService, Target, TargetKind,
};

/// Message recorded for every id of a chunk whose request failed outright
pub const CHUNK_FAILURE_MESSAGE: &str = "Batch request failed";
pub const MISSING_RESULT_MESSAGE: &str = "No result returned for this product";

/// Control-flow failures. Per-item failures are never reported here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Target '{id}' is a {found} but the run mode is {mode}")]
    KindMismatch {
        mode: RunMode,
        found: TargetKind,
        id: String,
    },

    #[error("Target '{id}' appears more than once in the run")]
    DuplicateTarget { id: String },

    #[error("Chunk size must be greater than 0")]
    InvalidChunkSize,
}

/// Everything the scheduler observed before it stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOutcome {
    /// Results in resolved order, only for work that was actually processed
    pub results: Vec<BatchResult>,
    pub progress: RunProgress,
    pub cancelled: bool,
}

pub struct BatchScheduler {
    products: Arc<dyn ProductCleaningService>,
    stores: Arc<dyn StoreCleaningService>,
    chunk_size: usize,
}

impl BatchScheduler {
    pub fn new(
        products: Arc<dyn ProductCleaningService>,
        stores: Arc<dyn StoreCleaningService>,
        chunk_size: usize,
    ) -> Self {
        Self {
            products,
            stores,
            chunk_size,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Process `targets` and feed every finished unit into `tracker`.
    pub async fn run(
        &self,
        targets: &[Target],
        mode: RunMode,
        tracker: &mut ProgressTracker,
        cancellation_token: &CancellationToken,
    ) -> Result<SchedulerOutcome, SchedulerError> {
        self.validate(targets, mode)?;

        info!(
            "🚀 Starting {} run over {} targets (chunk size {})",
            mode,
            targets.len(),
            self.chunk_size
        );

        let unit_size = match mode {
            RunMode::Products => self.chunk_size,
            RunMode::Stores => 1,
        };

        let mut results = Vec::with_capacity(targets.len());
        let mut cancelled = false;

        for (index, unit) in targets.chunks(unit_size).enumerate() {
            if cancellation_token.is_cancelled() {
                info!("🛑 Cancellation observed before unit {}, stopping dispatch", index + 1);
                cancelled = true;
                break;
            }

            let processed = match mode {
                RunMode::Products => self.process_chunk(unit, mode, cancellation_token).await,
                RunMode::Stores => self.process_store(&unit[0], cancellation_token).await,
            };

            let Some(unit_results) = processed else {
                info!("🛑 Request for unit {} aborted by cancellation", index + 1);
                cancelled = true;
                break;
            };

            let updated = unit_results.iter().filter(|r| r.is_success()).count();
            let errors = unit_results.len() - updated;
            let progress = tracker.record(unit_results.len(), updated, errors).await;
            debug!(
                "Unit {} done: {} updated, {} errors ({}/{})",
                index + 1,
                updated,
                errors,
                progress.done,
                progress.total
            );
            results.extend(unit_results);
        }

        // A cancel that lands after the last unit still means the user stopped the run
        let cancelled = cancelled || cancellation_token.is_cancelled();
        let progress = tracker.progress();
        info!(
            "Run finished: {}/{} processed, {} updated, {} errors{}",
            progress.done,
            progress.total,
            progress.updated,
            progress.errors,
            if cancelled { " (cancelled)" } else { "" }
        );

        Ok(SchedulerOutcome {
            results,
            progress,
            cancelled,
        })
    }

    fn validate(&self, targets: &[Target], mode: RunMode) -> Result<(), SchedulerError> {
        if self.chunk_size == 0 {
            return Err(SchedulerError::InvalidChunkSize);
        }

        let expected = mode.target_kind();
        let mut seen = HashSet::new();
        for target in targets {
            if target.kind != expected {
                return Err(SchedulerError::KindMismatch {
                    mode,
                    found: target.kind,
                    id: target.id.clone(),
                });
            }
            if !seen.insert(target.id.as_str()) {
                return Err(SchedulerError::DuplicateTarget {
                    id: target.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// One batched request; `None` when the request was aborted by cancellation
    async fn process_chunk(
        &self,
        chunk: &[Target],
        mode: RunMode,
        cancellation_token: &CancellationToken,
    ) -> Option<Vec<BatchResult>> {
        let ids: Vec<String> = chunk.iter().map(|t| t.id.clone()).collect();

        let request = self
            .products
            .clean_products(&ids, mode.scope_tag(), cancellation_token);
        let outcomes = match until_cancelled(request, cancellation_token).await {
            Ok(outcomes) => outcomes,
            Err(e) if e.is_cancelled() => return None,
            Err(e) => {
                warn!("⚠️ Chunk [{}] failed as a whole: {}", ids.join(", "), e);
                return Some(
                    chunk
                        .iter()
                        .map(|t| BatchResult::failure(t, CHUNK_FAILURE_MESSAGE))
                        .collect(),
                );
            }
        };

        // Responses may arrive in any order; match them back by id
        let mut by_id: HashMap<String, _> = outcomes
            .into_iter()
            .map(|o| (o.product_id.clone(), o))
            .collect();

        let results = chunk
            .iter()
            .map(|target| match by_id.remove(&target.id) {
                Some(outcome) if outcome.status == BatchStatus::Success => {
                    BatchResult::success(target, outcome.metadata())
                }
                Some(outcome) => {
                    let message = outcome
                        .error
                        .unwrap_or_else(|| "Processing failed".to_string());
                    warn!("Product {} failed: {}", target.id, message);
                    BatchResult::failure(target, message)
                }
                None => {
                    warn!("Product {} missing from batch response", target.id);
                    BatchResult::failure(target, MISSING_RESULT_MESSAGE)
                }
            })
            .collect();

        if !by_id.is_empty() {
            let mut unknown: Vec<_> = by_id.into_keys().collect();
            unknown.sort();
            warn!("Ignoring results for ids not in the chunk: {}", unknown.join(", "));
        }

        Some(results)
    }

    /// One request for one store; `None` when aborted by cancellation
    async fn process_store(
        &self,
        store: &Target,
        cancellation_token: &CancellationToken,
    ) -> Option<Vec<BatchResult>> {
        let request = self.stores.clean_store(&store.id, cancellation_token);
        let result = match until_cancelled(request, cancellation_token).await {
            Ok(outcome) if outcome.status == BatchStatus::Success => {
                BatchResult::success(store, Some(outcome.metadata()))
            }
            Ok(outcome) => {
                let message = outcome
                    .error
                    .unwrap_or_else(|| "Store clean failed".to_string());
                warn!("Store {} failed: {}", store.id, message);
                BatchResult::failure(store, message)
            }
            Err(e) if e.is_cancelled() => return None,
            Err(e) => {
                warn!("⚠️ Store {} request failed: {}", store.id, e);
                BatchResult::failure(store, e.to_string())
            }
        };
        Some(vec![result])
    }
}

/// Drop `request` as soon as the token fires, whether or not the endpoint
/// watches the token itself
async fn until_cancelled<T>(
    request: impl Future<Output = Result<T, EndpointError>>,
    cancellation_token: &CancellationToken,
) -> Result<T, EndpointError> {
    tokio::select! {
        // An answer that is already there wins over a cancel that raced it
        biased;
        result = request => result,
        _ = cancellation_token.cancelled() => Err(EndpointError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EndpointError, ProductCleanOutcome, StoreCleanOutcome};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::watch;

    /// Scripted products endpoint: fails whole calls by call index and
    /// individual ids by name, answers in reverse order.
    #[derive(Default)]
    struct ScriptedProducts {
        calls: Mutex<Vec<Vec<String>>>,
        failing_calls: Vec<usize>,
        failing_ids: Vec<String>,
        cancel_on_call: Option<(usize, CancellationToken)>,
    }

    #[async_trait]
    impl ProductCleaningService for ScriptedProducts {
        async fn clean_products(
            &self,
            product_ids: &[String],
            _scope: &str,
            _cancellation_token: &CancellationToken,
        ) -> Result<Vec<ProductCleanOutcome>, EndpointError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(product_ids.to_vec());
                calls.len()
            };
            if let Some((at, token)) = &self.cancel_on_call {
                if *at == call {
                    token.cancel();
                }
            }
            if self.failing_calls.contains(&call) {
                return Err(EndpointError::Status {
                    status: 502,
                    message: "bad gateway".into(),
                });
            }
            Ok(product_ids
                .iter()
                .rev()
                .map(|id| {
                    let failed = self.failing_ids.contains(id);
                    ProductCleanOutcome {
                        product_id: id.clone(),
                        status: if failed { BatchStatus::Error } else { BatchStatus::Success },
                        error: failed.then(|| "price missing".to_string()),
                        descriptions_generated: None,
                    }
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct ScriptedStores {
        failing: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StoreCleaningService for ScriptedStores {
        async fn clean_store(
            &self,
            store_id: &str,
            _cancellation_token: &CancellationToken,
        ) -> Result<StoreCleanOutcome, EndpointError> {
            self.calls.lock().unwrap().push(store_id.to_string());
            if self.failing.iter().any(|s| s == store_id) {
                return Err(EndpointError::Transport("connection reset".into()));
            }
            Ok(StoreCleanOutcome {
                status: BatchStatus::Success,
                error: None,
                source: Some("shopify".into()),
                descriptions_generated: Some(true),
            })
        }
    }

    fn products(count: usize) -> Vec<Target> {
        (1..=count)
            .map(|i| Target::product(format!("p{i}"), format!("Product {i}"), "s1"))
            .collect()
    }

    fn tracker(total: usize) -> ProgressTracker {
        let tx = Arc::new(watch::channel(Default::default()).0);
        ProgressTracker::start(total, Duration::from_secs(1), tx, None)
    }

    fn scheduler(products: ScriptedProducts, stores: ScriptedStores) -> BatchScheduler {
        BatchScheduler::new(Arc::new(products), Arc::new(stores), 3)
    }

    #[tokio::test]
    async fn test_transport_failure_marks_whole_chunk() {
        let endpoint = ScriptedProducts {
            failing_calls: vec![2],
            ..Default::default()
        };
        let scheduler = scheduler(endpoint, ScriptedStores::default());
        let targets = products(10);
        let mut tracker = tracker(targets.len());

        let outcome = scheduler
            .run(&targets, RunMode::Products, &mut tracker, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.cancelled);
        assert_eq!(outcome.progress.done, 10);
        assert_eq!(outcome.progress.errors, 3);
        assert_eq!(outcome.progress.updated, 7);
        let failed: Vec<_> = outcome
            .results
            .iter()
            .filter(|r| r.is_error())
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(failed, vec!["p4", "p5", "p6"]);
        assert!(outcome.results[3]
            .error_message
            .as_deref()
            .is_some_and(|m| m == CHUNK_FAILURE_MESSAGE));
    }

    #[tokio::test]
    async fn test_results_reassociated_by_id() {
        let endpoint = ScriptedProducts {
            failing_ids: vec!["p2".into()],
            ..Default::default()
        };
        let scheduler = scheduler(endpoint, ScriptedStores::default());
        let targets = products(3);
        let mut tracker = tracker(3);

        let outcome = scheduler
            .run(&targets, RunMode::Products, &mut tracker, &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<_> = outcome.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2", "p3"]);
        assert_eq!(outcome.results[1].status, BatchStatus::Error);
        assert_eq!(outcome.results[1].error_message.as_deref(), Some("price missing"));
        assert_eq!(outcome.results[1].label, "Product 2");
    }

    #[tokio::test]
    async fn test_chunks_of_three_with_short_tail() {
        let endpoint = Arc::new(ScriptedProducts::default());
        let scheduler = BatchScheduler::new(endpoint.clone(), Arc::new(ScriptedStores::default()), 3);
        let targets = products(7);
        let mut tracker = tracker(7);

        scheduler
            .run(&targets, RunMode::Products, &mut tracker, &CancellationToken::new())
            .await
            .unwrap();

        let sizes: Vec<_> = endpoint.calls.lock().unwrap().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn test_store_failure_continues_to_next() {
        let stores = ScriptedStores {
            failing: vec!["s2".into()],
            ..Default::default()
        };
        let scheduler = scheduler(ScriptedProducts::default(), stores);
        let targets = vec![
            Target::store("s1", "One"),
            Target::store("s2", "Two"),
            Target::store("s3", "Three"),
        ];
        let mut tracker = tracker(3);

        let outcome = scheduler
            .run(&targets, RunMode::Stores, &mut tracker, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.progress.done, 3);
        assert_eq!(outcome.progress.errors, 1);
        assert_eq!(
            outcome.results[1].error_message.as_deref(),
            Some("Transport error: connection reset")
        );
        let meta = outcome.results[0].metadata.as_ref().unwrap();
        assert_eq!(meta.source.as_deref(), Some("shopify"));
        assert_eq!(meta.descriptions_generated, Some(true));
    }

    #[tokio::test]
    async fn test_cancel_stops_further_dispatch() {
        let token = CancellationToken::new();
        let endpoint = Arc::new(ScriptedProducts {
            cancel_on_call: Some((2, token.clone())),
            ..Default::default()
        });
        let scheduler = BatchScheduler::new(endpoint.clone(), Arc::new(ScriptedStores::default()), 3);
        let targets = products(12);
        let mut tracker = tracker(12);

        let outcome = scheduler
            .run(&targets, RunMode::Products, &mut tracker, &token)
            .await
            .unwrap();

        assert!(outcome.cancelled);
        // The chunk already dispatched finishes; nothing after it is sent
        assert_eq!(endpoint.calls.lock().unwrap().len(), 2);
        assert_eq!(outcome.progress.done, 6);
        assert_eq!(outcome.results.len(), 6);
    }

    /// Never answers and never looks at the token
    struct HangingStores;

    #[async_trait]
    impl StoreCleaningService for HangingStores {
        async fn clean_store(
            &self,
            _store_id: &str,
            _cancellation_token: &CancellationToken,
        ) -> Result<StoreCleanOutcome, EndpointError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(EndpointError::Transport("unreachable".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_request_that_ignores_token() {
        let token = CancellationToken::new();
        let scheduler = BatchScheduler::new(
            Arc::new(ScriptedProducts::default()),
            Arc::new(HangingStores),
            3,
        );
        let targets = vec![Target::store("s1", "North"), Target::store("s2", "South")];
        let mut tracker = tracker(2);

        tokio::spawn({
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            }
        });

        let outcome = scheduler
            .run(&targets, RunMode::Stores, &mut tracker, &token)
            .await
            .unwrap();

        assert!(outcome.cancelled);
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.progress.done, 0);
    }

    #[tokio::test]
    async fn test_rejects_wrong_kind_before_dispatch() {
        let endpoint = Arc::new(ScriptedProducts::default());
        let scheduler = BatchScheduler::new(endpoint.clone(), Arc::new(ScriptedStores::default()), 3);
        let targets = vec![Target::store("s1", "One")];
        let mut tracker = tracker(1);

        let err = scheduler
            .run(&targets, RunMode::Products, &mut tracker, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::KindMismatch { .. }));
        assert!(endpoint.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_duplicate_targets() {
        let scheduler = scheduler(ScriptedProducts::default(), ScriptedStores::default());
        let mut targets = products(2);
        targets.push(targets[0].clone());
        let mut tracker = tracker(3);

        let err = scheduler
            .run(&targets, RunMode::Products, &mut tracker, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, SchedulerError::DuplicateTarget { id: "p1".into() });
    }
}
