//! Failed-subset re-runs

use std::collections::HashMap;
use tracing::info;

use crate::domain::{BatchResult, RunConfiguration, RunMode, Target, TargetKind};

pub struct RetryCoordinator;

impl RetryCoordinator {
    /// Configuration covering exactly the failed items of `last_run`, in the
    /// order they were processed. `None` when nothing failed.
    ///
    /// `resolved` is the target list of the finished run; it restores the
    /// owning store of products so retried targets match the originals.
    pub fn retry_failed(
        mode: RunMode,
        last_run: &[BatchResult],
        resolved: &[Target],
    ) -> Option<RunConfiguration> {
        let originals: HashMap<&str, &Target> =
            resolved.iter().map(|t| (t.id.as_str(), t)).collect();

        let targets: Vec<Target> = last_run
            .iter()
            .filter(|r| r.is_error())
            .map(|r| match originals.get(r.id.as_str()) {
                Some(target) => (*target).clone(),
                None => rebuild_target(mode, r),
            })
            .collect();

        if targets.is_empty() {
            return None;
        }

        info!("🔁 Retrying {} failed {}", targets.len(), mode);
        Some(RunConfiguration::from_targets(mode, targets))
    }
}

fn rebuild_target(mode: RunMode, result: &BatchResult) -> Target {
    match mode.target_kind() {
        TargetKind::Store => Target::store(result.id.clone(), result.label.clone()),
        TargetKind::Product => Target {
            id: result.id.clone(),
            label: result.label.clone(),
            kind: TargetKind::Product,
            store_id: None,
        },
    }
}
