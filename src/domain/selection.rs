//! Ordered, unique, capped set of manually picked targets

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::target::{Target, TargetKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Selection holds {expected} targets, got {found} target '{id}'")]
    KindMismatch {
        expected: TargetKind,
        found: TargetKind,
        id: String,
    },

    #[error("Selection limit of {limit} {kind} targets reached")]
    LimitReached { kind: TargetKind, limit: usize },
}

/// Targets picked by hand, in pick order.
///
/// Re-selecting an id already present is a no-op, so the set never holds
/// duplicates and never grows on a repeat pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    kind: TargetKind,
    limit: usize,
    targets: Vec<Target>,
}

impl Selection {
    pub fn new(kind: TargetKind, limit: usize) -> Self {
        Self {
            kind,
            limit,
            targets: Vec::new(),
        }
    }

    /// Add a target. Returns `Ok(false)` when the id was already selected.
    pub fn insert(&mut self, target: Target) -> Result<bool, SelectionError> {
        if target.kind != self.kind {
            return Err(SelectionError::KindMismatch {
                expected: self.kind,
                found: target.kind,
                id: target.id,
            });
        }

        if self.contains(&target.id) {
            return Ok(false);
        }

        if self.targets.len() >= self.limit {
            return Err(SelectionError::LimitReached {
                kind: self.kind,
                limit: self.limit,
            });
        }

        self.targets.push(target);
        Ok(true)
    }

    /// Remove a target by id. Returns whether something was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.targets.len();
        self.targets.retain(|t| t.id != id);
        before != self.targets.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.targets.iter().any(|t| t.id == id)
    }

    pub fn clear(&mut self) {
        self.targets.clear();
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn ids(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.id.as_str()).collect()
    }

    pub fn into_targets(self) -> Vec<Target> {
        self.targets
    }
}
