//! Run configuration and per-item outcomes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use thiserror::Error;

use super::selection::Selection;
use super::target::{Target, TargetKind};

/// What a run cleans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Stores,
    Products,
}

impl RunMode {
    pub fn target_kind(self) -> TargetKind {
        match self {
            Self::Stores => TargetKind::Store,
            Self::Products => TargetKind::Product,
        }
    }

    /// Tag sent to the processing endpoint and stored as the log scope
    pub fn scope_tag(self) -> &'static str {
        match self {
            Self::Stores => "clean_stores",
            Self::Products => "clean_products",
        }
    }

    /// Noun used in human summaries
    pub fn noun(self) -> &'static str {
        match self {
            Self::Stores => "stores",
            Self::Products => "products",
        }
    }

    /// `noun()` agreeing with `count`
    pub fn noun_for(self, count: usize) -> &'static str {
        match (self, count) {
            (Self::Stores, 1) => "store",
            (Self::Products, 1) => "product",
            _ => self.noun(),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.noun())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunScope {
    All,
    Selected,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunConfigError {
    #[error("Selection holds {found} targets but the run mode is {mode}")]
    SelectionKindMismatch { mode: RunMode, found: TargetKind },

    #[error("Per-store limit only applies to products runs over all targets")]
    PerGroupLimitNotApplicable,

    #[error("Store filter only applies to products runs over all targets")]
    StoreFilterNotApplicable,

    #[error("Store filter must name at least one store")]
    EmptyStoreFilter,
}

/// Immutable description of a run, fixed when the run starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfiguration {
    mode: RunMode,
    scope: RunScope,
    selected_targets: Vec<Target>,
    /// Owning store ids a products run is restricted to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    store_filter: Option<Vec<String>>,
    per_group_limit: Option<NonZeroUsize>,
}

impl RunConfiguration {
    /// Every target of the mode's kind
    pub fn all(mode: RunMode) -> Self {
        Self {
            mode,
            scope: RunScope::All,
            selected_targets: Vec::new(),
            store_filter: None,
            per_group_limit: None,
        }
    }

    /// Exactly the hand-picked targets, in pick order
    pub fn selected(mode: RunMode, selection: Selection) -> Result<Self, RunConfigError> {
        if selection.kind() != mode.target_kind() {
            return Err(RunConfigError::SelectionKindMismatch {
                mode,
                found: selection.kind(),
            });
        }

        Ok(Self {
            mode,
            scope: RunScope::Selected,
            selected_targets: selection.into_targets(),
            store_filter: None,
            per_group_limit: None,
        })
    }

    /// Selected-scope configuration over an explicit target list.
    ///
    /// Used for retries, where the target set comes from a previous run rather
    /// than from a capped manual selection.
    pub fn from_targets(mode: RunMode, targets: Vec<Target>) -> Self {
        Self {
            mode,
            scope: RunScope::Selected,
            selected_targets: targets,
            store_filter: None,
            per_group_limit: None,
        }
    }

    /// Cap how many products are taken from each owning store
    pub fn with_per_group_limit(mut self, limit: NonZeroUsize) -> Result<Self, RunConfigError> {
        if self.mode != RunMode::Products || self.scope != RunScope::All {
            return Err(RunConfigError::PerGroupLimitNotApplicable);
        }
        self.per_group_limit = Some(limit);
        Ok(self)
    }

    /// Only take products owned by one of `store_ids`
    pub fn with_store_filter<I, S>(mut self, store_ids: I) -> Result<Self, RunConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.mode != RunMode::Products || self.scope != RunScope::All {
            return Err(RunConfigError::StoreFilterNotApplicable);
        }

        let mut stores: Vec<String> = Vec::new();
        for id in store_ids {
            let id = id.into();
            if !stores.contains(&id) {
                stores.push(id);
            }
        }
        if stores.is_empty() {
            return Err(RunConfigError::EmptyStoreFilter);
        }

        self.store_filter = Some(stores);
        Ok(self)
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn scope(&self) -> RunScope {
        self.scope
    }

    pub fn selected_targets(&self) -> &[Target] {
        &self.selected_targets
    }

    pub fn store_filter(&self) -> Option<&[String]> {
        self.store_filter.as_deref()
    }

    pub fn per_group_limit(&self) -> Option<NonZeroUsize> {
        self.per_group_limit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Success,
    Error,
}

/// Endpoint-specific extras attached to a result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMetadata {
    /// Upstream data source that served a store clean
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Whether descriptions were regenerated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptions_generated: Option<bool>,
}

impl BatchMetadata {
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.descriptions_generated.is_none()
    }
}

/// Outcome for one processed target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub id: String,
    pub label: String,
    pub status: BatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BatchMetadata>,
}

impl BatchResult {
    pub fn success(target: &Target, metadata: Option<BatchMetadata>) -> Self {
        Self {
            id: target.id.clone(),
            label: target.label.clone(),
            status: BatchStatus::Success,
            error_message: None,
            metadata: metadata.filter(|m| !m.is_empty()),
        }
    }

    pub fn failure(target: &Target, message: impl Into<String>) -> Self {
        Self {
            id: target.id.clone(),
            label: target.label.clone(),
            status: BatchStatus::Error,
            error_message: Some(message.into()),
            metadata: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == BatchStatus::Error
    }
}

/// Failed entry as shown in the result view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub id: String,
    pub label: String,
    pub error: String,
}

impl FailedItem {
    pub fn from_result(result: &BatchResult) -> Option<Self> {
        if !result.is_error() {
            return None;
        }
        Some(Self {
            id: result.id.clone(),
            label: result.label.clone(),
            error: result
                .error_message
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

/// Orchestrator phase as seen by presentation code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Configure,
    Confirm,
    Running,
    Complete,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configure => "configure",
            Self::Confirm => "confirm",
            Self::Running => "running",
            Self::Complete => "complete",
        };
        f.write_str(name)
    }
}
