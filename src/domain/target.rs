//! Targets of a bulk operation: stores and the products they own

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two disjoint kinds of target a run can work on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Store,
    Product,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store => write!(f, "store"),
            Self::Product => write!(f, "product"),
        }
    }
}

/// One store or product subject to a bulk operation.
///
/// Targets are read-only inputs to a run. A product target carries the id of
/// its owning store so runs can be limited per store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub label: String,
    pub kind: TargetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<String>,
}

impl Target {
    pub fn store(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind: TargetKind::Store,
            store_id: None,
        }
    }

    pub fn product(
        id: impl Into<String>,
        label: impl Into<String>,
        store_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind: TargetKind::Product,
            store_id: Some(store_id.into()),
        }
    }

    pub fn is_store(&self) -> bool {
        self.kind == TargetKind::Store
    }

    pub fn is_product(&self) -> bool {
        self.kind == TargetKind::Product
    }

    /// Grouping key used by per-store limits. Stores group under themselves.
    pub fn group_key(&self) -> &str {
        match self.kind {
            TargetKind::Store => &self.id,
            TargetKind::Product => self.store_id.as_deref().unwrap_or(""),
        }
    }
}
