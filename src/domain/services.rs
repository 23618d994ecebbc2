//! Backend collaborator interfaces
//!
//! The processing endpoints are black boxes: the orchestrator only relies on
//! the contracts below. Every call receives the run's cancellation token so an
//! in-flight request can be aborted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::run::{BatchMetadata, BatchStatus};

/// Failure of a whole request, as opposed to a per-item failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("Request cancelled")]
    Cancelled,

    #[error("HTTP request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl EndpointError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Per-id outcome reported by the products endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCleanOutcome {
    #[serde(rename = "productId", alias = "product_id")]
    pub product_id: String,
    pub status: BatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptions_generated: Option<bool>,
}

impl ProductCleanOutcome {
    pub fn metadata(&self) -> Option<BatchMetadata> {
        self.descriptions_generated.map(|generated| BatchMetadata {
            source: None,
            descriptions_generated: Some(generated),
        })
    }
}

/// Outcome reported by the stores endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCleanOutcome {
    pub status: BatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptions_generated: Option<bool>,
}

impl StoreCleanOutcome {
    pub fn metadata(&self) -> BatchMetadata {
        BatchMetadata {
            source: self.source.clone(),
            descriptions_generated: self.descriptions_generated,
        }
    }
}

/// Batched product clean-up endpoint
#[async_trait]
pub trait ProductCleaningService: Send + Sync {
    /// Results may come back in any order; callers re-associate by id.
    async fn clean_products(
        &self,
        product_ids: &[String],
        scope: &str,
        cancellation_token: &CancellationToken,
    ) -> Result<Vec<ProductCleanOutcome>, EndpointError>;
}

/// Single-store clean-up endpoint
#[async_trait]
pub trait StoreCleaningService: Send + Sync {
    async fn clean_store(
        &self,
        store_id: &str,
        cancellation_token: &CancellationToken,
    ) -> Result<StoreCleanOutcome, EndpointError>;
}
