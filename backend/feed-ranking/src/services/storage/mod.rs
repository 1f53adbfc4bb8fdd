//! Storage Module
//!
//! The collaborator that executes a [`QueryPlan`] against the item store.
//!
//! # Contract
//! - Bind every [`crate::models::ParamName`] from `plan.parameters`; never
//!   interpolate values into the query text
//! - Return one [`ScoredRow`] per admitted item, carrying a weight for every
//!   score term of the plan and the values of the plan's order columns
//! - Fail with a [`StorageError`]; the pipeline never retries
mod memory;

pub use memory::{InMemoryStore, StoredItem};

use crate::models::CandidatePredicate;
use crate::services::plan::QueryPlan;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StorageError {
    #[error("Ranking store timed out after {0:?}")]
    Timeout(Duration),

    #[error("Ranking store unreachable: {0}")]
    Connectivity(String),

    #[error("Ranking query failed: {0}")]
    Query(String),

    #[error("Malformed row for item {item_id}: {reason}")]
    MalformedRow { item_id: Uuid, reason: String },
}

impl StorageError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StorageError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// One candidate item as returned by the store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoredRow {
    pub item_id: Uuid,
    /// Weight per score term, keyed by factor key.
    pub weights: BTreeMap<String, f64>,
    /// Order column values, keyed by column (`items.published_at`).
    pub order_values: BTreeMap<String, f64>,
}

impl ScoredRow {
    pub fn new(item_id: Uuid) -> Self {
        Self {
            item_id,
            ..Self::default()
        }
    }

    pub fn with_weight(mut self, factor: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(factor.into(), weight);
        self
    }

    pub fn with_order_value(mut self, column: impl Into<String>, value: f64) -> Self {
        self.order_values.insert(column.into(), value);
        self
    }
}

#[async_trait]
pub trait RankingStore: Send + Sync {
    /// Ranks the candidates admitted by `candidates` according to `plan`.
    async fn execute(
        &self,
        plan: &QueryPlan,
        candidates: &CandidatePredicate,
    ) -> Result<Vec<ScoredRow>>;
}
