//! Query Plan Module
//!
//! Turns an active factor set into an abstract, backend-neutral query plan.
//!
//! # Workflow
//! 1. `JoinComposer` deduplicates and aliases the joins the factors need
//! 2. `PlanComposer` builds the product-of-weights score expression, the
//!    union of group keys and the deterministic order chain
//! 3. A storage collaborator translates the plan into its own query language
pub mod composer;
pub mod joins;
pub mod metric;
pub mod order;
pub mod relation;

pub use composer::{PlanComposer, ScoreExpression, ScoreTerm};
pub use joins::{ComposedJoins, JoinComposer};
pub use metric::{Band, MetricExpr};
pub use order::{
    compare_by_chain, compare_values, Direction, OrderKey, OrderLever, OrderTerm, SortView,
};
pub use relation::{
    AliasStrategy, ColumnRef, CompareOp, Condition, JoinKind, JoinSpec, Operand, PlannedJoin,
    Source, ITEMS_RELATION,
};

use crate::models::{ParamName, ParamValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything a store needs to rank one request's candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub relation: String,
    pub joins: Vec<PlannedJoin>,
    pub group_keys: Vec<ColumnRef>,
    pub score: ScoreExpression,
    pub order: Vec<OrderTerm>,
    pub parameters: BTreeMap<ParamName, ParamValue>,
}

impl QueryPlan {
    /// Whether the store has to group rows per item (aggregate metrics or
    /// explicit group keys).
    pub fn requires_grouping(&self) -> bool {
        !self.group_keys.is_empty() || self.score.product.iter().any(|term| term.aggregate)
    }

    /// Item columns the store must return with each row for ordering.
    pub fn order_columns(&self) -> impl Iterator<Item = &ColumnRef> {
        self.order.iter().filter_map(|term| match &term.key {
            OrderKey::Column(column) => Some(column),
            _ => None,
        })
    }
}
