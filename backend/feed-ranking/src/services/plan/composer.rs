use super::joins::JoinComposer;
use super::metric::MetricExpr;
use super::order::OrderLever;
use super::relation::{ColumnRef, ITEMS_RELATION};
use super::QueryPlan;
use crate::models::{ParamName, ParamValue, ViewerContext};
use crate::services::factors::{FactorSpec, MatchRule, StepTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// One factor's conditional weight mapping inside the score expression:
/// `CASE metric <matches step> THEN weight ... ELSE fallback END`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreTerm {
    pub factor: String,
    pub metric: MetricExpr,
    pub aggregate: bool,
    pub cases: StepTable,
    pub match_rule: MatchRule,
    pub fallback: f64,
}

impl ScoreTerm {
    /// Weight for a raw metric value; a missing value takes the fallback.
    pub fn weight_for(&self, raw_value: Option<f64>) -> f64 {
        raw_value
            .and_then(|value| self.cases.lookup(value, self.match_rule))
            .unwrap_or(self.fallback)
    }
}

/// Product of every active factor's weight.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreExpression {
    pub product: Vec<ScoreTerm>,
}

impl ScoreExpression {
    pub fn factors(&self) -> impl Iterator<Item = &str> {
        self.product.iter().map(|term| term.factor.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.product.is_empty()
    }

    /// Multiplies the per-factor weights looked up through `weight_of`.
    ///
    /// Returns the key of the first factor without a weight. With no terms
    /// every item scores 1.0 and the tie-break chain decides the order.
    ///
    /// Weights are multiplied in factor key order, so the product is
    /// bit-identical however the factors were registered.
    pub fn combine<'a>(
        &'a self,
        mut weight_of: impl FnMut(&str) -> Option<f64>,
    ) -> std::result::Result<f64, &'a str> {
        let mut weights: Vec<(&str, f64)> = Vec::with_capacity(self.product.len());
        for term in &self.product {
            let weight = weight_of(&term.factor).ok_or(term.factor.as_str())?;
            weights.push((term.factor.as_str(), weight));
        }
        weights.sort_by(|a, b| a.0.cmp(b.0));

        Ok(weights.into_iter().fold(1.0, |score, (_, weight)| score * weight))
    }
}

/// Builds the abstract query plan for a set of active factors.
///
/// Pure: the same factors, order lever and viewer bindings always produce an
/// equal plan.
pub struct PlanComposer;

impl PlanComposer {
    pub fn compose(active: &[&FactorSpec], order: &OrderLever, viewer: &ViewerContext) -> QueryPlan {
        let composed = JoinComposer::compose(active.iter().copied());

        let mut group_keys: Vec<ColumnRef> = Vec::new();
        let mut product: Vec<ScoreTerm> = Vec::with_capacity(active.len());
        let mut parameters: BTreeMap<ParamName, ParamValue> = BTreeMap::new();

        for factor in active {
            let aliases = composed.aliases_for(factor.key());

            for key in factor.group_keys() {
                let key = key.resolve(aliases);
                if !group_keys.contains(&key) {
                    group_keys.push(key);
                }
            }

            let Some(metric) = factor.value_source() else {
                continue;
            };
            let metric = metric.resolve(aliases);
            product.push(ScoreTerm {
                factor: factor.key().to_string(),
                aggregate: metric.is_aggregate(),
                metric,
                cases: factor.step_table().clone(),
                match_rule: factor.match_rule(),
                fallback: factor.fallback_weight().unwrap_or(1.0),
            });

            for param in factor.required_parameters() {
                if let Some(value) = viewer.bound(param) {
                    parameters.insert(param, value);
                }
            }
        }

        let plan = QueryPlan {
            relation: ITEMS_RELATION.to_string(),
            joins: composed.joins,
            group_keys,
            score: ScoreExpression { product },
            order: order.terms(),
            parameters,
        };

        debug!(
            joins = plan.joins.len(),
            group_keys = plan.group_keys.len(),
            terms = plan.score.product.len(),
            order_lever = %order.name(),
            "Query plan composed"
        );

        plan
    }
}
