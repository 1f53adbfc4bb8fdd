use super::relation::{ColumnRef, CompareOp};
use crate::models::ParamName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One band of a [`MetricExpr::Banded`] mapping. Bands are tested in order
/// and the first whose comparison holds wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub op: CompareOp,
    pub bound: ParamName,
    pub value: f64,
}

impl Band {
    pub fn new(op: CompareOp, bound: ParamName, value: f64) -> Self {
        Self { op, bound, value }
    }
}

/// Structured description of how a factor's raw metric is computed.
///
/// The storage collaborator translates these into its own query language;
/// aggregate variants are computed per item over the plan's joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricExpr {
    /// Plain column value.
    Column(ColumnRef),
    /// Boolean column mapped to 1 / 0.
    Flag(ColumnRef),
    /// Whole days between the column's date and `now`.
    DaysSince(ColumnRef),
    /// Whole days between the latest value of the column and `now`.
    DaysSinceLatest(ColumnRef),
    /// Number of non-null values of the column.
    Count(ColumnRef),
    /// Sum of the column, nulls counted as zero.
    SumOrZero(ColumnRef),
    /// A setting of the viewer, or the parameter when the viewer has none.
    ViewerSetting {
        relation: String,
        column: String,
        default: ParamName,
    },
    /// `round(abs(left - right))`
    RoundedAbsDiff {
        left: Box<MetricExpr>,
        right: Box<MetricExpr>,
    },
    /// `least(inner, cap)`
    AtMost { inner: Box<MetricExpr>, cap: f64 },
    /// `greatest(inner, floor)`
    AtLeast { inner: Box<MetricExpr>, floor: f64 },
    /// Maps a column onto discrete values through parameterised bands.
    Banded {
        column: ColumnRef,
        bands: Vec<Band>,
        otherwise: f64,
    },
}

impl MetricExpr {
    /// Whether the store must aggregate over joined rows to compute this.
    pub fn is_aggregate(&self) -> bool {
        match self {
            MetricExpr::Count(_) | MetricExpr::SumOrZero(_) | MetricExpr::DaysSinceLatest(_) => {
                true
            }
            MetricExpr::RoundedAbsDiff { left, right } => {
                left.is_aggregate() || right.is_aggregate()
            }
            MetricExpr::AtMost { inner, .. } | MetricExpr::AtLeast { inner, .. } => {
                inner.is_aggregate()
            }
            MetricExpr::Column(_)
            | MetricExpr::Flag(_)
            | MetricExpr::DaysSince(_)
            | MetricExpr::ViewerSetting { .. }
            | MetricExpr::Banded { .. } => false,
        }
    }

    /// Parameters that must be bound to evaluate this expression.
    pub fn parameters(&self) -> Vec<ParamName> {
        let mut params = Vec::new();
        self.collect_parameters(&mut params);
        params
    }

    fn collect_parameters(&self, params: &mut Vec<ParamName>) {
        match self {
            MetricExpr::DaysSince(_) | MetricExpr::DaysSinceLatest(_) => params.push(ParamName::Now),
            MetricExpr::ViewerSetting { default, .. } => {
                params.push(ParamName::ViewerId);
                params.push(*default);
            }
            MetricExpr::RoundedAbsDiff { left, right } => {
                left.collect_parameters(params);
                right.collect_parameters(params);
            }
            MetricExpr::AtMost { inner, .. } | MetricExpr::AtLeast { inner, .. } => {
                inner.collect_parameters(params)
            }
            MetricExpr::Banded { bands, .. } => params.extend(bands.iter().map(|band| band.bound)),
            MetricExpr::Column(_)
            | MetricExpr::Flag(_)
            | MetricExpr::Count(_)
            | MetricExpr::SumOrZero(_) => {}
        }
    }

    /// Column references of the expression, in declaration order.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        match self {
            MetricExpr::Column(column)
            | MetricExpr::Flag(column)
            | MetricExpr::DaysSince(column)
            | MetricExpr::DaysSinceLatest(column)
            | MetricExpr::Count(column)
            | MetricExpr::SumOrZero(column)
            | MetricExpr::Banded { column, .. } => vec![column],
            MetricExpr::ViewerSetting { .. } => Vec::new(),
            MetricExpr::RoundedAbsDiff { left, right } => {
                let mut columns = left.columns();
                columns.extend(right.columns());
                columns
            }
            MetricExpr::AtMost { inner, .. } | MetricExpr::AtLeast { inner, .. } => inner.columns(),
        }
    }

    /// Rewrites join references through `aliases`.
    pub fn resolve(&self, aliases: &BTreeMap<String, String>) -> Self {
        match self {
            MetricExpr::Column(column) => MetricExpr::Column(column.resolve(aliases)),
            MetricExpr::Flag(column) => MetricExpr::Flag(column.resolve(aliases)),
            MetricExpr::DaysSince(column) => MetricExpr::DaysSince(column.resolve(aliases)),
            MetricExpr::DaysSinceLatest(column) => {
                MetricExpr::DaysSinceLatest(column.resolve(aliases))
            }
            MetricExpr::Count(column) => MetricExpr::Count(column.resolve(aliases)),
            MetricExpr::SumOrZero(column) => MetricExpr::SumOrZero(column.resolve(aliases)),
            MetricExpr::ViewerSetting { .. } => self.clone(),
            MetricExpr::RoundedAbsDiff { left, right } => MetricExpr::RoundedAbsDiff {
                left: Box::new(left.resolve(aliases)),
                right: Box::new(right.resolve(aliases)),
            },
            MetricExpr::AtMost { inner, cap } => MetricExpr::AtMost {
                inner: Box::new(inner.resolve(aliases)),
                cap: *cap,
            },
            MetricExpr::AtLeast { inner, floor } => MetricExpr::AtLeast {
                inner: Box::new(inner.resolve(aliases)),
                floor: *floor,
            },
            MetricExpr::Banded {
                column,
                bands,
                otherwise,
            } => MetricExpr::Banded {
                column: column.resolve(aliases),
                bands: bands.clone(),
                otherwise: *otherwise,
            },
        }
    }
}
