//! Structured join and column vocabulary.
//!
//! Joins are declared as data (relation, kind, conditions) instead of SQL
//! fragments. Parameters appear as [`Operand::Param`] and are bound by the
//! storage collaborator, never interpolated.

use crate::models::ParamName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the base relation every plan ranks.
pub const ITEMS_RELATION: &str = "items";

/// Where a column lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// The base items relation.
    Item,
    /// The join whose condition is being declared.
    Current,
    /// Another join, by declared name (before composition) or alias (after).
    Join(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    pub source: Source,
    pub column: String,
}

impl ColumnRef {
    pub fn item(column: impl Into<String>) -> Self {
        Self {
            source: Source::Item,
            column: column.into(),
        }
    }

    pub fn current(column: impl Into<String>) -> Self {
        Self {
            source: Source::Current,
            column: column.into(),
        }
    }

    pub fn join(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            source: Source::Join(name.into()),
            column: column.into(),
        }
    }

    /// Name of the join this column references, if any.
    pub fn join_name(&self) -> Option<&str> {
        match &self.source {
            Source::Join(name) => Some(name),
            _ => None,
        }
    }

    /// Rewrites a join reference through `aliases`. Unknown names are kept.
    pub fn resolve(&self, aliases: &BTreeMap<String, String>) -> Self {
        match &self.source {
            Source::Join(name) => Self {
                source: Source::Join(aliases.get(name).cloned().unwrap_or_else(|| name.clone())),
                column: self.column.clone(),
            },
            _ => self.clone(),
        }
    }

    /// Replaces [`Source::Current`] with the given alias.
    fn bind_current(&self, alias: &str) -> Self {
        match &self.source {
            Source::Current => Self::join(alias, self.column.clone()),
            _ => self.clone(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Source::Item => write!(f, "{}.{}", ITEMS_RELATION, self.column),
            Source::Current => write!(f, "{}", self.column),
            Source::Join(alias) => write!(f, "{}.{}", alias, self.column),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn apply(&self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Column(ColumnRef),
    Param(ParamName),
    Text(String),
    Integer(i64),
    Bool(bool),
}

/// `column op operand`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Condition {
    pub column: ColumnRef,
    pub op: CompareOp,
    pub operand: Operand,
}

impl Condition {
    fn columns(&self) -> impl Iterator<Item = &ColumnRef> {
        let operand = match &self.operand {
            Operand::Column(column) => Some(column),
            _ => None,
        };
        std::iter::once(&self.column).chain(operand)
    }

    fn map_columns(&self, f: impl Fn(&ColumnRef) -> ColumnRef) -> Self {
        Self {
            column: f(&self.column),
            op: self.op,
            operand: match &self.operand {
                Operand::Column(column) => Operand::Column(f(column)),
                other => other.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    LeftOuter,
    Inner,
}

/// How the composer names a join in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasStrategy {
    /// Use the declared name, suffixed when another join already holds it.
    Named,
    /// `{relation}_{n}` where `n` is the join's position in the plan.
    Positional,
}

/// An auxiliary relation a factor needs to compute its raw metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub name: String,
    pub relation: String,
    pub kind: JoinKind,
    pub alias: AliasStrategy,
    pub on: Vec<Condition>,
}

impl JoinSpec {
    pub fn left_outer(relation: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(JoinKind::LeftOuter, relation, name)
    }

    pub fn inner(relation: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(JoinKind::Inner, relation, name)
    }

    fn new(kind: JoinKind, relation: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relation: relation.into(),
            kind,
            alias: AliasStrategy::Named,
            on: Vec::new(),
        }
    }

    pub fn positional(mut self) -> Self {
        self.alias = AliasStrategy::Positional;
        self
    }

    pub fn on(mut self, column: ColumnRef, op: CompareOp, operand: Operand) -> Self {
        self.on.push(Condition {
            column,
            op,
            operand,
        });
        self
    }

    pub fn on_column(self, column: ColumnRef, op: CompareOp, other: ColumnRef) -> Self {
        self.on(column, op, Operand::Column(other))
    }

    pub fn on_param(self, column: ColumnRef, op: CompareOp, param: ParamName) -> Self {
        self.on(column, op, Operand::Param(param))
    }

    pub fn on_text(self, column: ColumnRef, value: impl Into<String>) -> Self {
        self.on(column, CompareOp::Eq, Operand::Text(value.into()))
    }

    pub fn on_bool(self, column: ColumnRef, value: bool) -> Self {
        self.on(column, CompareOp::Eq, Operand::Bool(value))
    }

    pub fn on_integer(self, column: ColumnRef, op: CompareOp, value: i64) -> Self {
        self.on(column, op, Operand::Integer(value))
    }

    /// Names of other joins this join's conditions reference.
    pub fn referenced_joins(&self) -> impl Iterator<Item = &str> {
        self.on
            .iter()
            .flat_map(|condition| condition.columns())
            .filter_map(|column| column.join_name())
    }

    pub fn parameters(&self) -> impl Iterator<Item = ParamName> + '_ {
        self.on.iter().filter_map(|condition| match condition.operand {
            Operand::Param(param) => Some(param),
            _ => None,
        })
    }

    /// Canonical signature with join references rewritten through `aliases`.
    ///
    /// Two joins with the same signature attach the same rows and collapse
    /// into one plan entry.
    pub fn signature(&self, aliases: &BTreeMap<String, String>) -> JoinSignature {
        let mut on: Vec<Condition> = self
            .on
            .iter()
            .map(|condition| condition.map_columns(|column| column.resolve(aliases)))
            .collect();
        on.sort();

        JoinSignature {
            relation: self.relation.clone(),
            kind: self.kind,
            on,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinSignature {
    relation: String,
    kind: JoinKind,
    on: Vec<Condition>,
}

/// A join as it appears in a composed plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedJoin {
    pub alias: String,
    pub relation: String,
    pub kind: JoinKind,
    pub on: Vec<Condition>,
}

impl PlannedJoin {
    pub(crate) fn from_spec(
        spec: &JoinSpec,
        alias: String,
        aliases: &BTreeMap<String, String>,
    ) -> Self {
        let on = spec
            .on
            .iter()
            .map(|condition| {
                condition.map_columns(|column| column.resolve(aliases).bind_current(&alias))
            })
            .collect();

        Self {
            alias,
            relation: spec.relation.clone(),
            kind: spec.kind,
            on,
        }
    }
}
