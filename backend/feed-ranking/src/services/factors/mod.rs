//! Factor Module
//!
//! Declarative scoring factors and the registry that holds them.
//!
//! # Architecture
//! - **Step tables**: value → weight lookup with floor or exact matching
//! - **Catalog**: built-in lever definitions (metric, joins, grouping)
//! - **Variant**: JSON document assigning weights to catalog levers
//! - **Registry**: validated, immutable factor set shared across requests
pub mod catalog;
pub mod registry;
pub mod step_table;
pub mod variant;

pub use registry::{evaluate, FactorRegistry};
pub use step_table::{linear_steps, MatchRule, StepTable};
pub use variant::{LeverWeights, LinearSteps, VariantConfig};

use crate::models::ParamName;
use crate::services::plan::{ColumnRef, JoinSpec, MetricExpr};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Malformed factor configuration detected at boot. Fatal.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("factor key must not be empty")]
    EmptyKey,

    #[error("duplicate factor key: {0}")]
    DuplicateKey(String),

    #[error("factor {key}: step thresholds must be strictly increasing (entry {index})")]
    NonMonotonicThresholds { key: String, index: usize },

    #[error("factor {0}: step table contains a non-finite value")]
    NonFiniteStep(String),

    #[error("factor {0}: fallback weight is missing")]
    MissingFallback(String),

    #[error("factor {0}: fallback weight must be finite")]
    NonFiniteFallback(String),

    #[error("factor {0}: no value source declared")]
    MissingValueSource(String),

    #[error("factor {key}: join {join} is declared twice")]
    DuplicateJoinName { key: String, join: String },

    #[error("factor {key}: reference to undeclared join {join}")]
    UnknownJoinReference { key: String, join: String },

    #[error("unknown lever: {0}")]
    UnknownLever(String),

    #[error("unknown factor: {0}")]
    UnknownFactor(String),

    #[error("unknown order lever: {0}")]
    UnknownOrderLever(String),

    #[error("lever {0}: declare either cases or linear steps, not both")]
    AmbiguousSteps(String),

    #[error("invalid variant document: {0}")]
    InvalidVariant(String),
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;

/// An enabled factor needs a parameter the viewer context does not bind.
///
/// The factor is left out of the composite; the rest of the score is
/// unaffected.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("factor {factor} skipped: parameter {parameter} is not bound for this viewer")]
pub struct ViewerContextError {
    pub factor: String,
    pub parameter: ParamName,
}

/// Documented domain of a factor's raw metric, e.g. `[0..∞)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: Option<f64>,
}

impl ValueRange {
    pub const fn at_least(min: f64) -> Self {
        Self { min, max: None }
    }

    pub const fn between(min: f64, max: f64) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }
}

impl fmt::Display for ValueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "[{}..{}]", self.min, max),
            None => write!(f, "[{}..∞)", self.min),
        }
    }
}

/// One scoring signal contributing a multiplicative weight.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorSpec {
    key: String,
    label: String,
    range: ValueRange,
    value_source: Option<MetricExpr>,
    step_table: StepTable,
    match_rule: MatchRule,
    fallback_weight: Option<f64>,
    requires_viewer: bool,
    joins: Vec<JoinSpec>,
    group_keys: Vec<ColumnRef>,
    enabled: bool,
}

impl FactorSpec {
    pub fn builder(key: impl Into<String>) -> FactorSpecBuilder {
        FactorSpecBuilder::new(key)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn range(&self) -> ValueRange {
        self.range
    }

    pub fn value_source(&self) -> Option<&MetricExpr> {
        self.value_source.as_ref()
    }

    pub fn step_table(&self) -> &StepTable {
        &self.step_table
    }

    pub fn match_rule(&self) -> MatchRule {
        self.match_rule
    }

    pub fn fallback_weight(&self) -> Option<f64> {
        self.fallback_weight
    }

    pub fn requires_viewer(&self) -> bool {
        self.requires_viewer
    }

    pub fn joins(&self) -> &[JoinSpec] {
        &self.joins
    }

    pub fn group_keys(&self) -> &[ColumnRef] {
        &self.group_keys
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the factor takes part in a request with or without a viewer.
    pub fn is_active_for(&self, viewer_present: bool) -> bool {
        self.enabled && (!self.requires_viewer || viewer_present)
    }

    /// Parameters referenced by the value source and joins, deduplicated in
    /// first-seen order.
    pub fn required_parameters(&self) -> Vec<ParamName> {
        let mut params: Vec<ParamName> = Vec::new();
        let from_joins = self.joins.iter().flat_map(|join| join.parameters());
        let from_metric = self
            .value_source
            .iter()
            .flat_map(|metric| metric.parameters());

        for param in from_joins.chain(from_metric) {
            if !params.contains(&param) {
                params.push(param);
            }
        }
        params
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

#[derive(Debug, Clone)]
pub struct FactorSpecBuilder {
    spec: FactorSpec,
}

impl FactorSpecBuilder {
    fn new(key: impl Into<String>) -> Self {
        Self {
            spec: FactorSpec {
                key: key.into(),
                label: String::new(),
                range: ValueRange::at_least(0.0),
                value_source: None,
                step_table: StepTable::default(),
                match_rule: MatchRule::default(),
                fallback_weight: None,
                requires_viewer: false,
                joins: Vec::new(),
                group_keys: Vec::new(),
                enabled: true,
            },
        }
    }

    pub fn key(&self) -> &str {
        &self.spec.key
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.spec.label = label.into();
        self
    }

    pub fn range(mut self, range: ValueRange) -> Self {
        self.spec.range = range;
        self
    }

    pub fn value_source(mut self, metric: MetricExpr) -> Self {
        self.spec.value_source = Some(metric);
        self
    }

    pub fn step_table(mut self, table: StepTable) -> Self {
        self.spec.step_table = table;
        self
    }

    pub fn cases(self, cases: Vec<(f64, f64)>) -> Self {
        self.step_table(StepTable::new(cases))
    }

    pub fn match_rule(mut self, rule: MatchRule) -> Self {
        self.spec.match_rule = rule;
        self
    }

    pub fn fallback(mut self, weight: f64) -> Self {
        self.spec.fallback_weight = Some(weight);
        self
    }

    pub fn requires_viewer(mut self, required: bool) -> Self {
        self.spec.requires_viewer = required;
        self
    }

    pub fn join(mut self, join: JoinSpec) -> Self {
        self.spec.joins.push(join);
        self
    }

    pub fn group_by(mut self, column: ColumnRef) -> Self {
        self.spec.group_keys.push(column);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.spec.enabled = enabled;
        self
    }

    pub fn build(self) -> FactorSpec {
        self.spec
    }
}
