use super::{ConfigurationError, FactorSpec, Result};
use crate::services::plan::{ColumnRef, OrderLever};
use std::collections::HashSet;
use tracing::{debug, info};

/// Weight of `raw_value` under the factor's step table, or its fallback when
/// no entry qualifies.
///
/// Registered factors always carry a fallback; an unvalidated spec without
/// one evaluates to the neutral weight 1.0.
pub fn evaluate(spec: &FactorSpec, raw_value: f64) -> f64 {
    spec.step_table()
        .lookup(raw_value, spec.match_rule())
        .or(spec.fallback_weight())
        .unwrap_or(1.0)
}

/// Validated, immutable catalog of scoring factors plus the tie-break chain.
///
/// Built once at process start and shared behind an `Arc`; there is no way
/// to modify a registry after it has been handed to a pipeline. Rebuilding
/// means constructing a new instance.
#[derive(Debug, Clone, Default)]
pub struct FactorRegistry {
    factors: Vec<FactorSpec>,
    order: OrderLever,
}

impl FactorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(mut self, order: OrderLever) -> Self {
        self.order = order;
        self
    }

    /// Builds a registry from factors in declared order.
    pub fn from_specs(specs: impl IntoIterator<Item = FactorSpec>) -> Result<Self> {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    /// Validates and appends a factor.
    pub fn register(&mut self, spec: FactorSpec) -> Result<()> {
        validate(&spec)?;

        if self.get(spec.key()).is_some() {
            return Err(ConfigurationError::DuplicateKey(spec.key().to_string()));
        }

        debug!(
            factor = %spec.key(),
            steps = spec.step_table().len(),
            enabled = spec.enabled(),
            requires_viewer = spec.requires_viewer(),
            "Factor registered"
        );

        self.factors.push(spec);
        Ok(())
    }

    /// Returns a new registry with the named factors disabled.
    pub fn with_disabled<S: AsRef<str>>(mut self, keys: &[S]) -> Result<Self> {
        for key in keys {
            let key = key.as_ref();
            let spec = self
                .factors
                .iter_mut()
                .find(|spec| spec.key() == key)
                .ok_or_else(|| ConfigurationError::UnknownFactor(key.to_string()))?;
            spec.set_enabled(false);
            info!(factor = %key, "Factor disabled by configuration");
        }
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&FactorSpec> {
        self.factors.iter().find(|spec| spec.key() == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FactorSpec> {
        self.factors.iter()
    }

    /// Enabled factors usable with or without a viewer, in declared order.
    pub fn active(&self, viewer_present: bool) -> impl Iterator<Item = &FactorSpec> {
        self.factors
            .iter()
            .filter(move |spec| spec.is_active_for(viewer_present))
    }

    pub fn order(&self) -> &OrderLever {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}

fn validate(spec: &FactorSpec) -> Result<()> {
    let key = spec.key();
    if key.trim().is_empty() {
        return Err(ConfigurationError::EmptyKey);
    }

    let table = spec.step_table();
    if !table.is_finite() {
        return Err(ConfigurationError::NonFiniteStep(key.to_string()));
    }
    if let Some(index) = table.first_non_increasing() {
        return Err(ConfigurationError::NonMonotonicThresholds {
            key: key.to_string(),
            index,
        });
    }

    match spec.fallback_weight() {
        None => return Err(ConfigurationError::MissingFallback(key.to_string())),
        Some(weight) if !weight.is_finite() => {
            return Err(ConfigurationError::NonFiniteFallback(key.to_string()))
        }
        Some(_) => {}
    }

    let metric = spec
        .value_source()
        .ok_or_else(|| ConfigurationError::MissingValueSource(key.to_string()))?;

    // Joins may only reference joins declared before them in the same factor.
    let mut declared: HashSet<&str> = HashSet::new();
    for join in spec.joins() {
        if let Some(unknown) = join.referenced_joins().find(|name| !declared.contains(name)) {
            return Err(ConfigurationError::UnknownJoinReference {
                key: key.to_string(),
                join: unknown.to_string(),
            });
        }
        if !declared.insert(join.name.as_str()) {
            return Err(ConfigurationError::DuplicateJoinName {
                key: key.to_string(),
                join: join.name.clone(),
            });
        }
    }

    let outside_joins = metric
        .columns()
        .into_iter()
        .chain(spec.group_keys().iter())
        .filter_map(ColumnRef::join_name)
        .find(|name| !declared.contains(name));
    if let Some(unknown) = outside_joins {
        return Err(ConfigurationError::UnknownJoinReference {
            key: key.to_string(),
            join: unknown.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::factors::{MatchRule, StepTable};
    use crate::services::plan::{CompareOp, JoinSpec, MetricExpr};

    fn comments_count() -> FactorSpec {
        FactorSpec::builder("comments_count")
            .value_source(MetricExpr::Column(ColumnRef::item("comments_count")))
            .cases(vec![(0.0, 0.8), (1.0, 0.82), (2.0, 0.84)])
            .fallback(1.0)
            .build()
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = FactorRegistry::new();
        registry.register(comments_count()).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("comments_count").is_some());
        assert!(registry.get("daily_decay").is_none());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut registry = FactorRegistry::new();
        registry.register(comments_count()).unwrap();

        assert_eq!(
            registry.register(comments_count()),
            Err(ConfigurationError::DuplicateKey("comments_count".to_string()))
        );
    }

    #[test]
    fn test_non_monotonic_thresholds_rejected() {
        let spec = FactorSpec::builder("daily_decay")
            .value_source(MetricExpr::DaysSince(ColumnRef::item("published_at")))
            .cases(vec![(0.0, 1.0), (2.0, 0.99), (1.0, 0.98)])
            .fallback(0.9)
            .build();

        assert_eq!(
            FactorRegistry::new().register(spec),
            Err(ConfigurationError::NonMonotonicThresholds {
                key: "daily_decay".to_string(),
                index: 2,
            })
        );
    }

    #[test]
    fn test_missing_fallback_rejected() {
        let spec = FactorSpec::builder("public_reactions")
            .value_source(MetricExpr::Column(ColumnRef::item("public_reactions_count")))
            .cases(vec![(0.0, 0.9)])
            .build();

        assert_eq!(
            FactorRegistry::new().register(spec),
            Err(ConfigurationError::MissingFallback("public_reactions".to_string()))
        );
    }

    #[test]
    fn test_empty_key_and_missing_source_rejected() {
        let empty = FactorSpec::builder(" ").fallback(1.0).build();
        assert_eq!(
            FactorRegistry::new().register(empty),
            Err(ConfigurationError::EmptyKey)
        );

        let sourceless = FactorSpec::builder("featured_article").fallback(1.0).build();
        assert_eq!(
            FactorRegistry::new().register(sourceless),
            Err(ConfigurationError::MissingValueSource("featured_article".to_string()))
        );
    }

    #[test]
    fn test_forward_join_reference_rejected() {
        let spec = FactorSpec::builder("comments_count_by_those_followed")
            .requires_viewer(true)
            .value_source(MetricExpr::Count(ColumnRef::join("comments_by_followed", "id")))
            .join(JoinSpec::left_outer("comments", "comments_by_followed").on_column(
                ColumnRef::join("followed_user", "followable_id"),
                CompareOp::Eq,
                ColumnRef::current("user_id"),
            ))
            .fallback(1.0)
            .build();

        assert_eq!(
            FactorRegistry::new().register(spec),
            Err(ConfigurationError::UnknownJoinReference {
                key: "comments_count_by_those_followed".to_string(),
                join: "followed_user".to_string(),
            })
        );
    }

    #[test]
    fn test_metric_referencing_undeclared_join_rejected() {
        let spec = FactorSpec::builder("following_org")
            .value_source(MetricExpr::Count(ColumnRef::join("followed_org", "follower_id")))
            .fallback(1.0)
            .build();

        assert!(matches!(
            FactorRegistry::new().register(spec),
            Err(ConfigurationError::UnknownJoinReference { .. })
        ));
    }

    #[test]
    fn test_evaluate_uses_fallback() {
        let spec = FactorSpec::builder("daily_decay")
            .value_source(MetricExpr::DaysSince(ColumnRef::item("published_at")))
            .step_table(StepTable::new(vec![(0.0, 1.0), (1.0, 0.99), (2.0, 0.985)]))
            .fallback(0.9)
            .build();

        assert_eq!(evaluate(&spec, 0.0), 1.0);
        assert_eq!(evaluate(&spec, 2.0), 0.985);
        assert_eq!(evaluate(&spec, -3.0), 0.9);
        // Floor semantics carry the last step forward.
        assert_eq!(evaluate(&spec, 15.0), 0.985);

        let exact = FactorSpec::builder("daily_decay")
            .value_source(MetricExpr::DaysSince(ColumnRef::item("published_at")))
            .cases(vec![(0.0, 1.0), (1.0, 0.99), (2.0, 0.985)])
            .match_rule(MatchRule::Exact)
            .fallback(0.9)
            .build();
        assert_eq!(evaluate(&exact, 15.0), 0.9);
    }

    #[test]
    fn test_with_disabled() {
        let registry = FactorRegistry::from_specs(vec![comments_count()])
            .unwrap()
            .with_disabled(&["comments_count"])
            .unwrap();

        assert_eq!(registry.active(true).count(), 0);
        assert!(!registry.get("comments_count").unwrap().enabled());

        let unknown = FactorRegistry::new().with_disabled(&["nope"]);
        assert_eq!(
            unknown.unwrap_err(),
            ConfigurationError::UnknownFactor("nope".to_string())
        );
    }
}
