use super::catalog;
use super::{linear_steps, ConfigurationError, FactorRegistry, FactorSpec, FactorSpecBuilder};
use super::{MatchRule, Result, StepTable};
use crate::services::plan::{order::RELEVANCY_SCORE_AND_PUBLICATION_DATE, OrderLever};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

const BUILTIN_VARIANT: &str = include_str!("../../../config/variants/original.json");

/// Linear step rule expanded at load time: `(n, base + step * n)` for
/// `n` in `from..=to`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinearSteps {
    pub from: i64,
    pub to: i64,
    pub base: f64,
    pub step: f64,
}

/// Weights a variant assigns to one catalog lever.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeverWeights {
    #[serde(default)]
    pub cases: Vec<(f64, f64)>,
    #[serde(default)]
    pub linear: Option<LinearSteps>,
    #[serde(default)]
    pub fallback: Option<f64>,
    #[serde(default, rename = "match")]
    pub match_rule: Option<MatchRule>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

fn default_order_by() -> String {
    RELEVANCY_SCORE_AND_PUBLICATION_DATE.to_string()
}

impl LeverWeights {
    fn apply(&self, lever: FactorSpecBuilder) -> Result<FactorSpec> {
        if self.linear.is_some() && !self.cases.is_empty() {
            return Err(ConfigurationError::AmbiguousSteps(lever.key().to_string()));
        }

        let table = match &self.linear {
            Some(rule) => linear_steps(rule.from..=rule.to, rule.base, rule.step),
            None => StepTable::new(self.cases.clone()),
        };

        let mut lever = lever.step_table(table).enabled(self.enabled);
        if let Some(rule) = self.match_rule {
            lever = lever.match_rule(rule);
        }
        if let Some(fallback) = self.fallback {
            lever = lever.fallback(fallback);
        }
        Ok(lever.build())
    }
}

/// Declarative feed configuration: which catalog levers take part, with
/// which weights, and which order lever breaks ties.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_order_by")]
    pub order_by: String,
    pub levers: BTreeMap<String, LeverWeights>,
}

impl VariantConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ConfigurationError::InvalidVariant(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::InvalidVariant(format!("{}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// The variant compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_VARIANT)
    }

    /// Validates the variant against the catalog and builds the registry.
    ///
    /// Factors keep catalog declaration order regardless of the order levers
    /// appear in the document.
    pub fn into_registry(&self) -> Result<FactorRegistry> {
        if let Some(unknown) = self.levers.keys().find(|key| catalog::lever(key).is_none()) {
            return Err(ConfigurationError::UnknownLever(unknown.clone()));
        }

        let order = OrderLever::named(&self.order_by)
            .ok_or_else(|| ConfigurationError::UnknownOrderLever(self.order_by.clone()))?;

        let mut registry = FactorRegistry::new().with_order(order);
        for lever in catalog::levers() {
            if let Some(weights) = self.levers.get(lever.key()) {
                registry.register(weights.apply(lever)?)?;
            }
        }

        info!(
            variant = %self.name,
            factors = registry.len(),
            enabled = registry.iter().filter(|spec| spec.enabled()).count(),
            order_by = %registry.order().name(),
            "Feed variant loaded"
        );

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::factors::evaluate;

    #[test]
    fn test_builtin_variant_loads() {
        let registry = VariantConfig::builtin().unwrap().into_registry().unwrap();

        assert!(registry.get("daily_decay").is_some());
        assert!(!registry.get("comments_score").unwrap().enabled());
        assert_eq!(registry.order().name(), "relevancy_score_and_publication_date");

        let keys: Vec<&str> = registry.iter().map(|spec| spec.key()).collect();
        assert_eq!(keys[0], "comments_count_by_those_followed");
        assert_eq!(keys[1], "comments_count");
    }

    #[test]
    fn test_linear_steps_expand() {
        let registry = VariantConfig::builtin().unwrap().into_registry().unwrap();
        let comments = registry.get("comments_count").unwrap();

        assert_eq!(comments.step_table().len(), 10);
        assert!((evaluate(comments, 3.0) - 0.86).abs() < 1e-12);
        assert_eq!(evaluate(comments, 12.0), 1.0);
    }

    #[test]
    fn test_unknown_lever_rejected() {
        let json = r#"{ "name": "bad", "levers": { "random_boost": { "fallback": 1.0 } } }"#;
        let err = VariantConfig::from_json(json).unwrap().into_registry().unwrap_err();

        assert_eq!(err, ConfigurationError::UnknownLever("random_boost".to_string()));
    }

    #[test]
    fn test_unknown_order_lever_rejected() {
        let json = r#"{ "name": "bad", "order_by": "random", "levers": {} }"#;
        let err = VariantConfig::from_json(json).unwrap().into_registry().unwrap_err();

        assert_eq!(err, ConfigurationError::UnknownOrderLever("random".to_string()));
    }

    #[test]
    fn test_missing_fallback_rejected() {
        let json = r#"{ "name": "bad", "levers": { "daily_decay": { "cases": [[0, 1.0]] } } }"#;
        let err = VariantConfig::from_json(json).unwrap().into_registry().unwrap_err();

        assert_eq!(err, ConfigurationError::MissingFallback("daily_decay".to_string()));
    }

    #[test]
    fn test_cases_and_linear_are_exclusive() {
        let json = r#"{
            "name": "bad",
            "levers": {
                "comments_count": {
                    "cases": [[0, 1.0]],
                    "linear": { "from": 0, "to": 3, "base": 0.8, "step": 0.1 },
                    "fallback": 1.0
                }
            }
        }"#;
        let err = VariantConfig::from_json(json).unwrap().into_registry().unwrap_err();

        assert_eq!(err, ConfigurationError::AmbiguousSteps("comments_count".to_string()));
    }

    #[test]
    fn test_match_rule_override() {
        let json = r#"{
            "name": "floor",
            "levers": {
                "daily_decay": { "cases": [[0, 1.0], [7, 0.9]], "fallback": 0.8, "match": "floor" }
            }
        }"#;
        let registry = VariantConfig::from_json(json).unwrap().into_registry().unwrap();
        let decay = registry.get("daily_decay").unwrap();

        assert_eq!(decay.match_rule(), MatchRule::Floor);
        assert_eq!(evaluate(decay, 3.0), 1.0);
        assert_eq!(evaluate(decay, 30.0), 0.9);
    }

    #[test]
    fn test_malformed_document_rejected() {
        assert!(matches!(
            VariantConfig::from_json("{ not json"),
            Err(ConfigurationError::InvalidVariant(_))
        ));
    }
}
