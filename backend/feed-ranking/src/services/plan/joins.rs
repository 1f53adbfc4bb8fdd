// ============================================
// Join Composer
// ============================================
//
// Collapses the joins requested by the active factors into the minimal list
// the store must attach. Joins are visited in factor declaration order; an
// equivalent join (same relation, kind and resolved conditions) reuses the
// alias of the first one, anything else gets a fresh alias by insertion
// order. Same active set in, same plan shape out.

use super::relation::{AliasStrategy, JoinSignature, JoinSpec, PlannedJoin};
use crate::services::factors::FactorSpec;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Deduplicated joins plus, per factor, the mapping from each declared join
/// name to the alias it received.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposedJoins {
    pub joins: Vec<PlannedJoin>,
    aliases: HashMap<String, BTreeMap<String, String>>,
}

impl ComposedJoins {
    /// Declared join name → plan alias for one factor. Empty for factors that
    /// were not part of the composition.
    pub fn aliases_for(&self, factor: &str) -> &BTreeMap<String, String> {
        static EMPTY: BTreeMap<String, String> = BTreeMap::new();
        self.aliases.get(factor).unwrap_or(&EMPTY)
    }
}

pub struct JoinComposer;

impl JoinComposer {
    pub fn compose<'a>(factors: impl IntoIterator<Item = &'a FactorSpec>) -> ComposedJoins {
        let mut composed = ComposedJoins::default();
        let mut by_signature: HashMap<JoinSignature, String> = HashMap::new();
        let mut taken: HashSet<String> = HashSet::new();

        for factor in factors {
            let mut local: BTreeMap<String, String> = BTreeMap::new();

            for spec in factor.joins() {
                let signature = spec.signature(&local);
                let alias = match by_signature.get(&signature) {
                    Some(alias) => {
                        debug!(
                            factor = %factor.key(),
                            join = %spec.name,
                            alias = %alias,
                            "Join collapsed into existing alias"
                        );
                        alias.clone()
                    }
                    None => {
                        let alias = allocate_alias(spec, composed.joins.len(), &taken);
                        taken.insert(alias.clone());
                        by_signature.insert(signature, alias.clone());
                        composed
                            .joins
                            .push(PlannedJoin::from_spec(spec, alias.clone(), &local));
                        alias
                    }
                };
                local.insert(spec.name.clone(), alias);
            }

            composed.aliases.insert(factor.key().to_string(), local);
        }

        composed
    }
}

fn allocate_alias(spec: &JoinSpec, position: usize, taken: &HashSet<String>) -> String {
    let base = match spec.alias {
        AliasStrategy::Named => spec.name.clone(),
        AliasStrategy::Positional => format!("{}_{}", spec.relation, position + 1),
    };
    if !taken.contains(&base) {
        return base;
    }

    let mut suffix = 2;
    loop {
        let candidate = format!("{}_{}", base, suffix);
        if !taken.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
