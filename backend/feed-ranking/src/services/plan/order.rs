use super::relation::ColumnRef;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKey {
    /// Composite relevance score.
    Score,
    /// An items column returned alongside each row.
    Column(ColumnRef),
    /// Item identity, the final tie-breaker.
    ItemId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTerm {
    pub key: OrderKey,
    pub direction: Direction,
}

impl OrderTerm {
    pub fn desc(key: OrderKey) -> Self {
        Self {
            key,
            direction: Direction::Desc,
        }
    }

    pub fn asc(key: OrderKey) -> Self {
        Self {
            key,
            direction: Direction::Asc,
        }
    }
}

/// A named, deterministic ordering of ranked items.
///
/// Every chain starts with the composite score descending and ends with the
/// item id ascending, so two rankings of the same rows never differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderLever {
    name: &'static str,
    label: &'static str,
    tie_breakers: Vec<(ColumnRef, Direction)>,
}

pub const RELEVANCY_SCORE_AND_PUBLICATION_DATE: &str = "relevancy_score_and_publication_date";
pub const RELEVANCY_SCORE_AND_PUBLIC_REACTIONS: &str = "relevancy_score_and_public_reactions";

impl OrderLever {
    pub fn relevancy_score_and_publication_date() -> Self {
        Self {
            name: RELEVANCY_SCORE_AND_PUBLICATION_DATE,
            label: "Order by highest calculated relevancy score then latest published at time.",
            tie_breakers: vec![(ColumnRef::item("published_at"), Direction::Desc)],
        }
    }

    pub fn relevancy_score_and_public_reactions() -> Self {
        Self {
            name: RELEVANCY_SCORE_AND_PUBLIC_REACTIONS,
            label: "Order by highest relevancy score, then most public reactions, \
                    then latest published at time.",
            tie_breakers: vec![
                (ColumnRef::item("public_reactions_count"), Direction::Desc),
                (ColumnRef::item("published_at"), Direction::Desc),
            ],
        }
    }

    /// Looks up an order lever by name.
    pub fn named(name: &str) -> Option<Self> {
        match name {
            RELEVANCY_SCORE_AND_PUBLICATION_DATE => {
                Some(Self::relevancy_score_and_publication_date())
            }
            RELEVANCY_SCORE_AND_PUBLIC_REACTIONS => {
                Some(Self::relevancy_score_and_public_reactions())
            }
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Columns whose values a store must return with each row.
    pub fn columns(&self) -> impl Iterator<Item = &ColumnRef> {
        self.tie_breakers.iter().map(|(column, _)| column)
    }

    /// Full order chain: score, tie-breakers, item id.
    pub fn terms(&self) -> Vec<OrderTerm> {
        let mut terms = Vec::with_capacity(self.tie_breakers.len() + 2);
        terms.push(OrderTerm::desc(OrderKey::Score));
        terms.extend(self.tie_breakers.iter().map(|(column, direction)| OrderTerm {
            key: OrderKey::Column(column.clone()),
            direction: *direction,
        }));
        terms.push(OrderTerm::asc(OrderKey::ItemId));
        terms
    }
}

impl Default for OrderLever {
    fn default() -> Self {
        Self::relevancy_score_and_publication_date()
    }
}

/// Compares two optional sort values; missing values sort last in either
/// direction, and NaN sorts below every number.
pub fn compare_values(a: Option<f64>, b: Option<f64>, direction: Direction) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let ordering = nan_low(a).total_cmp(&nan_low(b));
            match direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            }
        }
    }
}

/// What the order chain looks at for one ranked row. `values` is keyed by
/// the column's display form (`items.published_at`).
#[derive(Debug, Clone, Copy)]
pub struct SortView<'a> {
    pub item_id: Uuid,
    pub score: f64,
    pub values: &'a BTreeMap<String, f64>,
}

/// Compares two rows by a full order chain.
pub fn compare_by_chain(terms: &[OrderTerm], a: SortView<'_>, b: SortView<'_>) -> Ordering {
    for term in terms {
        let ordering = match &term.key {
            OrderKey::Score => compare_values(Some(a.score), Some(b.score), term.direction),
            OrderKey::Column(column) => {
                let key = column.to_string();
                compare_values(
                    a.values.get(&key).copied(),
                    b.values.get(&key).copied(),
                    term.direction,
                )
            }
            OrderKey::ItemId => match term.direction {
                Direction::Asc => a.item_id.cmp(&b.item_id),
                Direction::Desc => b.item_id.cmp(&a.item_id),
            },
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn nan_low(value: f64) -> f64 {
    if value.is_nan() {
        f64::NEG_INFINITY
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terms_are_bracketed_by_score_and_item_id() {
        let terms = OrderLever::relevancy_score_and_publication_date().terms();

        assert_eq!(terms.len(), 3);
        assert_eq!(terms[0], OrderTerm::desc(OrderKey::Score));
        assert_eq!(
            terms[1],
            OrderTerm::desc(OrderKey::Column(ColumnRef::item("published_at")))
        );
        assert_eq!(terms[2], OrderTerm::asc(OrderKey::ItemId));
    }

    #[test]
    fn test_named_lookup() {
        assert_eq!(
            OrderLever::named("relevancy_score_and_public_reactions")
                .unwrap()
                .columns()
                .count(),
            2
        );
        assert!(OrderLever::named("final_order_by_random_weighted_to_score").is_none());
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(Some(2.0), Some(1.0), Direction::Desc), Ordering::Less);
        assert_eq!(compare_values(Some(2.0), Some(1.0), Direction::Asc), Ordering::Greater);
        assert_eq!(compare_values(None, Some(1.0), Direction::Desc), Ordering::Greater);
        assert_eq!(compare_values(None, Some(1.0), Direction::Asc), Ordering::Greater);
        assert_eq!(compare_values(Some(f64::NAN), Some(-5.0), Direction::Desc), Ordering::Greater);
    }

    #[test]
    fn test_chain_breaks_ties_in_order() {
        let terms = OrderLever::default().terms();
        let older: BTreeMap<String, f64> = [("items.published_at".to_string(), 100.0)].into();
        let newer: BTreeMap<String, f64> = [("items.published_at".to_string(), 200.0)].into();
        let first = Uuid::from_u128(1);
        let second = Uuid::from_u128(2);

        let view = |item_id, score, values| SortView {
            item_id,
            score,
            values,
        };

        // score wins over everything else
        assert_eq!(
            compare_by_chain(&terms, view(second, 0.9, &older), view(first, 0.8, &newer)),
            Ordering::Less
        );
        // equal score: newer first
        assert_eq!(
            compare_by_chain(&terms, view(second, 0.8, &newer), view(first, 0.8, &older)),
            Ordering::Less
        );
        // everything equal: lower id first
        assert_eq!(
            compare_by_chain(&terms, view(first, 0.8, &older), view(second, 0.8, &older)),
            Ordering::Less
        );
    }
}
