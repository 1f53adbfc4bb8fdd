use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// How a raw metric value selects an entry of a step table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    /// Greatest threshold at or below the value.
    #[default]
    Floor,
    /// Only a threshold equal to the value qualifies.
    Exact,
}

/// Ordered `(threshold, weight)` pairs, ascending by threshold.
///
/// Construction does not validate ordering; the registry does that when a
/// factor is registered so the error can name the offending factor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepTable {
    steps: Vec<(f64, f64)>,
}

impl StepTable {
    pub fn new(steps: Vec<(f64, f64)>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[(f64, f64)] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Index of the first threshold that is not strictly greater than its
    /// predecessor, if any.
    pub fn first_non_increasing(&self) -> Option<usize> {
        self.steps
            .windows(2)
            .position(|pair| !(pair[0].0 < pair[1].0))
            .map(|i| i + 1)
    }

    pub fn is_finite(&self) -> bool {
        self.steps
            .iter()
            .all(|(threshold, weight)| threshold.is_finite() && weight.is_finite())
    }

    /// Weight selected by `value` under `rule`, or `None` when no entry
    /// qualifies. NaN never qualifies.
    pub fn lookup(&self, value: f64, rule: MatchRule) -> Option<f64> {
        match rule {
            MatchRule::Floor => {
                let idx = self.steps.partition_point(|(threshold, _)| *threshold <= value);
                idx.checked_sub(1).map(|i| self.steps[i].1)
            }
            MatchRule::Exact => self
                .steps
                .iter()
                .find(|(threshold, _)| *threshold == value)
                .map(|(_, weight)| *weight),
        }
    }
}

/// Generates `[(n, base + step * n)]` for every integer `n` in `range`.
///
/// Used at registry construction for tables that follow a linear rule, e.g.
/// `linear_steps(0..=9, 0.8, 0.02)` for comment counts.
pub fn linear_steps(range: RangeInclusive<i64>, base: f64, step: f64) -> StepTable {
    StepTable::new(
        range
            .map(|n| (n as f64, base + step * n as f64))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decay() -> StepTable {
        StepTable::new(vec![(0.0, 1.0), (1.0, 0.99), (2.0, 0.985)])
    }

    #[test]
    fn test_floor_lookup() {
        let table = decay();

        assert_eq!(table.lookup(0.0, MatchRule::Floor), Some(1.0));
        assert_eq!(table.lookup(1.0, MatchRule::Floor), Some(0.99));
        assert_eq!(table.lookup(1.5, MatchRule::Floor), Some(0.99));
        assert_eq!(table.lookup(15.0, MatchRule::Floor), Some(0.985));
        assert_eq!(table.lookup(-1.0, MatchRule::Floor), None);
        assert_eq!(table.lookup(f64::NAN, MatchRule::Floor), None);
    }

    #[test]
    fn test_exact_lookup() {
        let table = decay();

        assert_eq!(table.lookup(2.0, MatchRule::Exact), Some(0.985));
        assert_eq!(table.lookup(1.5, MatchRule::Exact), None);
        assert_eq!(table.lookup(15.0, MatchRule::Exact), None);
    }

    #[test]
    fn test_empty_table_never_matches() {
        let table = StepTable::default();
        assert_eq!(table.lookup(0.0, MatchRule::Floor), None);
        assert_eq!(table.lookup(0.0, MatchRule::Exact), None);
    }

    #[test]
    fn test_first_non_increasing() {
        assert_eq!(decay().first_non_increasing(), None);

        let repeated = StepTable::new(vec![(0.0, 1.0), (1.0, 0.9), (1.0, 0.8)]);
        assert_eq!(repeated.first_non_increasing(), Some(2));

        let descending = StepTable::new(vec![(3.0, 1.0), (1.0, 0.9)]);
        assert_eq!(descending.first_non_increasing(), Some(1));
    }

    #[test]
    fn test_linear_steps() {
        let table = linear_steps(0..=9, 0.8, 0.02);

        assert_eq!(table.len(), 10);
        assert_eq!(table.steps()[0], (0.0, 0.8));
        assert!((table.lookup(3.0, MatchRule::Exact).unwrap() - 0.86).abs() < 1e-12);
        assert!((table.lookup(9.0, MatchRule::Exact).unwrap() - 0.98).abs() < 1e-12);
        assert_eq!(table.first_non_increasing(), None);
    }
}
