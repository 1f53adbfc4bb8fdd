use super::{RankingStore, Result, ScoredRow};
use crate::models::{CandidatePredicate, ParamName, ParamValue};
use crate::services::plan::{
    compare_by_chain, ColumnRef, MetricExpr, QueryPlan, ScoreTerm, SortView, Source,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// An item record held by [`InMemoryStore`].
///
/// `columns` holds numeric item columns by name; `published_at` is derived
/// from the timestamp. `metrics` pins a factor's raw value directly, which is
/// how aggregate metrics over joined relations are supplied.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub id: Uuid,
    pub published: bool,
    pub spam: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub columns: BTreeMap<String, f64>,
    pub metrics: BTreeMap<String, f64>,
}

impl StoredItem {
    pub fn published(id: Uuid, published_at: DateTime<Utc>) -> Self {
        Self {
            id,
            published: true,
            spam: false,
            published_at: Some(published_at),
            columns: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn draft(id: Uuid) -> Self {
        Self {
            id,
            published: false,
            spam: false,
            published_at: None,
            columns: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn marked_spam(mut self) -> Self {
        self.spam = true;
        self
    }

    pub fn with_column(mut self, column: impl Into<String>, value: f64) -> Self {
        self.columns.insert(column.into(), value);
        self
    }

    pub fn with_metric(mut self, factor: impl Into<String>, raw_value: f64) -> Self {
        self.metrics.insert(factor.into(), raw_value);
        self
    }

    fn timestamp(&self, column: &ColumnRef) -> Option<DateTime<Utc>> {
        if column.source != Source::Item {
            return None;
        }
        match column.column.as_str() {
            "published_at" => self.published_at,
            name => self
                .columns
                .get(name)
                .and_then(|secs| DateTime::<Utc>::from_timestamp(*secs as i64, 0)),
        }
    }

    fn column(&self, column: &ColumnRef) -> Option<f64> {
        if column.source != Source::Item {
            return None;
        }
        match column.column.as_str() {
            "published_at" => self.published_at.map(|at| at.timestamp() as f64),
            name => self.columns.get(name).copied(),
        }
    }
}

/// Reference [`RankingStore`] over in-process records.
///
/// Evaluates item-level metrics itself; anything that needs joined rows has
/// to be pinned through [`StoredItem::with_metric`] or it takes the term's
/// fallback.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    items: Vec<StoredItem>,
}

impl InMemoryStore {
    pub fn new(items: Vec<StoredItem>) -> Self {
        Self { items }
    }

    pub fn insert(&mut self, item: StoredItem) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn score_row(&self, item: &StoredItem, plan: &QueryPlan) -> (f64, ScoredRow) {
        let mut row = ScoredRow::new(item.id);

        for term in &plan.score.product {
            let raw = raw_value(item, term, &plan.parameters);
            row.weights.insert(term.factor.clone(), term.weight_for(raw));
        }
        for column in plan.order_columns() {
            if let Some(value) = item.column(column) {
                row.order_values.insert(column.to_string(), value);
            }
        }

        // every term was just written, so combine cannot miss
        let score = plan
            .score
            .combine(|factor| row.weights.get(factor).copied())
            .unwrap_or(f64::NAN);
        (score, row)
    }
}

#[async_trait]
impl RankingStore for InMemoryStore {
    async fn execute(
        &self,
        plan: &QueryPlan,
        candidates: &CandidatePredicate,
    ) -> Result<Vec<ScoredRow>> {
        let mut scored: Vec<(f64, ScoredRow)> = self
            .items
            .iter()
            .filter(|item| candidates.admits(item.published, item.spam, item.published_at))
            .map(|item| self.score_row(item, plan))
            .collect();

        scored.sort_by(|(a_score, a), (b_score, b)| {
            compare_by_chain(
                &plan.order,
                SortView {
                    item_id: a.item_id,
                    score: *a_score,
                    values: &a.order_values,
                },
                SortView {
                    item_id: b.item_id,
                    score: *b_score,
                    values: &b.order_values,
                },
            )
        });

        let admitted = scored.len();
        let page = candidates.page;
        let rows: Vec<ScoredRow> = scored
            .into_iter()
            .skip(page.offset())
            .take(page.size)
            .map(|(_, row)| row)
            .collect();

        debug!(
            stored = self.items.len(),
            admitted,
            returned = rows.len(),
            "In-memory plan executed"
        );

        Ok(rows)
    }
}

fn raw_value(
    item: &StoredItem,
    term: &ScoreTerm,
    parameters: &BTreeMap<ParamName, ParamValue>,
) -> Option<f64> {
    item.metrics
        .get(&term.factor)
        .copied()
        .or_else(|| evaluate_local(&term.metric, item, parameters))
}

fn param(parameters: &BTreeMap<ParamName, ParamValue>, name: ParamName) -> Option<f64> {
    parameters.get(&name).and_then(ParamValue::as_f64)
}

fn evaluate_local(
    metric: &MetricExpr,
    item: &StoredItem,
    parameters: &BTreeMap<ParamName, ParamValue>,
) -> Option<f64> {
    match metric {
        MetricExpr::Column(column) => item.column(column),
        MetricExpr::Flag(column) => item
            .column(column)
            .map(|value| if value != 0.0 { 1.0 } else { 0.0 }),
        // Calendar days between the two UTC dates, not elapsed 24h periods.
        MetricExpr::DaysSince(column) => {
            let now = match parameters.get(&ParamName::Now)? {
                ParamValue::Timestamp(now) => *now,
                _ => return None,
            };
            let then = item.timestamp(column)?;
            Some((now.date_naive() - then.date_naive()).num_days() as f64)
        }
        MetricExpr::ViewerSetting { default, .. } => param(parameters, *default),
        MetricExpr::RoundedAbsDiff { left, right } => {
            let left = evaluate_local(left, item, parameters)?;
            let right = evaluate_local(right, item, parameters)?;
            Some((left - right).abs().round())
        }
        MetricExpr::AtMost { inner, cap } => {
            evaluate_local(inner, item, parameters).map(|value| value.min(*cap))
        }
        MetricExpr::AtLeast { inner, floor } => {
            evaluate_local(inner, item, parameters).map(|value| value.max(*floor))
        }
        MetricExpr::Banded {
            column,
            bands,
            otherwise,
        } => {
            let value = item.column(column)?;
            let band = bands.iter().find(|band| {
                param(parameters, band.bound).is_some_and(|bound| band.op.apply(value, bound))
            });
            Some(band.map_or(*otherwise, |band| band.value))
        }
        MetricExpr::Count(_) | MetricExpr::SumOrZero(_) | MetricExpr::DaysSinceLatest(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Page, ViewerContext};
    use crate::services::factors::{FactorSpec, MatchRule};
    use crate::services::plan::{OrderLever, PlanComposer};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn daily_decay() -> FactorSpec {
        FactorSpec::builder("daily_decay")
            .value_source(MetricExpr::DaysSince(ColumnRef::item("published_at")))
            .cases(vec![(0.0, 1.0), (1.0, 0.99), (2.0, 0.985)])
            .match_rule(MatchRule::Exact)
            .fallback(0.9)
            .build()
    }

    fn plan_for(factors: &[&FactorSpec]) -> QueryPlan {
        PlanComposer::compose(factors, &OrderLever::default(), &ViewerContext::anonymous(now()))
    }

    #[tokio::test]
    async fn test_weights_from_item_columns() {
        let decay = daily_decay();
        let fresh = Uuid::from_u128(1);
        let stale = Uuid::from_u128(2);
        let store = InMemoryStore::new(vec![
            StoredItem::published(fresh, now() - Duration::hours(30)),
            StoredItem::published(stale, now() - Duration::days(15)),
        ]);

        let rows = store
            .execute(&plan_for(&[&decay]), &CandidatePredicate::default())
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].item_id, fresh);
        assert_eq!(rows[0].weights["daily_decay"], 0.99);
        assert_eq!(rows[1].weights["daily_decay"], 0.9);
        assert!(rows[0].order_values.contains_key("items.published_at"));
    }

    #[tokio::test]
    async fn test_days_since_counts_calendar_days() {
        let decay = daily_decay();
        let just_after_midnight = Utc.with_ymd_and_hms(2024, 3, 10, 1, 0, 0).unwrap();
        let late_yesterday = Uuid::from_u128(1);
        let early_today = Uuid::from_u128(2);
        let store = InMemoryStore::new(vec![
            StoredItem::published(late_yesterday, Utc.with_ymd_and_hms(2024, 3, 9, 23, 0, 0).unwrap()),
            StoredItem::published(early_today, Utc.with_ymd_and_hms(2024, 3, 10, 0, 30, 0).unwrap()),
        ]);
        let viewer = ViewerContext::anonymous(just_after_midnight);
        let plan = PlanComposer::compose(&[&decay], &OrderLever::default(), &viewer);

        let rows = store.execute(&plan, &CandidatePredicate::default()).await.unwrap();

        let weight_of = |id: Uuid| {
            rows.iter()
                .find(|row| row.item_id == id)
                .map(|row| row.weights["daily_decay"])
        };
        assert_eq!(weight_of(late_yesterday), Some(0.99));
        assert_eq!(weight_of(early_today), Some(1.0));
    }

    #[tokio::test]
    async fn test_pinned_metric_overrides_columns() {
        let decay = daily_decay();
        let store = InMemoryStore::new(vec![StoredItem::published(Uuid::nil(), now())
            .with_metric("daily_decay", 2.0)]);

        let rows = store
            .execute(&plan_for(&[&decay]), &CandidatePredicate::default())
            .await
            .unwrap();

        assert_eq!(rows[0].weights["daily_decay"], 0.985);
    }

    #[tokio::test]
    async fn test_aggregate_without_pinned_value_takes_fallback() {
        let comments = FactorSpec::builder("comments_count")
            .value_source(MetricExpr::Count(ColumnRef::item("comment_id")))
            .cases(vec![(0.0, 0.8), (1.0, 0.82)])
            .fallback(1.0)
            .build();
        let store = InMemoryStore::new(vec![StoredItem::published(Uuid::nil(), now())]);

        let rows = store
            .execute(&plan_for(&[&comments]), &CandidatePredicate::default())
            .await
            .unwrap();

        assert_eq!(rows[0].weights["comments_count"], 1.0);
    }

    #[tokio::test]
    async fn test_predicate_filters_candidates() {
        let viewer = ViewerContext::anonymous(now());
        let store = InMemoryStore::new(vec![
            StoredItem::published(Uuid::from_u128(1), now() - Duration::days(1)),
            StoredItem::published(Uuid::from_u128(2), now() - Duration::days(1)).marked_spam(),
            StoredItem::draft(Uuid::from_u128(3)),
            StoredItem::published(Uuid::from_u128(4), now() - Duration::days(30)),
        ]);

        let rows = store
            .execute(&plan_for(&[]), &CandidatePredicate::for_viewer(&viewer))
            .await
            .unwrap();

        let ids: Vec<Uuid> = rows.iter().map(|row| row.item_id).collect();
        assert_eq!(ids, vec![Uuid::from_u128(1)]);
    }

    #[tokio::test]
    async fn test_pagination_after_ordering() {
        let items = (1..=5)
            .map(|n| StoredItem::published(Uuid::from_u128(n), now() - Duration::minutes(n as i64)))
            .collect();
        let store = InMemoryStore::new(items);
        let candidates = CandidatePredicate::default().with_page(Page { size: 2, number: 2 });

        let rows = store.execute(&plan_for(&[]), &candidates).await.unwrap();

        // newest first on equal scores, page two holds the 3rd and 4th newest
        let ids: Vec<Uuid> = rows.iter().map(|row| row.item_id).collect();
        assert_eq!(ids, vec![Uuid::from_u128(3), Uuid::from_u128(4)]);
    }

    #[test]
    fn test_banded_metric() {
        let metric = MetricExpr::Banded {
            column: ColumnRef::item("privileged_points"),
            bands: vec![
                crate::services::plan::Band::new(
                    crate::services::plan::CompareOp::Lt,
                    ParamName::NegativeReactionThreshold,
                    -1.0,
                ),
                crate::services::plan::Band::new(
                    crate::services::plan::CompareOp::Gt,
                    ParamName::PositiveReactionThreshold,
                    1.0,
                ),
            ],
            otherwise: 0.0,
        };
        let parameters: BTreeMap<ParamName, ParamValue> = [
            (ParamName::NegativeReactionThreshold, ParamValue::Integer(-10)),
            (ParamName::PositiveReactionThreshold, ParamValue::Integer(10)),
        ]
        .into();

        let low = StoredItem::draft(Uuid::nil()).with_column("privileged_points", -20.0);
        let mid = StoredItem::draft(Uuid::nil()).with_column("privileged_points", 3.0);
        let high = StoredItem::draft(Uuid::nil()).with_column("privileged_points", 11.0);

        assert_eq!(evaluate_local(&metric, &low, &parameters), Some(-1.0));
        assert_eq!(evaluate_local(&metric, &mid, &parameters), Some(0.0));
        assert_eq!(evaluate_local(&metric, &high, &parameters), Some(1.0));
    }

    #[test]
    fn test_granular_bands_include_lower_bound() {
        let granular = crate::services::factors::catalog::lever("privileged_user_reaction_granular")
            .unwrap()
            .fallback(1.0)
            .build();
        let metric = granular.value_source().unwrap();
        let parameters: BTreeMap<ParamName, ParamValue> = [
            (ParamName::VeryNegativeReactionThreshold, ParamValue::Integer(-20)),
            (ParamName::NegativeReactionThreshold, ParamValue::Integer(-10)),
            (ParamName::PositiveReactionThreshold, ParamValue::Integer(10)),
            (ParamName::VeryPositiveReactionThreshold, ParamValue::Integer(20)),
        ]
        .into();
        let band_of = |points: f64| {
            let item = StoredItem::draft(Uuid::nil())
                .with_column("privileged_users_reaction_points_sum", points);
            evaluate_local(metric, &item, &parameters)
        };

        assert_eq!(band_of(-21.0), Some(-2.0));
        assert_eq!(band_of(-20.0), Some(-1.0));
        assert_eq!(band_of(-10.0), Some(0.0));
        assert_eq!(band_of(9.0), Some(0.0));
        assert_eq!(band_of(10.0), Some(1.0));
        assert_eq!(band_of(20.0), Some(2.0));
    }
}
