//! Ranking Pipeline
//!
//! Orchestrates one ranking request end to end.
//!
//! # Stages
//! 1. **ResolveActiveFactors**: enabled factors the viewer is eligible for,
//!    minus those whose parameters the viewer context cannot bind
//! 2. **ComposePlan**: joins, group keys, score expression and order chain
//! 3. **ExecuteAgainstStore**: the only blocking step, bounded by a timeout
//! 4. **MaterializeRankedItems**: composite score per row
//! 5. **ApplyFinalOrder**: deterministic order chain
//!
//! Store failures end the request in `Failed` and surface as
//! [`RankingError::Unavailable`]. Nothing is retried here.
use crate::models::{CandidatePredicate, FactorWeight, RankedItem, ViewerContext};
use crate::services::factors::{FactorRegistry, FactorSpec, ViewerContextError};
use crate::services::plan::{compare_by_chain, PlanComposer, QueryPlan, SortView};
use crate::services::storage::{RankingStore, ScoredRow, StorageError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, warn};

pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Debug, Error)]
pub enum RankingError {
    #[error("Ranking unavailable: {0}")]
    Unavailable(#[from] StorageError),
}

impl RankingError {
    pub fn storage_error(&self) -> &StorageError {
        match self {
            RankingError::Unavailable(source) => source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.storage_error().is_timeout()
    }
}

pub type Result<T> = std::result::Result<T, RankingError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Start,
    ResolveActiveFactors,
    ComposePlan,
    ExecuteAgainstStore,
    MaterializeRankedItems,
    ApplyFinalOrder,
    Done,
    Failed,
}

impl PipelineStage {
    /// Successor on the happy path. `Done` and `Failed` are terminal.
    pub fn next(self) -> Self {
        match self {
            PipelineStage::Start => PipelineStage::ResolveActiveFactors,
            PipelineStage::ResolveActiveFactors => PipelineStage::ComposePlan,
            PipelineStage::ComposePlan => PipelineStage::ExecuteAgainstStore,
            PipelineStage::ExecuteAgainstStore => PipelineStage::MaterializeRankedItems,
            PipelineStage::MaterializeRankedItems => PipelineStage::ApplyFinalOrder,
            PipelineStage::ApplyFinalOrder => PipelineStage::Done,
            PipelineStage::Done => PipelineStage::Done,
            PipelineStage::Failed => PipelineStage::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Start => "start",
            PipelineStage::ResolveActiveFactors => "resolve_active_factors",
            PipelineStage::ComposePlan => "compose_plan",
            PipelineStage::ExecuteAgainstStore => "execute_against_store",
            PipelineStage::MaterializeRankedItems => "materialize_ranked_items",
            PipelineStage::ApplyFinalOrder => "apply_final_order",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One ranking request.
#[derive(Debug, Clone)]
pub struct RankingRequest {
    pub viewer: ViewerContext,
    pub candidates: CandidatePredicate,
    /// Attach the per-factor weight breakdown to every item.
    pub diagnostics: bool,
}

impl RankingRequest {
    /// Published, non-spam candidates inside the viewer's eligibility window.
    pub fn new(viewer: ViewerContext) -> Self {
        let candidates = CandidatePredicate::for_viewer(&viewer);
        Self {
            viewer,
            candidates,
            diagnostics: false,
        }
    }

    pub fn with_candidates(mut self, candidates: CandidatePredicate) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: bool) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

/// Ordered result of a ranking request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedFeed {
    pub items: Vec<RankedItem>,
    /// Factors excluded because the viewer context could not bind them.
    pub skipped: Vec<ViewerContextError>,
}

impl RankedFeed {
    pub fn item_ids(&self) -> impl Iterator<Item = uuid::Uuid> + '_ {
        self.items.iter().map(|item| item.item_id)
    }
}

/// Active factor set for one viewer.
#[derive(Debug, Clone)]
pub struct ResolvedFactors<'a> {
    pub active: Vec<&'a FactorSpec>,
    pub skipped: Vec<ViewerContextError>,
}

pub struct RankingPipeline {
    registry: Arc<FactorRegistry>,
    store: Arc<dyn RankingStore>,
    storage_timeout: Duration,
}

impl RankingPipeline {
    pub fn new(registry: Arc<FactorRegistry>, store: Arc<dyn RankingStore>) -> Self {
        Self {
            registry,
            store,
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    pub fn with_storage_timeout(mut self, storage_timeout: Duration) -> Self {
        self.storage_timeout = storage_timeout;
        self
    }

    pub fn registry(&self) -> &FactorRegistry {
        &self.registry
    }

    pub fn storage_timeout(&self) -> Duration {
        self.storage_timeout
    }

    /// Enabled factors eligible for the viewer, in declared order.
    ///
    /// A factor whose parameters the viewer context leaves unbound is skipped
    /// and reported; the rest of the request is unaffected.
    pub fn resolve_active_factors(&self, viewer: &ViewerContext) -> ResolvedFactors<'_> {
        let mut active = Vec::new();
        let mut skipped = Vec::new();

        for spec in self.registry.active(viewer.has_viewer()) {
            let unbound = spec
                .required_parameters()
                .into_iter()
                .find(|param| viewer.bound(*param).is_none());

            match unbound {
                Some(parameter) => {
                    let err = ViewerContextError {
                        factor: spec.key().to_string(),
                        parameter,
                    };
                    warn!(
                        factor = %err.factor,
                        parameter = %err.parameter,
                        "Factor skipped, parameter not bound for viewer"
                    );
                    skipped.push(err);
                }
                None => active.push(spec),
            }
        }

        ResolvedFactors { active, skipped }
    }

    /// Composes the plan for a viewer without touching the store.
    pub fn compose_plan(&self, viewer: &ViewerContext) -> (QueryPlan, Vec<ViewerContextError>) {
        let resolved = self.resolve_active_factors(viewer);
        let plan = PlanComposer::compose(&resolved.active, self.registry.order(), viewer);
        (plan, resolved.skipped)
    }

    pub async fn rank(&self, request: &RankingRequest) -> Result<RankedFeed> {
        let mut stage = PipelineStage::Start;

        stage = advance(stage);
        let resolved = self.resolve_active_factors(&request.viewer);
        debug!(
            active = resolved.active.len(),
            skipped = resolved.skipped.len(),
            has_viewer = request.viewer.has_viewer(),
            "Active factors resolved"
        );

        stage = advance(stage);
        let plan = PlanComposer::compose(&resolved.active, self.registry.order(), &request.viewer);

        stage = advance(stage);
        let rows = match self.execute(&plan, &request.candidates).await {
            Ok(rows) => rows,
            Err(err) => {
                error!(
                    stage = %stage,
                    timeout_ms = self.storage_timeout.as_millis() as u64,
                    error = %err,
                    "Ranking store failed"
                );
                debug!(stage = %PipelineStage::Failed, "Pipeline stage");
                return Err(RankingError::Unavailable(err));
            }
        };

        stage = advance(stage);
        let mut ranked = materialize(&plan, rows, request.diagnostics);

        stage = advance(stage);
        ranked.sort_by(|(a, a_values), (b, b_values)| {
            compare_by_chain(
                &plan.order,
                SortView {
                    item_id: a.item_id,
                    score: a.score,
                    values: a_values,
                },
                SortView {
                    item_id: b.item_id,
                    score: b.score,
                    values: b_values,
                },
            )
        });

        advance(stage);
        Ok(RankedFeed {
            items: ranked.into_iter().map(|(item, _)| item).collect(),
            skipped: resolved.skipped,
        })
    }

    /// Runs the plan under the storage timeout and checks the row contract.
    async fn execute(
        &self,
        plan: &QueryPlan,
        candidates: &CandidatePredicate,
    ) -> std::result::Result<Vec<ScoredRow>, StorageError> {
        let rows = timeout(self.storage_timeout, self.store.execute(plan, candidates))
            .await
            .map_err(|_| StorageError::Timeout(self.storage_timeout))??;

        for row in &rows {
            check_row(plan, row)?;
        }
        Ok(rows)
    }
}

fn advance(stage: PipelineStage) -> PipelineStage {
    let next = stage.next();
    debug!(from = %stage, to = %next, "Pipeline stage");
    next
}

fn check_row(plan: &QueryPlan, row: &ScoredRow) -> std::result::Result<(), StorageError> {
    for factor in plan.score.factors() {
        match row.weights.get(factor) {
            Some(weight) if weight.is_finite() => {}
            Some(weight) => {
                return Err(StorageError::MalformedRow {
                    item_id: row.item_id,
                    reason: format!("non-finite weight {} for factor {}", weight, factor),
                })
            }
            None => {
                return Err(StorageError::MalformedRow {
                    item_id: row.item_id,
                    reason: format!("missing weight for factor {}", factor),
                })
            }
        }
    }
    Ok(())
}

fn materialize(
    plan: &QueryPlan,
    rows: Vec<ScoredRow>,
    diagnostics: bool,
) -> Vec<(RankedItem, BTreeMap<String, f64>)> {
    rows.into_iter()
        .map(|row| {
            // rows passed check_row, so every term has a weight
            let score = plan
                .score
                .combine(|factor| row.weights.get(factor).copied())
                .unwrap_or(f64::NAN);

            let breakdown = diagnostics.then(|| {
                plan.score
                    .factors()
                    .filter_map(|factor| {
                        row.weights.get(factor).map(|weight| FactorWeight {
                            factor: factor.to_string(),
                            weight: *weight,
                        })
                    })
                    .collect()
            });

            (
                RankedItem {
                    item_id: row.item_id,
                    score,
                    breakdown,
                },
                row.order_values,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::factors::MatchRule;
    use crate::services::plan::{ColumnRef, MetricExpr};
    use crate::services::storage::{InMemoryStore, StoredItem};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use uuid::Uuid;

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

    fn experience() -> FactorSpec {
        FactorSpec::builder("experience")
            .requires_viewer(true)
            .value_source(MetricExpr::ViewerSetting {
                relation: "users_settings".to_string(),
                column: "experience_level".to_string(),
                default: crate::models::ParamName::DefaultExperienceLevel,
            })
            .cases(vec![(0.0, 1.0), (1.0, 0.98)])
            .fallback(0.9)
            .build()
    }

    struct RowsStore(Vec<ScoredRow>);

    #[async_trait]
    impl RankingStore for RowsStore {
        async fn execute(
            &self,
            _plan: &QueryPlan,
            _candidates: &CandidatePredicate,
        ) -> std::result::Result<Vec<ScoredRow>, StorageError> {
            Ok(self.0.clone())
        }
    }

    fn pipeline(specs: Vec<FactorSpec>, store: impl RankingStore + 'static) -> RankingPipeline {
        let registry = FactorRegistry::from_specs(specs).unwrap();
        RankingPipeline::new(Arc::new(registry), Arc::new(store))
    }

    #[test]
    fn test_stage_sequence() {
        let mut stage = PipelineStage::Start;
        let mut seen = vec![stage];
        while !stage.is_terminal() {
            stage = stage.next();
            seen.push(stage);
        }

        assert_eq!(seen.len(), 7);
        assert_eq!(seen.last(), Some(&PipelineStage::Done));
        assert_eq!(PipelineStage::Failed.next(), PipelineStage::Failed);
    }

    #[test]
    fn test_unbound_parameter_skips_factor() {
        let pipeline = pipeline(vec![daily_decay(), experience()], InMemoryStore::default());
        let viewer = ViewerContext::builder(now())
            .viewer(Uuid::from_u128(7))
            .default_experience_level(None)
            .build();

        let resolved = pipeline.resolve_active_factors(&viewer);

        assert_eq!(resolved.active.len(), 1);
        assert_eq!(resolved.skipped.len(), 1);
        assert_eq!(resolved.skipped[0].factor, "experience");
        assert_eq!(
            resolved.skipped[0].parameter,
            crate::models::ParamName::DefaultExperienceLevel
        );
    }

    #[test]
    fn test_anonymous_viewer_does_not_report_viewer_factors() {
        let pipeline = pipeline(vec![daily_decay(), experience()], InMemoryStore::default());

        let resolved = pipeline.resolve_active_factors(&ViewerContext::anonymous(now()));

        assert_eq!(resolved.active.len(), 1);
        assert!(resolved.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_diagnostics_attach_breakdown() {
        let store = InMemoryStore::new(vec![StoredItem::published(
            Uuid::from_u128(1),
            now() - ChronoDuration::hours(1),
        )]);
        let pipeline = pipeline(vec![daily_decay()], store);
        let request = RankingRequest::new(ViewerContext::anonymous(now()));

        let plain = pipeline.rank(&request).await.unwrap();
        assert!(plain.items[0].breakdown.is_none());

        let detailed = pipeline.rank(&request.clone().with_diagnostics(true)).await.unwrap();
        assert_eq!(
            detailed.items[0].breakdown,
            Some(vec![FactorWeight {
                factor: "daily_decay".to_string(),
                weight: 1.0,
            }])
        );
    }

    #[tokio::test]
    async fn test_missing_weight_is_unavailable() {
        let store = RowsStore(vec![ScoredRow::new(Uuid::from_u128(1))]);
        let pipeline = pipeline(vec![daily_decay()], store);

        let err = pipeline
            .rank(&RankingRequest::new(ViewerContext::anonymous(now())))
            .await
            .unwrap_err();

        assert!(matches!(
            err.storage_error(),
            StorageError::MalformedRow { .. }
        ));
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn test_final_order_ignores_store_order() {
        let store = RowsStore(vec![
            ScoredRow::new(Uuid::from_u128(2)).with_weight("daily_decay", 0.9),
            ScoredRow::new(Uuid::from_u128(3)).with_weight("daily_decay", 1.0),
            ScoredRow::new(Uuid::from_u128(1)).with_weight("daily_decay", 0.9),
        ]);
        let pipeline = pipeline(vec![daily_decay()], store);

        let feed = pipeline
            .rank(&RankingRequest::new(ViewerContext::anonymous(now())))
            .await
            .unwrap();

        let ids: Vec<Uuid> = feed.item_ids().collect();
        assert_eq!(
            ids,
            vec![Uuid::from_u128(3), Uuid::from_u128(1), Uuid::from_u128(2)]
        );
    }
}
