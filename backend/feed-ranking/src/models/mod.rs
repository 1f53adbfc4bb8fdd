use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// How far back the feed looks when the viewer has no page view history.
pub const DEFAULT_DAYS_SINCE_PUBLISHED: i64 = 7;
/// Offset subtracted from the viewer's second most recent page view.
pub const PAGE_VIEW_OFFSET_HOURS: i64 = 18;
pub const DEFAULT_USER_EXPERIENCE_LEVEL: i64 = 5;
pub const DEFAULT_NEGATIVE_REACTION_THRESHOLD: i64 = -10;
pub const DEFAULT_POSITIVE_REACTION_THRESHOLD: i64 = 10;
pub const DEFAULT_PAGE_SIZE: usize = 25;

/// Named query parameters a factor's metric or joins may reference.
///
/// Parameters are always bound as values in the plan, never spliced into
/// predicate text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamName {
    ViewerId,
    Now,
    OldestPublishedAt,
    DefaultExperienceLevel,
    NegativeReactionThreshold,
    PositiveReactionThreshold,
    VeryNegativeReactionThreshold,
    VeryPositiveReactionThreshold,
}

impl ParamName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamName::ViewerId => "viewer_id",
            ParamName::Now => "now",
            ParamName::OldestPublishedAt => "oldest_published_at",
            ParamName::DefaultExperienceLevel => "default_experience_level",
            ParamName::NegativeReactionThreshold => "negative_reaction_threshold",
            ParamName::PositiveReactionThreshold => "positive_reaction_threshold",
            ParamName::VeryNegativeReactionThreshold => "very_negative_reaction_threshold",
            ParamName::VeryPositiveReactionThreshold => "very_positive_reaction_threshold",
        }
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bound parameter value handed to the storage collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    Id(Uuid),
    Timestamp(DateTime<Utc>),
    Integer(i64),
}

impl ParamValue {
    /// Numeric view used in comparisons; timestamps become epoch seconds.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Id(_) => None,
            ParamValue::Timestamp(at) => Some(at.timestamp() as f64),
            ParamValue::Integer(value) => Some(*value as f64),
        }
    }
}

/// Reaction point thresholds used by the privileged-reaction levers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactionThresholds {
    pub negative: Option<i64>,
    pub positive: Option<i64>,
    pub very_negative: Option<i64>,
    pub very_positive: Option<i64>,
}

impl Default for ReactionThresholds {
    fn default() -> Self {
        Self {
            negative: Some(DEFAULT_NEGATIVE_REACTION_THRESHOLD),
            positive: Some(DEFAULT_POSITIVE_REACTION_THRESHOLD),
            very_negative: None,
            very_positive: None,
        }
    }
}

/// Returns the oldest publication time worth considering for a viewer.
///
/// Anything older than the viewer's second most recent page view (minus
/// `offset_hours`) is stale to them; without page views the window is
/// `days_since_published` days back from `now`.
pub fn oldest_published_at_for(
    now: DateTime<Utc>,
    second_latest_page_view: Option<DateTime<Utc>>,
    days_since_published: i64,
    offset_hours: i64,
) -> DateTime<Utc> {
    match second_latest_page_view {
        Some(viewed_at) => viewed_at - Duration::hours(offset_hours),
        None => now - Duration::days(days_since_published),
    }
}

/// Per-request identity and parameters driving personalized factors.
///
/// Built once per ranking request and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerContext {
    viewer_id: Option<Uuid>,
    now: DateTime<Utc>,
    default_experience_level: Option<i64>,
    reaction_thresholds: ReactionThresholds,
    oldest_published_at: DateTime<Utc>,
}

impl ViewerContext {
    pub fn builder(now: DateTime<Utc>) -> ViewerContextBuilder {
        ViewerContextBuilder::new(now)
    }

    /// Context for a signed-out visitor with default parameters.
    pub fn anonymous(now: DateTime<Utc>) -> Self {
        Self::builder(now).build()
    }

    pub fn viewer_id(&self) -> Option<Uuid> {
        self.viewer_id
    }

    pub fn has_viewer(&self) -> bool {
        self.viewer_id.is_some()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn default_experience_level(&self) -> Option<i64> {
        self.default_experience_level
    }

    pub fn reaction_thresholds(&self) -> ReactionThresholds {
        self.reaction_thresholds
    }

    pub fn oldest_published_at(&self) -> DateTime<Utc> {
        self.oldest_published_at
    }

    /// Value bound to `param` for this request, if any.
    pub fn bound(&self, param: ParamName) -> Option<ParamValue> {
        let thresholds = &self.reaction_thresholds;
        match param {
            ParamName::ViewerId => self.viewer_id.map(ParamValue::Id),
            ParamName::Now => Some(ParamValue::Timestamp(self.now)),
            ParamName::OldestPublishedAt => Some(ParamValue::Timestamp(self.oldest_published_at)),
            ParamName::DefaultExperienceLevel => {
                self.default_experience_level.map(ParamValue::Integer)
            }
            ParamName::NegativeReactionThreshold => thresholds.negative.map(ParamValue::Integer),
            ParamName::PositiveReactionThreshold => thresholds.positive.map(ParamValue::Integer),
            ParamName::VeryNegativeReactionThreshold => {
                thresholds.very_negative.map(ParamValue::Integer)
            }
            ParamName::VeryPositiveReactionThreshold => {
                thresholds.very_positive.map(ParamValue::Integer)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViewerContextBuilder {
    viewer_id: Option<Uuid>,
    now: DateTime<Utc>,
    default_experience_level: Option<i64>,
    reaction_thresholds: ReactionThresholds,
    oldest_published_at: Option<DateTime<Utc>>,
}

impl ViewerContextBuilder {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            viewer_id: None,
            now,
            default_experience_level: Some(DEFAULT_USER_EXPERIENCE_LEVEL),
            reaction_thresholds: ReactionThresholds::default(),
            oldest_published_at: None,
        }
    }

    pub fn viewer(mut self, viewer_id: Uuid) -> Self {
        self.viewer_id = Some(viewer_id);
        self
    }

    pub fn maybe_viewer(mut self, viewer_id: Option<Uuid>) -> Self {
        self.viewer_id = viewer_id;
        self
    }

    pub fn default_experience_level(mut self, level: Option<i64>) -> Self {
        self.default_experience_level = level;
        self
    }

    pub fn reaction_thresholds(mut self, thresholds: ReactionThresholds) -> Self {
        self.reaction_thresholds = thresholds;
        self
    }

    pub fn oldest_published_at(mut self, oldest: DateTime<Utc>) -> Self {
        self.oldest_published_at = Some(oldest);
        self
    }

    /// Derive the eligibility window from the viewer's page view history.
    pub fn page_view_window(
        mut self,
        second_latest_page_view: Option<DateTime<Utc>>,
        days_since_published: i64,
        offset_hours: i64,
    ) -> Self {
        self.oldest_published_at = Some(oldest_published_at_for(
            self.now,
            second_latest_page_view,
            days_since_published,
            offset_hours,
        ));
        self
    }

    pub fn build(self) -> ViewerContext {
        let oldest_published_at = self.oldest_published_at.unwrap_or_else(|| {
            oldest_published_at_for(
                self.now,
                None,
                DEFAULT_DAYS_SINCE_PUBLISHED,
                PAGE_VIEW_OFFSET_HOURS,
            )
        });

        ViewerContext {
            viewer_id: self.viewer_id,
            now: self.now,
            default_experience_level: self.default_experience_level,
            reaction_thresholds: self.reaction_thresholds,
            oldest_published_at,
        }
    }
}

/// Pagination window over the ranked result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub size: usize,
    /// 1-based page number; 0 is treated as the first page.
    pub number: usize,
}

impl Page {
    pub fn offset(&self) -> usize {
        self.number.saturating_sub(1).saturating_mul(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            size: DEFAULT_PAGE_SIZE,
            number: 1,
        }
    }
}

/// Caller-supplied filter bounding the universe of items eligible for ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePredicate {
    pub published_only: bool,
    pub exclude_spam: bool,
    pub published_after: Option<DateTime<Utc>>,
    pub published_before: Option<DateTime<Utc>>,
    pub page: Page,
}

impl Default for CandidatePredicate {
    fn default() -> Self {
        Self {
            published_only: true,
            exclude_spam: true,
            published_after: None,
            published_before: None,
            page: Page::default(),
        }
    }
}

impl CandidatePredicate {
    /// Published, non-spam items inside the viewer's eligibility window.
    pub fn for_viewer(viewer: &ViewerContext) -> Self {
        Self {
            published_after: Some(viewer.oldest_published_at()),
            published_before: Some(viewer.now()),
            ..Self::default()
        }
    }

    pub fn with_page(mut self, page: Page) -> Self {
        self.page = page;
        self
    }

    /// Whether an item with the given attributes falls inside this predicate.
    pub fn admits(&self, published: bool, spam: bool, published_at: Option<DateTime<Utc>>) -> bool {
        if self.published_only && !published {
            return false;
        }
        if self.exclude_spam && spam {
            return false;
        }
        match published_at {
            Some(at) => {
                self.published_after.map_or(true, |after| at >= after)
                    && self.published_before.map_or(true, |before| at <= before)
            }
            None => self.published_after.is_none() && self.published_before.is_none(),
        }
    }
}

/// One factor's contribution to an item's composite score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorWeight {
    pub factor: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    pub item_id: Uuid,
    pub score: f64,
    /// Per-factor weights, present only when diagnostics were requested.
    pub breakdown: Option<Vec<FactorWeight>>,
}
