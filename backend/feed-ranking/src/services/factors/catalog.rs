// ============================================
// Lever Catalog
// ============================================
//
// Every relevance signal the feed knows how to compute: what metric it reads,
// which relations it joins, how it groups, and whether it needs a viewer.
// Weights are not part of the catalog; a variant document assigns them.
//
// Catalog levers map integer metrics through discrete cases, so they default
// to exact matching. A variant may switch a lever to floor matching.

use super::{FactorSpecBuilder, MatchRule, ValueRange};
use crate::models::ParamName;
use crate::services::plan::{Band, ColumnRef, CompareOp, JoinSpec, MetricExpr};

const ITEM_TYPE: &str = "Item";
const USER_TYPE: &str = "User";
const ORGANIZATION_TYPE: &str = "Organization";
const TAG_TYPE: &str = "Tag";

/// All catalog levers in declaration order.
pub fn levers() -> Vec<FactorSpecBuilder> {
    vec![
        comments_count_by_those_followed(),
        comments_count(),
        comments_score(),
        daily_decay(),
        experience(),
        featured_article(),
        following_author(),
        following_org(),
        latest_comment(),
        matching_negative_tags_intersection_count(),
        matching_negative_tags_intersection_points(),
        matching_positive_tags_intersection_count(),
        matching_positive_tags_intersection_points(),
        privileged_user_reaction(),
        privileged_user_reaction_granular(),
        public_reactions(),
        public_reactions_score(),
    ]
}

pub fn lever(key: &str) -> Option<FactorSpecBuilder> {
    levers().into_iter().find(|lever| lever.key() == key)
}

fn lever_for(key: &str, label: &str, range: ValueRange, requires_viewer: bool) -> FactorSpecBuilder {
    super::FactorSpec::builder(key)
        .label(label)
        .range(range)
        .requires_viewer(requires_viewer)
        .match_rule(MatchRule::Exact)
}

fn followed_user() -> JoinSpec {
    JoinSpec::left_outer("follows", "followed_user")
        .on_column(ColumnRef::item("user_id"), CompareOp::Eq, ColumnRef::current("followable_id"))
        .on_text(ColumnRef::current("followable_type"), USER_TYPE)
        .on_param(ColumnRef::current("follower_id"), CompareOp::Eq, ParamName::ViewerId)
        .on_text(ColumnRef::current("follower_type"), USER_TYPE)
}

fn item_comments(name: &str) -> JoinSpec {
    JoinSpec::left_outer("comments", name)
        .on_column(ColumnRef::current("commentable_id"), CompareOp::Eq, ColumnRef::item("id"))
        .on_text(ColumnRef::current("commentable_type"), ITEM_TYPE)
        .on_bool(ColumnRef::current("deleted"), false)
}

fn taggings() -> JoinSpec {
    JoinSpec::left_outer("taggings", "taggings")
        .on_column(ColumnRef::current("taggable_id"), CompareOp::Eq, ColumnRef::item("id"))
        .on_text(ColumnRef::current("taggable_type"), ITEM_TYPE)
}

fn tags() -> JoinSpec {
    JoinSpec::inner("tags", "tags").on_column(
        ColumnRef::join("taggings", "tag_id"),
        CompareOp::Eq,
        ColumnRef::current("id"),
    )
}

/// Viewer's tag follows; `op` against zero explicit points selects positive
/// (`Ge`) or negative (`Lt`) follows.
fn tag_follows(name: &str, op: CompareOp) -> JoinSpec {
    JoinSpec::left_outer("follows", name)
        .on_column(ColumnRef::join("tags", "id"), CompareOp::Eq, ColumnRef::current("followable_id"))
        .on_text(ColumnRef::current("followable_type"), TAG_TYPE)
        .on_text(ColumnRef::current("follower_type"), USER_TYPE)
        .on_param(ColumnRef::current("follower_id"), CompareOp::Eq, ParamName::ViewerId)
        .on_integer(ColumnRef::current("explicit_points"), op, 0)
}

fn with_tag_joins(builder: FactorSpecBuilder, follows: JoinSpec) -> FactorSpecBuilder {
    builder.join(taggings()).join(tags()).join(follows)
}

fn comments_count_by_those_followed() -> FactorSpecBuilder {
    lever_for(
        "comments_count_by_those_followed",
        "Weight to give for the number of comments on the item from other users \
         that the given viewer follows.",
        ValueRange::at_least(0.0),
        true,
    )
    .value_source(MetricExpr::Count(ColumnRef::join("comments_by_followed", "id")))
    .join(followed_user())
    .join(
        JoinSpec::left_outer("comments", "comments_by_followed")
            .on_column(ColumnRef::current("commentable_id"), CompareOp::Eq, ColumnRef::item("id"))
            .on_text(ColumnRef::current("commentable_type"), ITEM_TYPE)
            .on_column(
                ColumnRef::join("followed_user", "followable_id"),
                CompareOp::Eq,
                ColumnRef::current("user_id"),
            )
            .on_text(ColumnRef::join("followed_user", "followable_type"), USER_TYPE)
            .on_bool(ColumnRef::current("deleted"), false)
            .on_param(ColumnRef::current("created_at"), CompareOp::Gt, ParamName::OldestPublishedAt),
    )
}

fn comments_count() -> FactorSpecBuilder {
    lever_for(
        "comments_count",
        "Weight to give to the number of comments on the item.",
        ValueRange::at_least(0.0),
        false,
    )
    .value_source(MetricExpr::Column(ColumnRef::item("comments_count")))
    .group_by(ColumnRef::item("comments_count"))
}

fn comments_score() -> FactorSpecBuilder {
    lever_for(
        "comments_score",
        "Weight given based on sum of comment scores of an item.",
        ValueRange::at_least(0.0),
        false,
    )
    .value_source(MetricExpr::SumOrZero(ColumnRef::join("comments", "score")))
    .join(item_comments("comments"))
}

fn daily_decay() -> FactorSpecBuilder {
    lever_for(
        "daily_decay",
        "Weight given based on the relative age of the item.",
        ValueRange::at_least(0.0),
        true,
    )
    .value_source(MetricExpr::DaysSince(ColumnRef::item("published_at")))
    .group_by(ColumnRef::item("published_at"))
}

fn experience() -> FactorSpecBuilder {
    lever_for(
        "experience",
        "Weight to give based on the difference between experience level of the \
         item and given viewer.",
        ValueRange::at_least(0.0),
        true,
    )
    .value_source(MetricExpr::RoundedAbsDiff {
        left: Box::new(MetricExpr::Column(ColumnRef::item("experience_level_rating"))),
        right: Box::new(MetricExpr::ViewerSetting {
            relation: "users_settings".to_string(),
            column: "experience_level".to_string(),
            default: ParamName::DefaultExperienceLevel,
        }),
    })
    .group_by(ColumnRef::item("experience_level_rating"))
}

fn featured_article() -> FactorSpecBuilder {
    lever_for(
        "featured_article",
        "Weight to give for featured or unfeatured items. 1 is featured.",
        ValueRange::between(0.0, 1.0),
        false,
    )
    .value_source(MetricExpr::Flag(ColumnRef::item("featured")))
    .group_by(ColumnRef::item("featured"))
}

fn following_author() -> FactorSpecBuilder {
    lever_for(
        "following_author",
        "Weight to give when the given viewer follows the item's author. \
         1 is followed, 0 is not followed.",
        ValueRange::between(0.0, 1.0),
        true,
    )
    .value_source(MetricExpr::Count(ColumnRef::join("followed_user", "follower_id")))
    .join(followed_user())
}

fn following_org() -> FactorSpecBuilder {
    lever_for(
        "following_org",
        "Weight to give when the given viewer follows the item's organization. \
         1 is followed, 0 is not followed.",
        ValueRange::between(0.0, 1.0),
        true,
    )
    .value_source(MetricExpr::Count(ColumnRef::join("followed_org", "follower_id")))
    .join(
        JoinSpec::left_outer("follows", "followed_org")
            .on_column(
                ColumnRef::item("organization_id"),
                CompareOp::Eq,
                ColumnRef::current("followable_id"),
            )
            .on_text(ColumnRef::current("followable_type"), ORGANIZATION_TYPE)
            .on_param(ColumnRef::current("follower_id"), CompareOp::Eq, ParamName::ViewerId)
            .on_text(ColumnRef::current("follower_type"), USER_TYPE),
    )
}

fn latest_comment() -> FactorSpecBuilder {
    lever_for(
        "latest_comment",
        "Weight to give an item based on its most recent comment.",
        ValueRange::at_least(0.0),
        false,
    )
    .value_source(MetricExpr::DaysSinceLatest(ColumnRef::join("recent_comments", "created_at")))
    .join(item_comments("recent_comments").on_param(
        ColumnRef::current("created_at"),
        CompareOp::Gt,
        ParamName::OldestPublishedAt,
    ))
}

fn matching_negative_tags_intersection_count() -> FactorSpecBuilder {
    with_tag_joins(
        lever_for(
            "matching_negative_tags_intersection_count",
            "Weight to give the number of intersecting tags of the item and \
             viewer negative follows.",
            ValueRange::between(0.0, 4.0),
            true,
        ),
        tag_follows("negative_followed_tags", CompareOp::Lt),
    )
    .value_source(MetricExpr::Count(ColumnRef::join("negative_followed_tags", "id")))
}

fn matching_negative_tags_intersection_points() -> FactorSpecBuilder {
    with_tag_joins(
        lever_for(
            "matching_negative_tags_intersection_points",
            "Weight to give for the sum points of the intersecting tags of the item and \
             viewer negative follows.",
            ValueRange::between(-10.0, 0.0),
            true,
        ),
        tag_follows("negative_followed_tags", CompareOp::Lt),
    )
    .value_source(MetricExpr::AtLeast {
        inner: Box::new(MetricExpr::SumOrZero(ColumnRef::join("negative_followed_tags", "points"))),
        floor: -10.0,
    })
}

fn matching_positive_tags_intersection_count() -> FactorSpecBuilder {
    with_tag_joins(
        lever_for(
            "matching_positive_tags_intersection_count",
            "Weight to give for number of the intersecting tags of the item and \
             viewer positive follows.",
            ValueRange::between(0.0, 4.0),
            true,
        ),
        tag_follows("followed_tags", CompareOp::Ge),
    )
    .value_source(MetricExpr::Count(ColumnRef::join("followed_tags", "id")))
}

fn matching_positive_tags_intersection_points() -> FactorSpecBuilder {
    with_tag_joins(
        lever_for(
            "matching_positive_tags_intersection_points",
            "Weight to give for the sum points of the intersecting tags of the item and \
             viewer positive follows.",
            ValueRange::between(0.0, 10.0),
            true,
        ),
        tag_follows("followed_tags", CompareOp::Ge),
    )
    .value_source(MetricExpr::AtMost {
        inner: Box::new(MetricExpr::SumOrZero(ColumnRef::join("followed_tags", "points"))),
        cap: 10.0,
    })
}

fn privileged_user_reaction() -> FactorSpecBuilder {
    lever_for(
        "privileged_user_reaction",
        "-1 when privileged user reactions down-vote, 0 when neutral, and 1 when positive.",
        ValueRange::between(-1.0, 1.0),
        false,
    )
    .value_source(MetricExpr::Banded {
        column: ColumnRef::item("privileged_users_reaction_points_sum"),
        bands: vec![
            Band::new(CompareOp::Lt, ParamName::NegativeReactionThreshold, -1.0),
            Band::new(CompareOp::Gt, ParamName::PositiveReactionThreshold, 1.0),
        ],
        otherwise: 0.0,
    })
    .group_by(ColumnRef::item("privileged_users_reaction_points_sum"))
}

// The lower bound of each band is inclusive and the upper bound exclusive.
fn privileged_user_reaction_granular() -> FactorSpecBuilder {
    lever_for(
        "privileged_user_reaction_granular",
        "A more granular configuration for privileged user reactions.",
        ValueRange::between(-2.0, 2.0),
        false,
    )
    .value_source(MetricExpr::Banded {
        column: ColumnRef::item("privileged_users_reaction_points_sum"),
        bands: vec![
            Band::new(CompareOp::Lt, ParamName::VeryNegativeReactionThreshold, -2.0),
            Band::new(CompareOp::Lt, ParamName::NegativeReactionThreshold, -1.0),
            Band::new(CompareOp::Lt, ParamName::PositiveReactionThreshold, 0.0),
            Band::new(CompareOp::Lt, ParamName::VeryPositiveReactionThreshold, 1.0),
            Band::new(CompareOp::Ge, ParamName::VeryPositiveReactionThreshold, 2.0),
        ],
        otherwise: 0.0,
    })
    .group_by(ColumnRef::item("privileged_users_reaction_points_sum"))
}

fn public_reactions() -> FactorSpecBuilder {
    lever_for(
        "public_reactions",
        "Weight to give for the number of public reactions on the item.",
        ValueRange::at_least(0.0),
        false,
    )
    .value_source(MetricExpr::Column(ColumnRef::item("public_reactions_count")))
    .group_by(ColumnRef::item("public_reactions_count"))
}

fn public_reactions_score() -> FactorSpecBuilder {
    lever_for(
        "public_reactions_score",
        "Weight to give based on the item score (sum of the scores of its reactions).",
        ValueRange::at_least(0.0),
        false,
    )
    .value_source(MetricExpr::Column(ColumnRef::item("score")))
    .group_by(ColumnRef::item("score"))
}
