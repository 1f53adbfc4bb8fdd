//! Configuration for the feed ranking engine, loaded from `FEED_RANKING_*`
//! environment variables (and `.env` when present).
use crate::models::{
    Page, ReactionThresholds, ViewerContext, DEFAULT_DAYS_SINCE_PUBLISHED,
    DEFAULT_NEGATIVE_REACTION_THRESHOLD, DEFAULT_PAGE_SIZE, DEFAULT_POSITIVE_REACTION_THRESHOLD,
    DEFAULT_USER_EXPERIENCE_LEVEL, PAGE_VIEW_OFFSET_HOURS,
};
use crate::services::factors::{self, FactorRegistry, VariantConfig};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub const ENV_PREFIX: &str = "FEED_RANKING_";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Upper bound on a single store execution
    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,

    /// Eligibility window for viewers without page view history
    #[serde(default = "default_days_since_published")]
    pub days_since_published: i64,

    #[serde(default = "default_page_view_offset_hours")]
    pub page_view_offset_hours: i64,

    /// Experience level assumed for viewers who never set one
    #[serde(default = "default_experience_level")]
    pub default_experience_level: i64,

    #[serde(default = "default_negative_reaction_threshold")]
    pub negative_reaction_threshold: i64,

    #[serde(default = "default_positive_reaction_threshold")]
    pub positive_reaction_threshold: i64,

    #[serde(default)]
    pub very_negative_reaction_threshold: Option<i64>,

    #[serde(default)]
    pub very_positive_reaction_threshold: Option<i64>,

    /// Variant JSON document; the built-in variant is used when unset
    #[serde(default)]
    pub variant_path: Option<PathBuf>,

    /// Comma separated factor keys to switch off at boot
    #[serde(default)]
    pub disabled_factors: Vec<String>,

    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_storage_timeout_ms() -> u64 {
    2000
}

fn default_days_since_published() -> i64 {
    DEFAULT_DAYS_SINCE_PUBLISHED
}

fn default_page_view_offset_hours() -> i64 {
    PAGE_VIEW_OFFSET_HOURS
}

fn default_experience_level() -> i64 {
    DEFAULT_USER_EXPERIENCE_LEVEL
}

fn default_negative_reaction_threshold() -> i64 {
    DEFAULT_NEGATIVE_REACTION_THRESHOLD
}

fn default_positive_reaction_threshold() -> i64 {
    DEFAULT_POSITIVE_REACTION_THRESHOLD
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_timeout_ms: default_storage_timeout_ms(),
            days_since_published: default_days_since_published(),
            page_view_offset_hours: default_page_view_offset_hours(),
            default_experience_level: default_experience_level(),
            negative_reaction_threshold: default_negative_reaction_threshold(),
            positive_reaction_threshold: default_positive_reaction_threshold(),
            very_negative_reaction_threshold: None,
            very_positive_reaction_threshold: None,
            variant_path: None,
            disabled_factors: Vec::new(),
            page_size: default_page_size(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from explicit `(name, value)` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX).from_iter(vars)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn reaction_thresholds(&self) -> ReactionThresholds {
        ReactionThresholds {
            negative: Some(self.negative_reaction_threshold),
            positive: Some(self.positive_reaction_threshold),
            very_negative: self.very_negative_reaction_threshold,
            very_positive: self.very_positive_reaction_threshold,
        }
    }

    /// Disabled keys with blanks from stray commas removed.
    pub fn disabled_factor_keys(&self) -> Vec<&str> {
        self.disabled_factors
            .iter()
            .map(|key| key.trim())
            .filter(|key| !key.is_empty())
            .collect()
    }

    pub fn load_variant(&self) -> factors::Result<VariantConfig> {
        match &self.variant_path {
            Some(path) => {
                info!(path = %path.display(), "Loading feed variant from file");
                VariantConfig::from_path(path)
            }
            None => VariantConfig::builtin(),
        }
    }

    /// Builds and validates the registry: variant first, then operator
    /// toggles on top.
    pub fn build_registry(&self) -> factors::Result<FactorRegistry> {
        let registry = self.load_variant()?.into_registry()?;
        registry.with_disabled(&self.disabled_factor_keys())
    }

    /// Viewer context for one request, using the configured defaults.
    pub fn viewer_context(
        &self,
        viewer_id: Option<Uuid>,
        now: DateTime<Utc>,
        second_latest_page_view: Option<DateTime<Utc>>,
    ) -> ViewerContext {
        ViewerContext::builder(now)
            .maybe_viewer(viewer_id)
            .default_experience_level(Some(self.default_experience_level))
            .reaction_thresholds(self.reaction_thresholds())
            .page_view_window(
                second_latest_page_view,
                self.days_since_published,
                self.page_view_offset_hours,
            )
            .build()
    }

    pub fn page(&self, number: usize) -> Page {
        Page {
            size: self.page_size,
            number,
        }
    }
}
