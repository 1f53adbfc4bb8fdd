use anyhow::Context;
use chrono::{Duration, Utc};
use feed_ranking::models::CandidatePredicate;
use feed_ranking::services::storage::StoredItem;
use feed_ranking::{Config, InMemoryStore, RankingPipeline, RankingRequest};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    // Load config
    let config = Config::from_env().context("Failed to load feed ranking config")?;

    let registry = config
        .build_registry()
        .context("Feed factor configuration is invalid")?;

    for spec in registry.iter() {
        info!(
            factor = %spec.key(),
            enabled = spec.enabled(),
            requires_viewer = spec.requires_viewer(),
            range = %spec.range(),
            joins = spec.joins().len(),
            "{}",
            spec.label()
        );
    }
    info!(
        order_by = %registry.order().name(),
        "{}",
        registry.order().label()
    );

    let now = Utc::now();
    let store = InMemoryStore::new(vec![
        StoredItem::published(Uuid::new_v4(), now - Duration::hours(3))
            .with_column("comments_count", 4.0),
        StoredItem::published(Uuid::new_v4(), now - Duration::days(2))
            .with_column("featured", 1.0),
        StoredItem::published(Uuid::new_v4(), now - Duration::days(5))
            .with_column("public_reactions_count", 12.0),
    ]);

    let pipeline = RankingPipeline::new(Arc::new(registry), Arc::new(store))
        .with_storage_timeout(config.storage_timeout());

    let viewers = [
        ("anonymous", config.viewer_context(None, now, None)),
        (
            "signed_in",
            config.viewer_context(Some(Uuid::new_v4()), now, Some(now - Duration::days(1))),
        ),
    ];

    for (name, viewer) in viewers {
        let (plan, skipped) = pipeline.compose_plan(&viewer);
        println!("# plan for {} viewer", name);
        println!("{}", serde_json::to_string_pretty(&plan)?);
        if !skipped.is_empty() {
            println!("# skipped factors");
            println!("{}", serde_json::to_string_pretty(&skipped)?);
        }

        let request = RankingRequest::new(viewer)
            .with_candidates(CandidatePredicate::default().with_page(config.page(1)))
            .with_diagnostics(true);
        let feed = pipeline
            .rank(&request)
            .await
            .with_context(|| format!("Sample ranking failed for {} viewer", name))?;
        println!("# sample ranking for {} viewer", name);
        println!("{}", serde_json::to_string_pretty(&feed.items)?);
    }

    Ok(())
}
