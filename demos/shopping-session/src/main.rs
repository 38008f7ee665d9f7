//! Walks one shopping request through every memory tier.
//!
//! Configuration comes from the environment (see the workspace README); with
//! nothing set the session runs against the in-process store.

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tiered_memory::MemoryRuntime;
use tiered_memory::config::RuntimeConfig;
use tiered_memory::memory::{IndexOutcome, parse_preferences};
use tiered_memory::primitives::{NewEpisode, PreferenceKey};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(about = "Run a shopping session against the tiered memory")]
struct Args {
    /// Shopper identifier.
    #[arg(long, default_value = "demo-user")]
    user: String,

    /// Item being shopped for.
    #[arg(long, default_value = "headphones")]
    item: String,

    /// Free-text requirements, e.g. "under 3000, black, wireless".
    #[arg(long, default_value = "under 3000, black, wireless noise cancelling")]
    details: String,

    /// Clear scratch, episodes, and shared data before starting.
    #[arg(long)]
    fresh: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tiered_memory::telemetry::init_tracing("info")?;
    let args = Args::parse();

    let runtime = MemoryRuntime::connect(RuntimeConfig::from_env()?).await?;
    let memory = runtime.manager();

    if args.fresh {
        let episodes = memory.clear_episodes().await?;
        let shared = memory.clear_shared_data().await?;
        info!(episodes, shared, "cleared previous sessions");
    }
    memory.clear_short().await?;

    let key = PreferenceKey::for_user(&args.user, &args.item);
    let parsed = parse_preferences(&args.details);
    let record = memory.save_user_preferences(&key, parsed).await?;
    info!(key = %key, preferences = ?record.attributes(), "preferences saved");

    memory.write_short("current_item", json!(args.item)).await?;
    memory.write_short("stage", json!("searching")).await?;

    memory
        .send_message("planner", "searcher", &format!("find {} for {}", args.item, args.user))
        .await?;
    for message in memory.get_messages("searcher").await? {
        info!(from = message.from_agent(), body = message.body(), "searcher received");
    }

    let results = vec![
        json!({"name": format!("{} basic", args.item), "price": 1500}),
        json!({"name": format!("{} pro", args.item), "price": 2800}),
    ];
    memory.share_data("search_results", json!(results)).await?;
    memory.write_short("stage", json!("reviewing")).await?;

    let receipt = memory
        .append_episode(
            NewEpisode::new()
                .user_id(&args.user)
                .query(format!("{} {}", args.item, args.details))
                .item_details(&args.details)
                .final_items(results),
        )
        .await?;
    match &receipt.index {
        IndexOutcome::Indexed(point) => info!(point = %point, "episode indexed"),
        IndexOutcome::Disabled => info!("semantic recall disabled"),
        IndexOutcome::Failed(reason) => warn!(%reason, "episode logged but not indexed"),
    }

    if memory.is_semantic_enabled() {
        let similar = memory
            .semantic_search(&args.item, Some(&args.user), None, None)
            .await?;
        for found in similar {
            info!(score = found.score, query = found.episode.query(), "similar past session");
        }
    }

    let history = memory.get_episodes(Some(&args.user), Some(5)).await?;
    let summary = memory.short_term_summary().await?;
    info!(
        episodes = history.len(),
        scratch_keys = ?summary.keys,
        store = %memory.store().kind(),
        degraded = memory.store().is_degraded(),
        "session complete"
    );
    Ok(())
}
