//! Run one cycle locally against an in-memory store, logging messages instead
//! of sending them. Prints the cycle report as JSON.
//!
//! Usage: `run-cycle [feed.xml ...]`. With feed files every file is served as
//! a CORE source; without, the configured sources are fetched over HTTP.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use market_news_broadcaster::{
    broadcast::LogTransport,
    config::{self, AppConfig, SourceConfig},
    ingest::{self, types::SourceProvider, RssProvider},
    scoring::HotReloadKeywords,
    store::MemoryStore,
    subscribers::SubscriberKind,
    Pipeline, SourceTier,
};

const DRY_RUN_CHAT: &str = "dry-run";

fn fixture_providers(paths: &[String]) -> Result<Vec<Arc<dyn SourceProvider>>> {
    paths
        .iter()
        .map(|p| {
            let xml = std::fs::read_to_string(p).with_context(|| format!("reading {p}"))?;
            let src = SourceConfig::new(p, &format!("file://{p}"), SourceTier::Core, 5_000, 1.0);
            Ok(Arc::new(RssProvider::from_fixture_str(src, &xml)) as Arc<dyn SourceProvider>)
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();

    let mut config = AppConfig::load_default()?;
    // Dry runs should not be held back by the clock.
    config.quiet_hours.enabled = false;
    config.dispatch.send_delay_ms = 0;

    let files: Vec<String> = std::env::args().skip(1).collect();
    let providers = if files.is_empty() {
        ingest::providers_from_config(&config::load_sources_default()?)?
    } else {
        fixture_providers(&files)?
    };

    let pipeline = Pipeline::new(
        config,
        Arc::new(MemoryStore::new()),
        providers,
        Arc::new(HotReloadKeywords::from_env()?),
        Arc::new(LogTransport),
    );
    pipeline
        .registry()
        .subscribe(SubscriberKind::User, DRY_RUN_CHAT, Utc::now())
        .await?;

    let report = pipeline.run_cycle().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
