//! Market News Broadcaster — Binary Entrypoint
//! Boots the Axum HTTP server: `/cron` runs a cycle, `/bot` takes Telegram
//! webhook updates, `/health`, `/admin/subscribers` and `/metrics` observe.

use std::sync::Arc;

use market_news_broadcaster::{
    api::{self, AppState},
    config::{self, AppConfig},
    ingest,
    metrics::Metrics,
    scoring::HotReloadKeywords,
    store_from_config, transport_from_config, Pipeline,
};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `RUST_LOG` filter; JSON lines when `LOG_FORMAT=json`, compact otherwise.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    // Shuttle may already have installed a subscriber; keep it in that case.
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::load_default()?;
    let sources = config::load_sources_default()?;
    let providers = ingest::providers_from_config(&sources)?;
    let keywords = Arc::new(HotReloadKeywords::from_env()?);
    tracing::info!(
        sources = sources.sources.len(),
        keywords_version = %keywords.current().version,
        "configuration loaded"
    );

    let store = store_from_config(&config);
    let transport = transport_from_config(&config);
    let pipeline = Arc::new(Pipeline::new(config, store, providers, keywords, transport));

    let metrics = match Metrics::init() {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = ?e, "metrics recorder not installed");
            None
        }
    };

    let router = api::create_router(AppState::new(pipeline), metrics.as_ref());
    Ok(router.into())
}
