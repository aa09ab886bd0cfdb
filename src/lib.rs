// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod article;
pub mod bot;
pub mod config;
pub mod dedup;
pub mod metrics;
pub mod pipeline;
pub mod selection;
pub mod subscribers;

// Cycle stages
pub mod broadcast;
pub mod ingest;
pub mod scoring;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router;
pub use crate::article::{Article, ImpactCategory, SourceTier};
pub use crate::pipeline::{CycleReport, CycleStatus, Pipeline};

use std::sync::Arc;

use crate::broadcast::{LogTransport, MessageTransport, TelegramTransport};
use crate::config::AppConfig;
use crate::store::{KvStore, MemoryStore, UpstashStore};

/// Upstash when both REST credentials are configured, in-memory otherwise.
pub fn store_from_config(config: &AppConfig) -> Arc<dyn KvStore> {
    match (&config.kv_rest_api_url, &config.kv_rest_api_token) {
        (Some(url), Some(token)) => {
            tracing::info!(target: "store", "using Upstash REST store");
            Arc::new(UpstashStore::new(url.clone(), token.clone()))
        }
        _ => {
            tracing::warn!(target: "store", "KV_REST_API_URL/TOKEN not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    }
}

/// Telegram when a bot token is configured, log-only otherwise.
pub fn transport_from_config(config: &AppConfig) -> Arc<dyn MessageTransport> {
    match &config.bot_token {
        Some(token) => Arc::new(TelegramTransport::new(token.clone())),
        None => {
            tracing::warn!(target: "broadcast", "BOT_TOKEN not set, messages are logged only");
            Arc::new(LogTransport)
        }
    }
}
