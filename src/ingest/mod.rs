// src/ingest/mod.rs
pub mod circuit_breaker;
pub mod normalize;
pub mod rss;
pub mod types;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use std::sync::Arc;

use crate::article::SourceTier;
use crate::ingest::circuit_breaker::CircuitBreaker;
use crate::ingest::types::{FetchOutcome, FetchStatus, SourceProvider};

pub use normalize::{filter_fresh, normalize_article};
pub use rss::RssProvider;
pub use types::RawArticle;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_items_total", "Feed items parsed from providers.");
        describe_counter!(
            "ingest_source_errors_total",
            "Source fetch/parse failures, including timeouts."
        );
        describe_counter!(
            "ingest_source_skipped_total",
            "Sources skipped because their circuit breaker was open."
        );
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
    });
}

/// Build HTTP providers for every configured source.
pub fn providers_from_config(
    sources: &crate::config::SourcesConfig,
) -> Result<Vec<Arc<dyn SourceProvider>>> {
    let client = rss::http_client().context("building feed http client")?;
    Ok(sources
        .sources
        .iter()
        .map(|s| Arc::new(RssProvider::http(s.clone(), client.clone())) as Arc<dyn SourceProvider>)
        .collect())
}

/// Fetch every source, tier by tier (CORE, SUPPORT, NOISE). Sources within a
/// tier run concurrently, each bounded by its own timeout. A failing source
/// never fails the call; only breaker storage errors do.
pub async fn fetch_all_sources(
    providers: &[Arc<dyn SourceProvider>],
    breaker: &CircuitBreaker,
    now: DateTime<Utc>,
) -> Result<Vec<FetchOutcome>> {
    ensure_metrics_described();
    let mut outcomes = Vec::with_capacity(providers.len());

    for tier in SourceTier::ALL {
        let mut runnable = Vec::new();
        for p in providers.iter().filter(|p| p.source().tier == tier) {
            let src = p.source();
            if breaker
                .is_open(&src.url, now)
                .await
                .context("reading circuit breaker state")?
            {
                tracing::info!(target: "ingest", source = %src.name, "skipping source, circuit open");
                counter!("ingest_source_skipped_total").increment(1);
                outcomes.push(FetchOutcome::new(src.clone(), FetchStatus::CircuitOpen));
                continue;
            }
            runnable.push(Arc::clone(p));
        }

        let results = join_all(runnable.iter().map(|p| {
            let timeout = p.source().timeout();
            async move { tokio::time::timeout(timeout, p.fetch_latest()).await }
        }))
        .await;

        for (p, res) in runnable.iter().zip(results) {
            let src = p.source().clone();
            let outcome = match res {
                Ok(Ok(items)) => {
                    breaker
                        .record_success(&src.url)
                        .await
                        .context("clearing circuit breaker")?;
                    tracing::debug!(target: "ingest", source = %src.name, items = items.len(), "source fetched");
                    FetchOutcome {
                        status: FetchStatus::Ok { items: items.len() },
                        items,
                        source: src,
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(target: "ingest", source = %src.name, error = ?e, "source fetch failed");
                    counter!("ingest_source_errors_total").increment(1);
                    breaker
                        .record_failure(&src.url, now)
                        .await
                        .context("recording source failure")?;
                    FetchOutcome::new(src, FetchStatus::Failed { error: format!("{e:#}") })
                }
                Err(_) => {
                    tracing::warn!(target: "ingest", source = %src.name, timeout_ms = src.timeout_ms, "source fetch timed out");
                    counter!("ingest_source_errors_total").increment(1);
                    breaker
                        .record_failure(&src.url, now)
                        .await
                        .context("recording source timeout")?;
                    FetchOutcome::new(src, FetchStatus::TimedOut)
                }
            };
            outcomes.push(outcome);
        }
    }

    Ok(outcomes)
}
