//! One broadcast cycle: fetch → normalize → score → dedup → select →
//! dispatch → mark dispatched → health.
//!
//! Cycles must not overlap; the scheduler invoking `/cron` guarantees that.
//! Only storage failures abort a cycle. Everything written before the
//! failure (delivery markers, sent messages) stays, and the markers keep the
//! next cycle from repeating it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::Instrument;

use crate::article::{Article, ImpactCategory};
use crate::broadcast::{BroadcastMetrics, Dispatcher, MessageTransport, QuietHoursPolicy, WindowPolicy};
use crate::config::AppConfig;
use crate::dedup;
use crate::ingest::circuit_breaker::CircuitBreaker;
use crate::ingest::types::{FetchOutcome, FetchStatus, SourceProvider};
use crate::ingest;
use crate::scoring::{self, HotReloadKeywords};
use crate::selection::{self, SelectionMetrics};
use crate::store::{HealthRecord, KvStore, Ledger};
use crate::subscribers::SubscriberRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Success,
    NoArticles,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchMetrics {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Sources not attempted because their circuit was open.
    pub skipped: usize,
    pub raw_articles: usize,
    pub stale_dropped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScoringMetrics {
    pub high: usize,
    pub med: usize,
    pub low: usize,
    pub keywords_version: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupMetrics {
    pub unique: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleMetrics {
    pub fetch: FetchMetrics,
    pub scoring: ScoringMetrics,
    pub dedup: DedupMetrics,
    pub priority: SelectionMetrics,
    pub broadcast: BroadcastMetrics,
}

/// Short view of a selected article for the cycle report.
#[derive(Debug, Clone, Serialize)]
pub struct SelectedArticle {
    pub send_order: u32,
    pub fingerprint: String,
    pub title: String,
    pub source: String,
    pub impact_category: ImpactCategory,
    pub impact_score: i64,
}

impl From<&Article> for SelectedArticle {
    fn from(a: &Article) -> Self {
        Self {
            send_order: a.send_order.unwrap_or_default(),
            fingerprint: a.fingerprint.clone(),
            title: a.title.clone(),
            source: a.source.clone(),
            impact_category: a.impact_category,
            impact_score: a.impact_score,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub execution_id: String,
    pub status: CycleStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub metrics: CycleMetrics,
    pub sources: Vec<FetchOutcome>,
    pub selected: Vec<SelectedArticle>,
}

pub struct Pipeline {
    config: AppConfig,
    providers: Vec<Arc<dyn SourceProvider>>,
    keywords: Arc<HotReloadKeywords>,
    ledger: Ledger,
    registry: SubscriberRegistry,
    breaker: CircuitBreaker,
    dispatcher: Dispatcher,
    transport: Arc<dyn MessageTransport>,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn KvStore>,
        providers: Vec<Arc<dyn SourceProvider>>,
        keywords: Arc<HotReloadKeywords>,
        transport: Arc<dyn MessageTransport>,
    ) -> Self {
        let ledger = Ledger::new(Arc::clone(&store), config.ttl);
        let registry = SubscriberRegistry::new(store);
        let breaker = CircuitBreaker::new(ledger.clone(), config.breaker);
        let policy: Arc<dyn QuietHoursPolicy> = Arc::new(WindowPolicy::new(config.quiet_hours));
        let dispatcher = Dispatcher::new(
            Arc::clone(&transport),
            policy,
            ledger.clone(),
            config.dispatch,
            config.local_offset(),
        );
        Self {
            config,
            providers,
            keywords,
            ledger,
            registry,
            breaker,
            dispatcher,
            transport,
        }
    }

    /// Replace the configured quiet-hours window with another policy.
    pub fn with_quiet_hours_policy(mut self, policy: Arc<dyn QuietHoursPolicy>) -> Self {
        self.dispatcher = Dispatcher::new(
            Arc::clone(&self.transport),
            policy,
            self.ledger.clone(),
            self.config.dispatch,
            self.config.local_offset(),
        );
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<dyn MessageTransport> {
        &self.transport
    }

    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle treating `now` as the current time.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("cycle", execution_id = %execution_id);
        self.run_cycle_inner(execution_id, now).instrument(span).await
    }

    async fn run_cycle_inner(&self, execution_id: String, now: DateTime<Utc>) -> Result<CycleReport> {
        let t0 = std::time::Instant::now();
        tracing::info!(target: "pipeline", "cycle started");

        let mut metrics = CycleMetrics::default();
        let offset = self.config.local_offset();

        // 1) fetch
        let sources = ingest::fetch_all_sources(&self.providers, &self.breaker, now)
            .await
            .context("fetching sources")?;
        let mut normalized = Vec::new();
        for outcome in &sources {
            metrics.fetch.attempted += 1;
            match &outcome.status {
                FetchStatus::Ok { items } => {
                    metrics.fetch.succeeded += 1;
                    metrics.fetch.raw_articles += *items;
                }
                FetchStatus::CircuitOpen => metrics.fetch.skipped += 1,
                _ => metrics.fetch.failed += 1,
            }
            // 2) normalize
            normalized.extend(
                outcome
                    .items
                    .iter()
                    .cloned()
                    .filter_map(|raw| ingest::normalize_article(raw, &outcome.source, offset, now)),
            );
        }
        let (fresh, stale) = ingest::filter_fresh(normalized, &self.config.article_filter, now);
        metrics.fetch.stale_dropped = stale;
        tracing::info!(target: "pipeline", raw = metrics.fetch.raw_articles, fresh = fresh.len(), stale, "fetched");

        if fresh.is_empty() {
            return self
                .finish(execution_id, CycleStatus::NoArticles, now, t0, metrics, sources, Vec::new())
                .await;
        }

        // 3) score
        let tables = self.keywords.current();
        let scored = scoring::score_all(fresh, &tables);
        metrics.scoring.keywords_version = tables.version.clone();
        for a in &scored {
            match a.impact_category {
                ImpactCategory::High => metrics.scoring.high += 1,
                ImpactCategory::Med => metrics.scoring.med += 1,
                ImpactCategory::Low => metrics.scoring.low += 1,
            }
        }

        // 4) dedup
        let deduped = dedup::filter_duplicates(scored, &self.ledger)
            .await
            .context("checking dispatched ledger")?;
        metrics.dedup = DedupMetrics {
            unique: deduped.unique.len(),
            duplicates: deduped.duplicates.len(),
        };

        // 5) select
        let selection = selection::select_final_articles(deduped.unique, &self.config.cycle);
        metrics.priority = selection.metrics;
        for s in &selection.suppressed {
            tracing::debug!(target: "pipeline", fingerprint = %s.article.fingerprint, reason = ?s.reason, "suppressed");
        }

        // 6) dispatch
        let subscribers = self
            .registry
            .active(None)
            .await
            .context("loading active subscribers")?;
        let outcome = match self
            .dispatcher
            .dispatch(&selection.selected, &subscribers, now, &execution_id)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                // Keep what was learned about recipients before the failure.
                if let Err(e) = self.registry.apply_updates(&err.partial.updates, now).await {
                    tracing::error!(target: "pipeline", error = %e, "partial subscriber updates not applied");
                }
                return Err(err).context("dispatching");
            }
        };
        metrics.broadcast = outcome.metrics;
        self.registry
            .apply_updates(&outcome.updates, now)
            .await
            .context("applying subscriber updates")?;

        // 7) mark dispatched
        for article in &selection.selected {
            dedup::mark_dispatched(article, &self.ledger, &execution_id, now)
                .await
                .with_context(|| format!("marking {} dispatched", article.fingerprint))?;
        }

        let selected = selection.selected.iter().map(SelectedArticle::from).collect();
        self.finish(execution_id, CycleStatus::Success, now, t0, metrics, sources, selected)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        execution_id: String,
        status: CycleStatus,
        now: DateTime<Utc>,
        t0: std::time::Instant,
        metrics: CycleMetrics,
        sources: Vec<FetchOutcome>,
        selected: Vec<SelectedArticle>,
    ) -> Result<CycleReport> {
        let report = CycleReport {
            execution_id,
            status,
            started_at: now,
            duration_ms: t0.elapsed().as_millis() as u64,
            metrics,
            sources,
            selected,
        };
        let record = HealthRecord {
            timestamp: now,
            status: "healthy".to_string(),
            execution_id: report.execution_id.clone(),
        };
        self.ledger
            .record_health(&record)
            .await
            .context("writing health record")?;
        crate::metrics::record_cycle(&report);
        tracing::info!(
            target: "pipeline",
            status = ?report.status,
            duration_ms = report.duration_ms,
            selected = report.selected.len(),
            "cycle finished"
        );
        Ok(report)
    }
}
