use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::pipeline::{CycleReport, CycleStatus};

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_cycle_metrics();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time descriptions so series show up with help text on /metrics.
pub fn describe_cycle_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("cycle_runs_total", "Pipeline cycles completed, by status.");
        describe_histogram!("cycle_duration_ms", "Wall time of one cycle in milliseconds.");
        describe_gauge!("cycle_last_success_ts", "Unix ts of the last completed cycle.");
        describe_counter!("fetch_sources_total", "Source fetch attempts, by result.");
        describe_counter!("articles_scored_total", "Articles scored, by impact category.");
        describe_counter!("articles_duplicate_total", "Articles dropped by deduplication.");
        describe_counter!("articles_selected_total", "Articles selected for broadcast.");
        describe_counter!("articles_suppressed_total", "Articles suppressed by selection.");
        describe_counter!("broadcast_messages_total", "Per-recipient delivery outcomes, by result.");
    });
}

/// Push one cycle's numbers into the installed recorder.
pub fn record_cycle(report: &CycleReport) {
    describe_cycle_metrics();
    let m = &report.metrics;

    let status = match report.status {
        CycleStatus::Success => "success",
        CycleStatus::NoArticles => "no_articles",
    };
    counter!("cycle_runs_total", "status" => status).increment(1);
    histogram!("cycle_duration_ms").record(report.duration_ms as f64);
    gauge!("cycle_last_success_ts").set(report.started_at.timestamp() as f64);

    counter!("fetch_sources_total", "result" => "ok").increment(m.fetch.succeeded as u64);
    counter!("fetch_sources_total", "result" => "failed").increment(m.fetch.failed as u64);
    counter!("fetch_sources_total", "result" => "skipped").increment(m.fetch.skipped as u64);

    counter!("articles_scored_total", "category" => "HIGH").increment(m.scoring.high as u64);
    counter!("articles_scored_total", "category" => "MED").increment(m.scoring.med as u64);
    counter!("articles_scored_total", "category" => "LOW").increment(m.scoring.low as u64);

    counter!("articles_duplicate_total").increment(m.dedup.duplicates as u64);
    counter!("articles_selected_total").increment(m.priority.selected as u64);
    counter!("articles_suppressed_total").increment(m.priority.suppressed as u64);

    let b = &m.broadcast;
    for (result, n) in [
        ("sent", b.sent),
        ("skipped_duplicate", b.skipped_duplicate),
        ("failed", b.failed),
        ("quiet_hours_skipped", b.quiet_hours_skipped),
        ("skipped_unreachable", b.skipped_unreachable),
    ] {
        counter!("broadcast_messages_total", "result" => result).increment(n as u64);
    }
}
