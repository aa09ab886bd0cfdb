// tests/metrics.rs
//
// Cycle metrics: series pushed by `record_cycle` and the /metrics route.
// Recorders are installed locally so tests never touch the global one.

use std::path::Path;
use std::sync::Arc;

use axum::body::{self, Body};
use http::{Request, StatusCode};
use chrono::{DateTime, TimeZone, Utc};
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use tower::ServiceExt;

use market_news_broadcaster::api::{create_router, AppState};
use market_news_broadcaster::article::SourceTier;
use market_news_broadcaster::broadcast::LogTransport;
use market_news_broadcaster::config::{AppConfig, DispatchConfig, QuietHoursConfig, SourceConfig};
use market_news_broadcaster::ingest::types::SourceProvider;
use market_news_broadcaster::ingest::RssProvider;
use market_news_broadcaster::metrics::{record_cycle, Metrics};
use market_news_broadcaster::scoring::{HotReloadKeywords, KeywordTables};
use market_news_broadcaster::store::MemoryStore;
use market_news_broadcaster::subscribers::SubscriberKind;
use market_news_broadcaster::{CycleReport, Pipeline};

const CORE_XML: &str = include_str!("fixtures/core_feed.xml");

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 6, 3, 0, 0).unwrap()
}

fn pipeline(providers: Vec<Arc<dyn SourceProvider>>) -> Pipeline {
    let config = AppConfig {
        quiet_hours: QuietHoursConfig {
            enabled: false,
            ..Default::default()
        },
        dispatch: DispatchConfig {
            send_delay_ms: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    let keywords = Arc::new(HotReloadKeywords::with_initial(
        Some(Path::new("/nonexistent/keywords.json")),
        KeywordTables::seed().normalized(),
    ));
    Pipeline::new(
        config,
        Arc::new(MemoryStore::new()),
        providers,
        keywords,
        Arc::new(LogTransport),
    )
}

async fn report_with_broadcast() -> CycleReport {
    let source = SourceConfig::new(
        "CNBC Market",
        "https://www.cnbcindonesia.com/market/rss",
        SourceTier::Core,
        5_000,
        1.2,
    );
    let providers: Vec<Arc<dyn SourceProvider>> =
        vec![Arc::new(RssProvider::from_fixture_str(source, CORE_XML))];
    let p = pipeline(providers);
    p.registry()
        .subscribe(SubscriberKind::User, "1", now())
        .await
        .unwrap();
    p.run_cycle_at(now()).await.unwrap()
}

fn counter(snapshot: &[(String, Vec<(String, String)>, u64)], name: &str, label: Option<(&str, &str)>) -> u64 {
    snapshot
        .iter()
        .filter(|(n, labels, _)| {
            n == name
                && label.map_or(true, |(k, v)| labels.iter().any(|(lk, lv)| lk == k && lv == v))
        })
        .map(|(_, _, v)| *v)
        .sum()
}

#[tokio::test(start_paused = true)]
async fn record_cycle_counts_every_stage() {
    let report = report_with_broadcast().await;

    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    metrics::with_local_recorder(&recorder, || record_cycle(&report));

    let counters: Vec<(String, Vec<(String, String)>, u64)> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter_map(|(key, _, _, value)| match value {
            DebugValue::Counter(v) => {
                let k = key.key();
                let labels = k
                    .labels()
                    .map(|l| (l.key().to_string(), l.value().to_string()))
                    .collect();
                Some((k.name().to_string(), labels, v))
            }
            _ => None,
        })
        .collect();

    assert_eq!(counter(&counters, "cycle_runs_total", Some(("status", "success"))), 1);
    assert_eq!(counter(&counters, "fetch_sources_total", Some(("result", "ok"))), 1);
    assert_eq!(counter(&counters, "articles_scored_total", Some(("category", "HIGH"))), 1);
    assert_eq!(counter(&counters, "articles_scored_total", Some(("category", "LOW"))), 1);
    assert_eq!(counter(&counters, "articles_selected_total", None), 1);
    assert_eq!(counter(&counters, "broadcast_messages_total", Some(("result", "sent"))), 1);
    assert_eq!(counter(&counters, "broadcast_messages_total", Some(("result", "failed"))), 0);
}

#[tokio::test]
async fn prometheus_text_carries_cycle_series() {
    let report = pipeline(Vec::new()).run_cycle_at(now()).await.unwrap();

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::with_local_recorder(&recorder, || record_cycle(&report));

    let text = handle.render();
    assert!(text.contains(r#"cycle_runs_total{status="no_articles"} 1"#), "{text}");
    assert!(text.contains("cycle_duration_ms"), "{text}");
    assert!(text.contains("cycle_last_success_ts"), "{text}");
}

#[tokio::test]
async fn metrics_route_serves_exposition_text() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let metrics = Metrics {
        handle: recorder.handle(),
    };
    let p = Arc::new(pipeline(Vec::new()));
    let report = p.run_cycle_at(now()).await.unwrap();
    metrics::with_local_recorder(&recorder, || record_cycle(&report));

    let app = create_router(AppState::new(p), Some(&metrics));
    let resp = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("cycle_runs_total"), "{text}");
}
