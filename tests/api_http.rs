// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health (no run yet, fresh run)
// - GET /cron   (secret check, cycle report body)
// - POST /bot   (registration + reply through the transport)
// - GET/POST /admin/subscribers (auth header, JSON list, CSV export)

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{header, Request, StatusCode},
    Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value as Json};
use tower::ServiceExt as _; // for `oneshot`

use market_news_broadcaster::api::{create_router, AppState, ADMIN_SECRET_HEADER};
use market_news_broadcaster::article::SourceTier;
use market_news_broadcaster::broadcast::{MessageTransport, SendError};
use market_news_broadcaster::config::{AppConfig, QuietHoursConfig, SourceConfig};
use market_news_broadcaster::ingest::types::SourceProvider;
use market_news_broadcaster::ingest::RssProvider;
use market_news_broadcaster::scoring::{HotReloadKeywords, KeywordTables};
use market_news_broadcaster::store::MemoryStore;
use market_news_broadcaster::subscribers::SubscriberKind;
use market_news_broadcaster::Pipeline;

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

const FEED: &str = r#"<rss version="2.0"><channel><title>t</title>
<item><title>Stub</title><link>https://stub.example/1</link></item>
</channel></rss>"#;

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), SendError> {
        self.sent.lock().push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

struct TestApp {
    router: Router,
    pipeline: Arc<Pipeline>,
    transport: Arc<RecordingTransport>,
}

fn test_app(cron_secret: Option<&str>) -> TestApp {
    let config = AppConfig {
        admin_user_ids: vec!["42".to_string()],
        cron_secret: cron_secret.map(str::to_string),
        quiet_hours: QuietHoursConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let source = SourceConfig::new("Stub", "https://stub.example/rss", SourceTier::Core, 1_000, 1.0);
    let providers: Vec<Arc<dyn SourceProvider>> =
        vec![Arc::new(RssProvider::from_fixture_str(source, FEED))];
    let keywords = Arc::new(HotReloadKeywords::with_initial(
        Some(Path::new("/nonexistent/keywords.json")),
        KeywordTables::seed().normalized(),
    ));
    let transport = Arc::new(RecordingTransport::default());
    let pipeline = Arc::new(Pipeline::new(
        config,
        Arc::new(MemoryStore::new()),
        providers,
        keywords,
        transport.clone(),
    ));
    TestApp {
        router: create_router(AppState::new(pipeline.clone()), None),
        pipeline,
        transport,
    }
}

async fn json_body(resp: axum::response::Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET")
}

#[tokio::test]
async fn health_is_503_before_first_run_and_200_after() {
    let app = test_app(None);

    let resp = app.router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "degraded");
    assert!(body["last_successful_run"].is_null());

    app.pipeline.run_cycle().await.unwrap();

    let resp = app.router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["minutes_since_last_run"], 0);
}

#[tokio::test]
async fn cron_requires_bearer_secret_when_configured() {
    let app = test_app(Some("s3cret"));

    let resp = app.router.clone().oneshot(get("/cron")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/cron")
        .header(header::AUTHORIZATION, "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let resp = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let report = json_body(resp).await;
    assert_eq!(report["status"], "success");
    assert_eq!(report["metrics"]["fetch"]["succeeded"], 1);
    assert!(report["execution_id"].as_str().is_some_and(|s| s.len() == 36));
    assert_eq!(report["sources"][0]["name"], "Stub");
    assert_eq!(report["sources"][0]["status"], "ok");
}

#[tokio::test]
async fn bot_webhook_registers_chat_and_replies() {
    let app = test_app(None);
    let update = json!({
        "update_id": 10,
        "message": {
            "chat": { "id": 555, "type": "private" },
            "from": { "id": 555 },
            "text": "/subscribe"
        }
    });
    let req = Request::builder()
        .method("POST")
        .uri("/bot")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(update.to_string()))
        .unwrap();

    let resp = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let sub = app
        .pipeline
        .registry()
        .get(SubscriberKind::User, "555")
        .await
        .unwrap()
        .expect("registered");
    assert!(sub.is_active());

    let sent = app.transport.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "555");
    assert!(sent[0].1.contains("Berhasil berlangganan"));
}

#[tokio::test]
async fn admin_routes_check_header() {
    let app = test_app(None);
    app.pipeline
        .registry()
        .subscribe(SubscriberKind::Group, "-100", chrono::Utc::now())
        .await
        .unwrap();

    let resp = app
        .router
        .clone()
        .oneshot(get("/admin/subscribers"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/admin/subscribers")
        .header(ADMIN_SECRET_HEADER, "7")
        .body(Body::empty())
        .unwrap();
    let resp = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/admin/subscribers")
        .header(ADMIN_SECRET_HEADER, "42")
        .body(Body::empty())
        .unwrap();
    let resp = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["subscribers"][0]["identifier"], "-100");
    assert_eq!(body["subscribers"][0]["type"], "group");
}

#[tokio::test]
async fn admin_export_is_csv() {
    let app = test_app(None);
    app.pipeline
        .registry()
        .subscribe(SubscriberKind::User, "9", chrono::Utc::now())
        .await
        .unwrap();

    let req = Request::builder()
        .method("POST")
        .uri("/admin/subscribers")
        .header(ADMIN_SECRET_HEADER, "42")
        .body(Body::empty())
        .unwrap();
    let resp = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/csv");

    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    let csv = String::from_utf8(bytes.to_vec()).unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("identifier,type,status,created_at,preferences"));
    let row = lines.next().unwrap();
    assert!(row.starts_with("9,user,active,"), "{row}");
    assert!(row.contains(r#""{""impact_filter"":[""HIGH"",""MED""]}""#), "{row}");
}
