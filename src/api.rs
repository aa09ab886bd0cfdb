use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::bot::{BotHandler, Update};
use crate::metrics::Metrics;
use crate::pipeline::Pipeline;
use crate::subscribers::Subscriber;

pub const ADMIN_SECRET_HEADER: &str = "x-admin-secret";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub bot: BotHandler,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        let config = pipeline.config();
        let bot = BotHandler::new(
            pipeline.registry().clone(),
            config.admin_user_ids.clone(),
            config.local_offset(),
        );
        Self { pipeline, bot }
    }
}

pub fn create_router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/cron", get(cron))
        .route("/bot", post(bot_webhook).get(bot_info))
        .route("/admin/subscribers", get(admin_subscribers).post(admin_export))
        .layer(CorsLayer::very_permissive())
        .with_state(state);
    match metrics {
        Some(m) => router.merge(m.router()),
        None => router,
    }
}

fn error_json(status: StatusCode, msg: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "error": msg.to_string() }))).into_response()
}

async fn health(State(state): State<AppState>) -> Response {
    let now = Utc::now();
    match state.pipeline.ledger().health().await {
        Ok(record) => {
            let last = record.as_ref().map(|r| r.timestamp);
            let minutes = last.map(|t| (now - t).num_minutes());
            let stale_after = state.pipeline.config().health_stale_after_minutes;
            let healthy = minutes.is_some_and(|m| m < stale_after);
            let code = if healthy {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            let body = json!({
                "status": if healthy { "healthy" } else { "degraded" },
                "last_successful_run": last,
                "last_execution_id": record.map(|r| r.execution_id),
                "minutes_since_last_run": minutes,
                "current_time": now,
            });
            (code, Json(body)).into_response()
        }
        Err(e) => {
            tracing::error!(target: "api", error = %e, "health check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

async fn cron(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = state.pipeline.config().cron_secret.as_deref() {
        if bearer(&headers) != Some(secret) {
            return error_json(StatusCode::UNAUTHORIZED, "Unauthorized");
        }
    }
    match state.pipeline.run_cycle().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            tracing::error!(target: "api", error = format!("{e:#}"), "cycle failed");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
        }
    }
}

async fn bot_info() -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "webhook": "POST Telegram updates to this endpoint" }))
}

async fn bot_webhook(State(state): State<AppState>, Json(update): Json<Update>) -> Response {
    let reply = match state.bot.handle_update(&update, Utc::now()).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(target: "api", update_id = update.update_id, error = %e, "bot update failed");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, e);
        }
    };
    if let Some(reply) = reply {
        if let Err(e) = state
            .pipeline
            .transport()
            .send_message(&reply.chat_id, &reply.text)
            .await
        {
            tracing::warn!(target: "api", chat_id = %reply.chat_id, error = %e, "bot reply not sent");
        }
    }
    Json(json!({ "ok": true })).into_response()
}

fn authorize_admin(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let secret = headers
        .get(ADMIN_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if state.pipeline.config().is_admin(secret) {
        Ok(())
    } else {
        Err(error_json(StatusCode::UNAUTHORIZED, "Unauthorized"))
    }
}

async fn admin_subscribers(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize_admin(&state, &headers) {
        return resp;
    }
    match state.pipeline.registry().all().await {
        Ok(subs) => {
            let list: Vec<_> = subs
                .iter()
                .map(|s| {
                    json!({
                        "identifier": s.identifier,
                        "type": s.subscriber_type,
                        "status": s.status,
                        "created_at": s.created_at,
                        "preferences": s.preferences,
                    })
                })
                .collect();
            Json(json!({ "success": true, "count": list.len(), "subscribers": list }))
                .into_response()
        }
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// `identifier,type,status,created_at,preferences`, one row per subscriber.
pub fn subscribers_csv(subs: &[Subscriber]) -> String {
    let mut out = String::from("identifier,type,status,created_at,preferences\n");
    for s in subs {
        let prefs = serde_json::to_string(&s.preferences).unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{},\"{}\"\n",
            s.identifier,
            s.subscriber_type,
            s.status,
            s.created_at.to_rfc3339(),
            prefs.replace('"', "\"\""),
        ));
    }
    out
}

async fn admin_export(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize_admin(&state, &headers) {
        return resp;
    }
    match state.pipeline.registry().all().await {
        Ok(subs) => (
            [
                (header::CONTENT_TYPE, "text/csv"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=subscribers.csv",
                ),
            ],
            subscribers_csv(&subs),
        )
            .into_response(),
        Err(e) => error_json(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}
