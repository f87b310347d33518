//! Control HTTP surface: health/status, subscription management. No
//! authentication — this worker has no end-user accounts, only an
//! operator-facing API.

use crate::realtime::RealtimeFeed;
use crate::scheduler::Scheduler;
use crate::ticker::Ticker;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::info;

pub struct AppState {
    pub fast_feed: Arc<RealtimeFeed>,
    pub delayed_feed: Arc<RealtimeFeed>,
    pub scheduler: Arc<Scheduler>,
    pub started_at: Instant,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/subscriptions", get(subscriptions))
        .route("/subscribe", post(subscribe))
        .route("/unsubscribe", post(unsubscribe))
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let fast = state.fast_feed.status();
    let delayed = state.delayed_feed.status();
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime": state.started_at.elapsed().as_secs(),
        "memory": memory_usage_bytes(),
        "services": {
            "fastFeed": {
                "status": format!("{:?}", fast.state),
                "subscriptions": fast.subscriptions,
            },
            "delayedFeed": {
                "status": format!("{:?}", delayed.state),
                "subscriptions": delayed.subscriptions,
            },
            "scheduler": {
                "status": if state.scheduler.is_running() { "running" } else { "stopped" },
                "watchlist": state.scheduler.watchlist_snapshot(),
            },
        },
    }))
}

/// Best-effort RSS read from `/proc/self/status`; `0` when unavailable
/// (e.g. non-Linux sandboxes), which is an acceptable degraded value for
/// an operator-facing diagnostic field.
fn memory_usage_bytes() -> u64 {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|s| {
            s.lines()
                .find(|l| l.starts_with("VmRSS:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok())
        })
        .map(|kb| kb * 1024)
        .unwrap_or(0)
}

async fn subscriptions(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "subscriptions": state.scheduler.watchlist_snapshot() }))
}

#[derive(Deserialize)]
struct SymbolsBody {
    symbols: Value,
}

fn parse_symbols(body: &Result<Json<SymbolsBody>, axum::extract::rejection::JsonRejection>) -> Option<Vec<Ticker>> {
    let body = body.as_ref().ok()?;
    let array = body.symbols.as_array()?;
    let mut tickers = Vec::with_capacity(array.len());
    for v in array {
        tickers.push(Ticker::new(v.as_str()?));
    }
    Some(tickers)
}

async fn subscribe(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SymbolsBody>, axum::extract::rejection::JsonRejection>,
) -> impl IntoResponse {
    let Some(tickers) = parse_symbols(&body) else {
        return bad_request("symbols must be an array of strings");
    };

    state.fast_feed.subscribe(tickers.clone()).await;
    state.delayed_feed.subscribe(tickers.clone()).await;
    state.scheduler.add_to_watchlist(&tickers);

    let backfill_scheduler = state.scheduler.clone();
    let backfill_tickers = tickers.clone();
    tokio::spawn(async move {
        if let Err(e) = backfill_scheduler.backfill_history(&backfill_tickers).await {
            tracing::warn!(error = %e, "subscribe-triggered backfill failed");
        }
    });

    info!(tickers = ?tickers, "subscribed");
    (
        StatusCode::OK,
        Json(json!({ "success": true, "subscriptions": state.scheduler.watchlist_snapshot() })),
    )
        .into_response()
}

async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SymbolsBody>, axum::extract::rejection::JsonRejection>,
) -> impl IntoResponse {
    let Some(tickers) = parse_symbols(&body) else {
        return bad_request("symbols must be an array of strings");
    };

    state.fast_feed.unsubscribe(&tickers);
    state.delayed_feed.unsubscribe(&tickers);
    state.scheduler.remove_from_watchlist(&tickers);

    info!(tickers = ?tickers, "unsubscribed");
    (
        StatusCode::OK,
        Json(json!({ "success": true, "subscriptions": state.scheduler.watchlist_snapshot() })),
    )
        .into_response()
}

fn bad_request(message: &str) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })))
}
