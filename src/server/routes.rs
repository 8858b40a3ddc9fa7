use crate::booking::ledger::available_inventory;
use crate::db;
use crate::errors::{EngineError, EngineResult};
use crate::paper::tracker;
use crate::paper::types::{Account, TradeStatus};
use crate::risk::limits;
use crate::state::{AppState, EngineEvent, EngineSnapshot};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::oneshot;

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::InvalidInput(_) | EngineError::Parse(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) | EngineError::UnknownScreen(_) => StatusCode::NOT_FOUND,
            EngineError::SoldOut { .. } | EngineError::InvalidTransition(_) => StatusCode::CONFLICT,
            EngineError::ChannelClosed(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Send a request to the engine and wait for its reply.
async fn ask<T>(
    state: &AppState,
    make: impl FnOnce(oneshot::Sender<EngineResult<T>>) -> EngineEvent,
) -> EngineResult<T> {
    let (tx, rx) = oneshot::channel();
    state
        .engine_tx
        .send(make(tx))
        .await
        .map_err(|_| EngineError::ChannelClosed("engine unavailable".into()))?;
    rx.await
        .map_err(|_| EngineError::ChannelClosed("engine dropped the request".into()))?
}

/// Accepts JSON numbers and numeric strings (form inputs send strings).
fn as_number(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[derive(serde::Deserialize)]
pub struct TradesQuery {
    pub status: Option<TradeStatus>,
    pub limit: Option<usize>,
}

#[derive(serde::Deserialize)]
pub struct PlaceTradeBody {
    pub symbol: String,
    pub side: String,
    pub stake: serde_json::Value,
    pub duration_seconds: serde_json::Value,
}

#[derive(serde::Deserialize)]
pub struct AvailabilityQuery {
    pub date: String,
}

#[derive(serde::Deserialize)]
pub struct CreateOrderBody {
    pub screen_id: String,
    pub display_date: String,
    pub customer_name: String,
    pub customer_email: String,
    pub ad_title: String,
}

/// GET /api/state -- current engine snapshot (from watch channel, no lock)
pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<EngineSnapshot> {
    let snapshot = state.snapshot_rx.borrow().clone();
    Json(snapshot)
}

/// GET /api/account
pub async fn get_account(State(state): State<Arc<AppState>>) -> Json<Account> {
    Json(state.snapshot_rx.borrow().account.clone())
}

/// GET /api/trades -- newest first, optionally filtered by status
pub async fn get_trades(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TradesQuery>,
) -> Json<serde_json::Value> {
    let limit = params.limit.unwrap_or(50).min(500);
    let snapshot = state.snapshot_rx.borrow();
    let trades: Vec<_> = snapshot
        .trades
        .iter()
        .filter(|t| params.status.map_or(true, |s| t.status == s))
        .take(limit)
        .cloned()
        .collect();
    Json(serde_json::json!({ "trades": trades }))
}

/// POST /api/trades -- validate, then hand to the engine
pub async fn place_trade(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PlaceTradeBody>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let stake = as_number(&body.stake)
        .ok_or_else(|| EngineError::InvalidInput("stake must be a number".into()))?;
    let duration = as_number(&body.duration_seconds)
        .filter(|d| d.fract() == 0.0 && *d >= 0.0 && *d <= u32::MAX as f64)
        .ok_or_else(|| EngineError::InvalidInput("duration_seconds must be a whole number".into()))?;

    let request = limits::check_trade_request(
        &body.symbol,
        &body.side,
        stake,
        duration as u32,
    )
    .into_result()?;

    let trade = ask(&state, |reply| EngineEvent::PlaceTrade { request, reply }).await?;
    Ok(Json(serde_json::json!({ "trade": trade })))
}

/// GET /api/trades/summary
pub async fn get_summary(State(state): State<Arc<AppState>>) -> Json<tracker::TradeSummary> {
    let snapshot = state.snapshot_rx.borrow();
    Json(tracker::compute_summary(&snapshot.trades, &snapshot.account))
}

/// GET /api/quotes -- latest simulated price per symbol
pub async fn get_quotes(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let quotes = state.snapshot_rx.borrow().quotes.clone();
    Json(serde_json::json!({ "quotes": quotes }))
}

/// GET /api/screens
pub async fn get_screens(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let screens = state.snapshot_rx.borrow().screens.clone();
    Json(serde_json::json!({ "screens": screens }))
}

/// GET /api/screens/{id}/availability?date=YYYY-MM-DD
pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    Path(screen_id): Path<String>,
    Query(params): Query<AvailabilityQuery>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let date = NaiveDate::parse_from_str(params.date.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::InvalidInput(format!("date must be YYYY-MM-DD, got {}", params.date)))?;

    let snapshot = state.snapshot_rx.borrow();
    let screen = snapshot
        .screens
        .iter()
        .find(|s| s.id == screen_id)
        .ok_or_else(|| EngineError::UnknownScreen(screen_id.clone()))?;

    let available = available_inventory(screen, &snapshot.orders, date);
    Ok(Json(serde_json::json!({
        "screen_id": screen.id,
        "date": date.to_string(),
        "available": available,
        "capacity": screen.daily_capacity,
    })))
}

/// GET /api/orders
pub async fn get_orders(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let orders = state.snapshot_rx.borrow().orders.clone();
    Json(serde_json::json!({ "orders": orders }))
}

/// POST /api/orders
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateOrderBody>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let request = limits::check_order_request(
        &body.screen_id,
        &body.display_date,
        &body.customer_name,
        &body.customer_email,
        &body.ad_title,
    )
    .into_result()?;

    let order = ask(&state, |reply| EngineEvent::CreateOrder { request, reply }).await?;
    Ok(Json(serde_json::json!({ "order": order })))
}

/// POST /api/orders/{id}/confirm
pub async fn confirm_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let order = ask(&state, |reply| EngineEvent::ConfirmOrder { order_id, reply }).await?;
    Ok(Json(serde_json::json!({ "order": order })))
}

/// POST /api/orders/{id}/cancel
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<serde_json::Value>, EngineError> {
    let order = ask(&state, |reply| EngineEvent::CancelOrder { order_id, reply }).await?;
    Ok(Json(serde_json::json!({ "order": order })))
}

/// GET /api/counters -- performance counters (lock-free reads)
pub async fn get_counters(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    use portable_atomic::Ordering::Relaxed;
    Json(serde_json::json!({
        "ticks_processed": state.counters.ticks_processed.load(Relaxed),
        "quotes_received": state.counters.quotes_received.load(Relaxed),
        "trades_placed": state.counters.trades_placed.load(Relaxed),
        "trades_settled": state.counters.trades_settled.load(Relaxed),
        "orders_created": state.counters.orders_created.load(Relaxed),
        "storage_writes": state.counters.storage_writes.load(Relaxed),
        "storage_errors": state.counters.storage_errors.load(Relaxed),
        "errors_recovered": state.counters.errors_recovered.load(Relaxed),
        "ws_messages_sent": state.counters.ws_messages_sent.load(Relaxed),
    }))
}

/// GET /api/storage -- per-key stored bytes against the quota (cold path)
pub async fn get_storage(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match db::storage_usage(&state.db) {
        Ok(keys) => {
            let used: i64 = keys.iter().map(|k| k.bytes).sum();
            Json(serde_json::json!({
                "quota_bytes": state.config.storage_quota_bytes,
                "used_bytes": used,
                "keys": keys,
            }))
        }
        Err(e) => Json(serde_json::json!({ "error": e.to_string() })),
    }
}

#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use crate::db;
    use crate::state::AppState;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<AppState>) {
        let config = AppConfig {
            rng_seed: Some(9),
            ..AppConfig::default()
        };
        let (engine_tx, engine_rx) = mpsc::channel(512);
        let (db_tx, db_rx) = mpsc::channel(1024);
        let state = AppState::new(config.clone(), db::init_in_memory().unwrap(), engine_tx, db_tx);
        tokio::spawn(db::run_db_writer(state.clone(), db_rx));
        tokio::spawn(crate::run_engine(state.clone(), config, engine_rx));
        (crate::server::router(state.clone()), state)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn order_body(screen_id: &str, date: &str) -> serde_json::Value {
        serde_json::json!({
            "screen_id": screen_id,
            "display_date": date,
            "customer_name": "Dana",
            "customer_email": "dana@example.com",
            "ad_title": "Grand Opening",
        })
    }

    #[tokio::test]
    async fn test_place_trade_and_list() {
        let (app, _state) = app();
        let (status, body) = call(
            &app,
            "POST",
            "/api/trades",
            Some(serde_json::json!({
                "symbol": "eur/usd", "side": "buy", "stake": "100", "duration_seconds": 30
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["trade"]["status"], "pending");
        assert_eq!(body["trade"]["symbol"], "EUR/USD");
        assert_eq!(body["trade"]["remaining_seconds"], 30);

        let (status, list) = call(&app, "GET", "/api/trades?status=pending", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["trades"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_trade_input_rejected_at_boundary() {
        let (app, state) = app();
        for body in [
            serde_json::json!({"symbol": "EUR/USD", "side": "buy", "stake": 5, "duration_seconds": 30}),
            serde_json::json!({"symbol": "EUR/USD", "side": "buy", "stake": "abc", "duration_seconds": 30}),
            serde_json::json!({"symbol": "EUR/USD", "side": "buy", "stake": 100, "duration_seconds": 45}),
            serde_json::json!({"symbol": "EUR/USD", "side": "buy", "stake": 20000, "duration_seconds": 60}),
        ] {
            let (status, resp) = call(&app, "POST", "/api/trades", Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(resp["error"].as_str().unwrap().starts_with("invalid input"));
        }
        assert!(state.snapshot_rx.borrow().trades.is_empty());
    }

    #[tokio::test]
    async fn test_booking_capacity_and_cancellation() {
        let (app, _state) = app();
        let mut ids = Vec::new();
        // scr-005 holds 4 slots per day
        for _ in 0..4 {
            let (status, body) = call(&app, "POST", "/api/orders", Some(order_body("scr-005", "2026-07-01"))).await;
            assert_eq!(status, StatusCode::OK);
            ids.push(body["order"]["id"].as_str().unwrap().to_string());
        }

        let (status, _) = call(&app, "POST", "/api/orders", Some(order_body("scr-005", "2026-07-01"))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let uri = "/api/screens/scr-005/availability?date=2026-07-01";
        let (_, avail) = call(&app, "GET", uri, None).await;
        assert_eq!(avail["available"], 0);

        let (status, body) = call(&app, "POST", &format!("/api/orders/{}/cancel", ids[0]), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["order"]["status"], "cancelled");

        let (_, avail) = call(&app, "GET", uri, None).await;
        assert_eq!(avail["available"], 1);
        assert_eq!(avail["capacity"], 4);

        let (status, _) = call(&app, "POST", &format!("/api/orders/{}/confirm", ids[0]), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_screen_and_order() {
        let (app, _state) = app();
        let (status, _) = call(&app, "GET", "/api/screens/nope/availability?date=2026-07-01", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "POST", "/api/orders/missing/cancel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "POST", "/api/orders", Some(order_body("nope", "2026-07-01"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "GET", "/api/screens/scr-001/availability?date=tomorrow", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
