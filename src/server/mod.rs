pub mod routes;
pub mod ws;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/state", get(routes::get_state))
        .route("/api/account", get(routes::get_account))
        .route("/api/trades", get(routes::get_trades).post(routes::place_trade))
        .route("/api/trades/summary", get(routes::get_summary))
        .route("/api/quotes", get(routes::get_quotes))
        .route("/api/screens", get(routes::get_screens))
        .route("/api/screens/{id}/availability", get(routes::get_availability))
        .route("/api/orders", get(routes::get_orders).post(routes::create_order))
        .route("/api/orders/{id}/confirm", post(routes::confirm_order))
        .route("/api/orders/{id}/cancel", post(routes::cancel_order))
        .route("/api/counters", get(routes::get_counters))
        .route("/api/storage", get(routes::get_storage))
        .route("/ws", get(ws::ws_handler))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}
