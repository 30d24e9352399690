use axum::Router;

use crate::chat::history;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (identity is established upstream)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    let history_routes = Router::new().route(
        "/api/consultations/{consultation_id}/messages",
        axum::routing::get(history::get_consultation_messages),
    );

    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(history_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
