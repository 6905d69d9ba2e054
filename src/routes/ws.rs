//! WebSocket route configuration
//!
//! `GET /ws` upgrades to the realtime protocol. After the upgrade a client
//! sends `join_call` to subscribe to a call, then receives every
//! `transcript_update` / `sentiment_update` / voice event broadcast for
//! that call until it leaves or the call ends.

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::ws::ws_handler;
use crate::state::AppState;

/// Create the WebSocket router.
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
}
