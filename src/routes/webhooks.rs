//! Provider webhook route configuration
//!
//! No bearer auth here - vendors cannot send it. Twilio deliveries are
//! authenticated by signature inside the handler instead.

use axum::{Router, routing::post};
use std::sync::Arc;

use crate::handlers::webhooks::provider_webhook;
use crate::state::AppState;

/// Create the webhook router: `POST /webhooks/{vendor}/{config_id}`.
pub fn create_webhook_router() -> Router<Arc<AppState>> {
    Router::new().route("/webhooks/{vendor}/{config_id}", post(provider_webhook))
}
