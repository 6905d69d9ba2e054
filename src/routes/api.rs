//! REST route configuration

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;

/// Create the REST API router.
///
/// # Endpoints
///
/// - `GET /api/pipeline/latency` - per-stage latency bottleneck report
/// - `GET /api/sessions` - live call sessions
/// - `GET /api/providers` - provider configs (credentials redacted)
/// - `POST /api/providers` - create/replace a provider config
/// - `POST /api/providers/{id}/primary` - promote a config to primary
/// - `DELETE /api/providers/{id}` - remove a config
/// - `POST /api/calls` - dial through the tenant's primary provider
/// - `DELETE /api/calls/{external_id}` - hang up and end the session
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/pipeline/latency", get(api::pipeline_latency))
        .route("/api/sessions", get(api::list_sessions))
        .route("/api/providers", get(api::list_providers).post(api::create_provider))
        .route("/api/providers/{id}/primary", post(api::set_primary_provider))
        .route("/api/providers/{id}", delete(api::delete_provider))
        .route("/api/calls", post(api::initiate_call))
        .route("/api/calls/{external_id}", delete(api::end_call))
        .layer(TraceLayer::new_for_http())
}
