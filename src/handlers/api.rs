//! REST handlers: health, observability, and provider-config admin
//!
//! The provider endpoints are thin wrappers over the registry; the
//! at-most-one-primary invariant is enforced there, not here.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::core::provider::{
    ChannelType, ProviderConfig, ProviderCredentials, ProviderKind, ProviderSettings,
    encrypt_credentials, supported_providers,
};
use crate::core::session::EndReason;
use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// `GET /` - liveness plus a couple of cheap gauges.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "OK",
        "service": "voxassist-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "activeSessions": state.sessions.len(),
        "wsConnections": state.ws_connection_count(),
    }))
}

/// `GET /api/pipeline/latency` - per-stage bottleneck report.
pub async fn pipeline_latency(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(serde_json::to_value(state.metrics.report()).unwrap_or(Value::Null))
}

/// `GET /api/sessions` - live session listing.
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "sessions": state.sessions.summaries() }))
}

/// Redacted config view: the encrypted blob never leaves the server.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfigView {
    pub id: u64,
    pub organization_id: u64,
    pub channel_type: ChannelType,
    pub provider_name: String,
    pub is_active: bool,
    pub is_primary: bool,
}

impl From<ProviderConfig> for ProviderConfigView {
    fn from(config: ProviderConfig) -> Self {
        Self {
            id: config.id,
            organization_id: config.organization_id,
            channel_type: config.channel_type,
            provider_name: config.provider_name,
            is_active: config.is_active,
            is_primary: config.is_primary,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProviderConfig {
    pub organization_id: u64,
    pub channel_type: ChannelType,
    pub provider_name: String,
    /// Plaintext credentials; encrypted before they touch the store
    pub credentials: ProviderCredentials,
    #[serde(default)]
    pub settings: ProviderSettings,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_primary: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListProvidersQuery {
    pub organization_id: Option<u64>,
}

/// `GET /api/providers`
pub async fn list_providers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListProvidersQuery>,
) -> Json<Value> {
    let configs: Vec<ProviderConfigView> = state
        .providers
        .list(query.organization_id)
        .into_iter()
        .map(ProviderConfigView::from)
        .collect();
    Json(json!({ "providers": configs }))
}

/// `POST /api/providers`
pub async fn create_provider(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateProviderConfig>,
) -> AppResult<Json<ProviderConfigView>> {
    if !supported_providers().contains(&request.provider_name.to_lowercase().as_str()) {
        return Err(AppError::Validation(format!(
            "unknown provider '{}'; supported: {}",
            request.provider_name,
            supported_providers().join(", ")
        )));
    }
    let Some(key) = state.config.credential_key.as_deref() else {
        return Err(AppError::Unavailable(
            "credential encryption key not configured".to_string(),
        ));
    };
    let blob = encrypt_credentials(&request.credentials, key)
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let stored = state.providers.upsert(ProviderConfig {
        id: 0,
        organization_id: request.organization_id,
        channel_type: request.channel_type,
        provider_name: request.provider_name.to_lowercase(),
        credentials_blob: blob,
        settings: request.settings,
        is_active: request.is_active,
        is_primary: request.is_primary,
    });
    Ok(Json(stored.into()))
}

/// `POST /api/providers/{id}/primary`
pub async fn set_primary_provider(
    State(state): State<Arc<AppState>>,
    Path(config_id): Path<u64>,
) -> AppResult<Json<ProviderConfigView>> {
    let updated = state.providers.set_primary(config_id)?;
    Ok(Json(updated.into()))
}

/// `DELETE /api/providers/{id}`
pub async fn delete_provider(
    State(state): State<Arc<AppState>>,
    Path(config_id): Path<u64>,
) -> AppResult<Json<Value>> {
    state.providers.delete(config_id)?;
    Ok(Json(json!({ "deleted": config_id })))
}

// =============================================================================
// Call control
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCallRequest {
    pub organization_id: u64,
    #[serde(default)]
    pub channel_type: Option<ChannelType>,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallControlQuery {
    pub organization_id: u64,
    #[serde(default)]
    pub channel_type: Option<ChannelType>,
}

/// `POST /api/calls` - dial through the tenant's primary provider.
///
/// Resolution never fails (degraded tenants dial through Mock); the
/// response carries a `degraded` flag so callers can tell. A session is
/// created up front under the vendor call id, so webhook events and hub
/// subscribers land on the same state from the first ring.
pub async fn initiate_call(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InitiateCallRequest>,
) -> AppResult<Json<Value>> {
    let channel = request.channel_type.unwrap_or(ChannelType::Phone);
    let adapter = state.providers.resolve(request.organization_id, channel);
    let config_id = state
        .providers
        .primary(request.organization_id, channel)
        .map(|c| c.id)
        .unwrap_or(0);
    let callback_url = state
        .config
        .public_webhook_url(&adapter.kind().to_string(), config_id)
        .unwrap_or_else(|| format!("/webhooks/{}/{config_id}", adapter.kind()));

    let handle = adapter
        .initiate_call(&request.from, &request.to, &callback_url)
        .await?;
    state.sessions.get_or_create(&handle.external_id);

    Ok(Json(json!({
        "call": handle,
        "degraded": adapter.kind() == ProviderKind::Mock,
    })))
}

/// `DELETE /api/calls/{external_id}` - hang up and end the session.
pub async fn end_call(
    State(state): State<Arc<AppState>>,
    Path(external_id): Path<String>,
    Query(query): Query<CallControlQuery>,
) -> AppResult<Json<Value>> {
    let channel = query.channel_type.unwrap_or(ChannelType::Phone);
    let adapter = state.providers.resolve(query.organization_id, channel);
    adapter.end_call(&external_id).await?;
    state.sessions.end(&external_id, EndReason::Completed);
    Ok(Json(json!({ "ended": external_id })))
}
