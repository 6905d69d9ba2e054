//! Provider webhook boundary
//!
//! One endpoint per `(vendor, config)` pair. Vendor payloads arrive as
//! JSON or form-encoded bodies, are normalized by the matching adapter,
//! and the normalized event is injected into the same session/broadcast
//! path the WebSocket hub uses. The ack body is vendor-shaped: Twilio
//! expects TwiML, everyone else gets JSON.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::core::provider::{NormalizedEvent, ProviderKind};
use crate::core::session::{CallState, EndReason, Speaker};
use crate::errors::AppError;
use crate::handlers::ws::messages::OutgoingMessage;
use crate::state::AppState;

/// `POST /webhooks/{vendor}/{config_id}`
pub async fn provider_webhook(
    State(state): State<Arc<AppState>>,
    Path((vendor, config_id)): Path<(String, u64)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let adapter = state.providers.resolve_config(config_id);
    let kind: ProviderKind = vendor
        .parse()
        .map_err(|_| AppError::NotFound(format!("unknown webhook vendor: {vendor}")))?;
    if adapter.kind() != ProviderKind::Mock && adapter.kind() != kind {
        return Err(AppError::NotFound(format!(
            "config {config_id} does not belong to vendor {vendor}"
        )));
    }

    let params = parse_body(&headers, &body);
    let payload = params_to_value(&params, &body);

    // Authenticity check for vendors that sign their webhooks
    if let Some(form) = params.as_ref() {
        let signature = headers
            .get("x-twilio-signature")
            .and_then(|v| v.to_str().ok());
        let url = state
            .config
            .public_webhook_url(&vendor, config_id)
            .unwrap_or_default();
        if let Err(e) = adapter.verify_webhook(&url, form, signature) {
            // Only enforced where the adapter implements a scheme
            if adapter.kind() == ProviderKind::Twilio && state.config.verify_webhook_signatures {
                warn!(config_id, error = %e, "rejecting unsigned/invalid webhook");
                return Err(AppError::Forbidden("webhook signature invalid".to_string()));
            }
        }
    }

    let event = adapter.handle_webhook(&payload)?;
    debug!(
        vendor = %vendor,
        config_id,
        external_id = %event.external_id,
        status = event.status.as_str(),
        "provider webhook normalized"
    );
    apply_event(&state, &event);

    Ok(ack_for(kind))
}

/// Decode a form-encoded body into a param map; `None` for JSON bodies.
fn parse_body(headers: &HeaderMap, body: &Bytes) -> Option<HashMap<String, String>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if content_type.starts_with("application/x-www-form-urlencoded") {
        Some(
            url::form_urlencoded::parse(body)
                .into_owned()
                .collect(),
        )
    } else {
        None
    }
}

fn params_to_value(params: &Option<HashMap<String, String>>, body: &Bytes) -> Value {
    match params {
        Some(params) => {
            let map: serde_json::Map<String, Value> = params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            Value::Object(map)
        }
        None => serde_json::from_slice(body).unwrap_or(Value::Null),
    }
}

/// Feed a normalized event into the session path: status transitions,
/// recognized speech, terminal handling. Replays (same event id) are
/// acknowledged but change nothing.
fn apply_event(state: &Arc<AppState>, event: &NormalizedEvent) {
    let session = state.sessions.get_or_create(&event.external_id);
    let call_id = session.id().to_string();

    if let Some(event_id) = &event.event_id {
        if !session.mark_event_applied(event_id) {
            info!(call_id = %call_id, event_id = %event_id, "duplicate webhook event, skipping");
            return;
        }
    }

    use crate::core::provider::CallStatus;
    match &event.status {
        CallStatus::Initiated | CallStatus::Ringing => {
            // Still connecting; nothing to broadcast yet
            session.touch();
        }
        CallStatus::InProgress => {
            if session.advance_status(CallState::Active) {
                let msg = OutgoingMessage::VoiceInteractionStatus {
                    call_id: call_id.clone(),
                    status: "listening".to_string(),
                };
                if let Ok(json) = serde_json::to_string(&msg) {
                    state.sessions.broadcast(&call_id, &json);
                }
            }
        }
        CallStatus::Completed | CallStatus::Failed => {
            if let Some(duration) = event.duration_secs {
                let store = Arc::clone(&state.store);
                let call_id = call_id.clone();
                tokio::spawn(async move {
                    store
                        .update_summary(&call_id, CallState::Ended, Some(duration))
                        .await;
                });
            }
            state.sessions.end(&call_id, EndReason::ProviderTerminated);
            return;
        }
        CallStatus::Other(raw) => {
            warn!(call_id = %call_id, status = %raw, "vendor status passed through unmapped");
            session.touch();
        }
    }

    if let Some(speech) = &event.speech {
        if !speech.text.trim().is_empty() {
            let entry = session.append_transcript(
                Speaker::Customer,
                speech.text.clone(),
                Some(speech.confidence),
                Some(crate::core::pipeline::sentiment::analyze_entry(&speech.text)),
            );
            state.persist_entry(&call_id, &entry);
            let msg = OutgoingMessage::TranscriptUpdate {
                call_id: call_id.clone(),
                entry,
            };
            if let Ok(json) = serde_json::to_string(&msg) {
                state.sessions.broadcast(&call_id, &json);
            }
        }
    }
}

/// Vendor-appropriate acknowledgement body.
fn ack_for(kind: ProviderKind) -> Response {
    match kind {
        ProviderKind::Twilio => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/xml")],
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response></Response>",
        )
            .into_response(),
        _ => (StatusCode::OK, axum::Json(json!({"received": true}))).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_twilio_ack_is_twiml() {
        let response = ack_for(ProviderKind::Twilio);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/xml"
        );
    }

    #[test]
    fn test_json_ack_for_other_vendors() {
        for kind in [ProviderKind::Plivo, ProviderKind::Ringg, ProviderKind::Sarvam] {
            let response = ack_for(kind);
            assert_eq!(
                response
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .unwrap()
                    .to_str()
                    .unwrap(),
                "application/json"
            );
        }
    }

    #[test]
    fn test_form_body_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().unwrap(),
        );
        let body = Bytes::from_static(b"CallSid=CA123&CallStatus=completed");
        let params = parse_body(&headers, &body).unwrap();
        assert_eq!(params["CallSid"], "CA123");
        assert_eq!(params["CallStatus"], "completed");

        let value = params_to_value(&Some(params), &body);
        assert_eq!(value["CallSid"], "CA123");
    }

    #[test]
    fn test_json_body_passthrough() {
        let headers = HeaderMap::new();
        let body = Bytes::from_static(br#"{"call_id": "x1", "status": "ended"}"#);
        let params = parse_body(&headers, &body);
        assert!(params.is_none());
        let value = params_to_value(&params, &body);
        assert_eq!(value["call_id"], "x1");
    }
}
