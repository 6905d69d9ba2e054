//! Deterministic offline provider
//!
//! Used in two situations: tenants without telephony configuration, and
//! degraded mode when resolution fails (missing config, unknown vendor,
//! undecryptable credentials). Never touches the network, always succeeds,
//! and hands out predictable identifiers so tests can assert on them.
//! Callers detect degraded mode via `kind() == ProviderKind::Mock`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::base::{
    CallHandle, CallStatus, MessageHandle, NormalizedEvent, ProviderAdapter, ProviderError,
    ProviderErrorKind, SpeechInput, StatusSnapshot, payload_str, validated_pair,
};
use super::ProviderKind;

#[derive(Default)]
pub struct MockProvider {
    counter: AtomicU64,
    /// Calls this instance has initiated, so `get_status`/`end_call`
    /// answer consistently
    calls: Mutex<HashMap<String, CallStatus>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{n:06}")
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    async fn initiate_call(
        &self,
        from: &str,
        to: &str,
        _callback_url: &str,
    ) -> Result<CallHandle, ProviderError> {
        // Validation still applies in degraded mode
        let (from, to) = validated_pair(ProviderKind::Mock, from, to)?;
        let id = self.next_id("mock-call");
        self.calls.lock().insert(id.clone(), CallStatus::InProgress);
        Ok(CallHandle {
            external_id: id,
            provider: ProviderKind::Mock,
            status: CallStatus::Initiated,
            from,
            to,
            initiated_at: Utc::now(),
        })
    }

    async fn end_call(&self, external_id: &str) -> Result<(), ProviderError> {
        self.calls
            .lock()
            .insert(external_id.to_string(), CallStatus::Completed);
        Ok(())
    }

    async fn get_status(&self, external_id: &str) -> Result<StatusSnapshot, ProviderError> {
        let status = self
            .calls
            .lock()
            .get(external_id)
            .cloned()
            .unwrap_or(CallStatus::Completed);
        Ok(StatusSnapshot {
            external_id: external_id.to_string(),
            status,
            duration_secs: Some(0),
            cost: Some(0.0),
        })
    }

    async fn send_message(
        &self,
        from: &str,
        to: &str,
        _body: &str,
    ) -> Result<MessageHandle, ProviderError> {
        validated_pair(ProviderKind::Mock, from, to)?;
        Ok(MessageHandle {
            external_id: self.next_id("mock-msg"),
            provider: ProviderKind::Mock,
            status: "sent".to_string(),
        })
    }

    fn handle_webhook(&self, payload: &serde_json::Value) -> Result<NormalizedEvent, ProviderError> {
        let external_id =
            payload_str(payload, &["externalCallId", "call_id", "CallSid"]).ok_or_else(|| {
                ProviderError::new(
                    ProviderErrorKind::Malformed,
                    ProviderKind::Mock,
                    "webhook missing call identifier",
                )
            })?;
        let raw_status = payload_str(payload, &["status"]).unwrap_or("completed");
        let status = match raw_status {
            "initiated" => CallStatus::Initiated,
            "ringing" => CallStatus::Ringing,
            "in_progress" => CallStatus::InProgress,
            "completed" => CallStatus::Completed,
            "failed" => CallStatus::Failed,
            other => CallStatus::Other(other.to_string()),
        };
        Ok(NormalizedEvent {
            event_id: payload_str(payload, &["eventId", "event_id"]).map(str::to_string),
            external_id: external_id.to_string(),
            status,
            raw_status: raw_status.to_string(),
            from: payload_str(payload, &["from"]).map(str::to_string),
            to: payload_str(payload, &["to"]).map(str::to_string),
            duration_secs: payload["duration"].as_u64().map(|d| d as u32),
            cost: payload["cost"].as_f64(),
            speech: payload_str(payload, &["speech"]).map(|text| SpeechInput {
                text: text.to_string(),
                confidence: 1.0,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deterministic_ids() {
        let mock = MockProvider::new();
        let a = mock
            .initiate_call("+14155550100", "+14155550111", "http://cb")
            .await
            .unwrap();
        let b = mock
            .initiate_call("+14155550100", "+14155550111", "http://cb")
            .await
            .unwrap();
        assert_eq!(a.external_id, "mock-call-000001");
        assert_eq!(b.external_id, "mock-call-000002");
        assert_eq!(a.provider, ProviderKind::Mock);
    }

    #[tokio::test]
    async fn test_still_validates_numbers() {
        let mock = MockProvider::new();
        let err = mock
            .initiate_call("garbage", "+14155550111", "http://cb")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::InvalidNumber);
    }

    #[tokio::test]
    async fn test_call_lifecycle() {
        let mock = MockProvider::new();
        let handle = mock
            .initiate_call("+14155550100", "+14155550111", "http://cb")
            .await
            .unwrap();
        let status = mock.get_status(&handle.external_id).await.unwrap();
        assert_eq!(status.status, CallStatus::InProgress);

        mock.end_call(&handle.external_id).await.unwrap();
        let status = mock.get_status(&handle.external_id).await.unwrap();
        assert_eq!(status.status, CallStatus::Completed);
    }

    #[test]
    fn test_webhook_normalization() {
        let mock = MockProvider::new();
        let event = mock
            .handle_webhook(&serde_json::json!({
                "call_id": "ext-1",
                "status": "in_progress",
                "eventId": "e1",
            }))
            .unwrap();
        assert_eq!(event.external_id, "ext-1");
        assert_eq!(event.status, CallStatus::InProgress);
        assert_eq!(event.event_id.as_deref(), Some("e1"));
    }
}
