//! Plivo Voice / Messaging adapter
//!
//! JSON REST calls against the v1 API with basic auth (Auth ID + token).
//! Plivo answers call creation with a `request_uuid` that later webhooks
//! reference as `CallUUID`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use super::base::{
    CallHandle, CallStatus, MessageHandle, NormalizedEvent, ProviderAdapter, ProviderError,
    ProviderErrorKind, ProviderSettings, SpeechInput, StatusSnapshot, payload_str, validated_pair,
};
use super::{ProviderCredentials, ProviderKind};

const DEFAULT_BASE_URL: &str = "https://api.plivo.com";

pub struct PlivoProvider {
    credentials: ProviderCredentials,
    client: reqwest::Client,
    base_url: String,
}

impl PlivoProvider {
    pub fn new(
        credentials: ProviderCredentials,
        settings: ProviderSettings,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        if credentials.account_id.is_empty() || credentials.auth_token.is_empty() {
            return Err(ProviderError::new(
                ProviderErrorKind::Authentication,
                ProviderKind::Plivo,
                "Auth ID and auth token are required",
            ));
        }
        let base_url = settings
            .get_str("base_url")
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::from_http(ProviderKind::Plivo, e))?;
        Ok(Self {
            credentials,
            client,
            base_url,
        })
    }

    fn account_url(&self, resource: &str) -> String {
        format!(
            "{}/v1/Account/{}/{resource}",
            self.base_url, self.credentials.account_id
        )
    }

    fn map_status(raw: &str) -> CallStatus {
        match raw {
            "queued" | "initiated" => CallStatus::Initiated,
            "ringing" => CallStatus::Ringing,
            "in-progress" | "answer" => CallStatus::InProgress,
            "completed" | "hangup" => CallStatus::Completed,
            "busy" | "failed" | "timeout" | "no-answer" | "cancel" => CallStatus::Failed,
            other => {
                warn!(provider = "plivo", status = other, "unmapped vendor call status");
                CallStatus::Other(other.to_string())
            }
        }
    }

    async fn decode_response(
        response: reqwest::Response,
    ) -> Result<serde_json::Value, ProviderError> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::new(
                ProviderErrorKind::Authentication,
                ProviderKind::Plivo,
                "vendor rejected credentials",
            ));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Plivo, e))?;
        if !status.is_success() {
            let message = body["error"].as_str().unwrap_or("request rejected");
            return Err(ProviderError::new(
                ProviderErrorKind::VendorRejected,
                ProviderKind::Plivo,
                message,
            )
            .with_context(format!("http {status}")));
        }
        Ok(body)
    }
}

#[async_trait]
impl ProviderAdapter for PlivoProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Plivo
    }

    async fn initiate_call(
        &self,
        from: &str,
        to: &str,
        callback_url: &str,
    ) -> Result<CallHandle, ProviderError> {
        let (from, to) = validated_pair(ProviderKind::Plivo, from, to)?;
        let response = self
            .client
            .post(self.account_url("Call/"))
            .basic_auth(&self.credentials.account_id, Some(&self.credentials.auth_token))
            .json(&serde_json::json!({
                "from": from,
                "to": to,
                "answer_url": callback_url,
                "answer_method": "POST",
            }))
            .send()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Plivo, e))?;
        let body = Self::decode_response(response).await?;

        let uuid = body["request_uuid"].as_str().ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::Malformed,
                ProviderKind::Plivo,
                "call response missing request_uuid",
            )
        })?;
        Ok(CallHandle {
            external_id: uuid.to_string(),
            provider: ProviderKind::Plivo,
            status: CallStatus::Initiated,
            from,
            to,
            initiated_at: Utc::now(),
        })
    }

    async fn end_call(&self, external_id: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .delete(self.account_url(&format!("Call/{external_id}/")))
            .basic_auth(&self.credentials.account_id, Some(&self.credentials.auth_token))
            .send()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Plivo, e))?;
        // Plivo answers hangup with 204 and an empty body
        if response.status().is_success() {
            Ok(())
        } else {
            Self::decode_response(response).await.map(|_| ())
        }
    }

    async fn get_status(&self, external_id: &str) -> Result<StatusSnapshot, ProviderError> {
        let response = self
            .client
            .get(self.account_url(&format!("Call/{external_id}/")))
            .basic_auth(&self.credentials.account_id, Some(&self.credentials.auth_token))
            .send()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Plivo, e))?;
        let body = Self::decode_response(response).await?;
        Ok(StatusSnapshot {
            external_id: external_id.to_string(),
            status: Self::map_status(body["call_state"].as_str().unwrap_or("")),
            duration_secs: body["call_duration"].as_u64().map(|d| d as u32),
            cost: body["total_rate"].as_str().and_then(|r| r.parse().ok()),
        })
    }

    async fn send_message(
        &self,
        from: &str,
        to: &str,
        body_text: &str,
    ) -> Result<MessageHandle, ProviderError> {
        let (from, to) = validated_pair(ProviderKind::Plivo, from, to)?;
        let response = self
            .client
            .post(self.account_url("Message/"))
            .basic_auth(&self.credentials.account_id, Some(&self.credentials.auth_token))
            .json(&serde_json::json!({
                "src": from,
                "dst": to,
                "text": body_text,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Plivo, e))?;
        let body = Self::decode_response(response).await?;
        let uuid = body["message_uuid"]
            .as_array()
            .and_then(|a| a.first())
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        Ok(MessageHandle {
            external_id: uuid.to_string(),
            provider: ProviderKind::Plivo,
            status: "queued".to_string(),
        })
    }

    fn handle_webhook(&self, payload: &serde_json::Value) -> Result<NormalizedEvent, ProviderError> {
        let uuid = payload_str(payload, &["CallUUID", "MessageUUID"]).ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::Malformed,
                ProviderKind::Plivo,
                "webhook missing CallUUID/MessageUUID",
            )
        })?;
        let raw_status = payload_str(payload, &["CallStatus", "Event", "Status"]).unwrap_or("");
        let event_id = payload_str(payload, &["RequestUUID"])
            .map(|r| format!("{r}:{raw_status}"))
            .unwrap_or_else(|| format!("{uuid}:{raw_status}"));

        let speech = payload_str(payload, &["Speech"]).map(|text| SpeechInput {
            text: text.to_string(),
            confidence: 1.0,
        });

        Ok(NormalizedEvent {
            event_id: Some(event_id),
            external_id: uuid.to_string(),
            status: Self::map_status(raw_status),
            raw_status: raw_status.to_string(),
            from: payload_str(payload, &["From"]).map(str::to_string),
            to: payload_str(payload, &["To"]).map(str::to_string),
            duration_secs: payload_str(payload, &["Duration"]).and_then(|d| d.parse().ok()),
            cost: None,
            speech,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> PlivoProvider {
        PlivoProvider::new(
            ProviderCredentials {
                account_id: "MA_test".to_string(),
                auth_token: "token".to_string(),
                api_key: None,
                phone_number: None,
            },
            ProviderSettings::default(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(PlivoProvider::map_status("ringing"), CallStatus::Ringing);
        assert_eq!(PlivoProvider::map_status("answer"), CallStatus::InProgress);
        assert_eq!(PlivoProvider::map_status("hangup"), CallStatus::Completed);
        assert_eq!(PlivoProvider::map_status("timeout"), CallStatus::Failed);
        assert_eq!(
            PlivoProvider::map_status("machine-detected"),
            CallStatus::Other("machine-detected".to_string())
        );
    }

    #[test]
    fn test_webhook_normalization() {
        let payload = serde_json::json!({
            "CallUUID": "abcd-1234",
            "CallStatus": "completed",
            "From": "+14155550100",
            "To": "+14155550111",
            "Duration": "42",
            "RequestUUID": "req-9"
        });
        let event = provider().handle_webhook(&payload).unwrap();
        assert_eq!(event.external_id, "abcd-1234");
        assert_eq!(event.status, CallStatus::Completed);
        assert_eq!(event.duration_secs, Some(42));
        assert_eq!(event.event_id.as_deref(), Some("req-9:completed"));
    }

    #[test]
    fn test_webhook_replay_produces_identical_event_id() {
        let payload = serde_json::json!({"CallUUID": "u1", "CallStatus": "hangup"});
        let p = provider();
        let first = p.handle_webhook(&payload).unwrap();
        let second = p.handle_webhook(&payload).unwrap();
        assert_eq!(first.event_id, second.event_id);
    }
}
