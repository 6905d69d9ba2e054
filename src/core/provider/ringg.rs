//! Ringg AI calling-platform adapter
//!
//! Bearer-token JSON API. Ringg attaches a stable `event_id` to every
//! webhook delivery and ships recognized speech inline, which makes replay
//! suppression straightforward downstream.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use super::base::{
    CallHandle, CallStatus, MessageHandle, NormalizedEvent, ProviderAdapter, ProviderError,
    ProviderErrorKind, ProviderSettings, SpeechInput, StatusSnapshot, payload_str, validated_pair,
};
use super::{ProviderCredentials, ProviderKind};

const DEFAULT_BASE_URL: &str = "https://api.ringg.ai";

pub struct RinggProvider {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    /// Optional agent persona configured per tenant
    agent_id: Option<String>,
}

impl RinggProvider {
    pub fn new(
        credentials: ProviderCredentials,
        settings: ProviderSettings,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = credentials
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ProviderError::new(
                    ProviderErrorKind::Authentication,
                    ProviderKind::Ringg,
                    "API key is required",
                )
            })?;
        let base_url = settings
            .get_str("base_url")
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let agent_id = settings.get_str("agent_id").map(str::to_string);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::from_http(ProviderKind::Ringg, e))?;
        Ok(Self {
            api_key,
            client,
            base_url,
            agent_id,
        })
    }

    fn map_status(raw: &str) -> CallStatus {
        match raw {
            "created" | "queued" => CallStatus::Initiated,
            "ringing" | "dialing" => CallStatus::Ringing,
            "ongoing" | "connected" => CallStatus::InProgress,
            "ended" | "completed" => CallStatus::Completed,
            "failed" | "not_answered" | "rejected" => CallStatus::Failed,
            other => {
                warn!(provider = "ringg", status = other, "unmapped vendor call status");
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
                ProviderKind::Ringg,
                "vendor rejected API key",
            ));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Ringg, e))?;
        if !status.is_success() {
            let message = body["message"].as_str().unwrap_or("request rejected");
            return Err(ProviderError::new(
                ProviderErrorKind::VendorRejected,
                ProviderKind::Ringg,
                message,
            )
            .with_context(format!("http {status}")));
        }
        Ok(body)
    }
}

#[async_trait]
impl ProviderAdapter for RinggProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ringg
    }

    async fn initiate_call(
        &self,
        from: &str,
        to: &str,
        callback_url: &str,
    ) -> Result<CallHandle, ProviderError> {
        let (from, to) = validated_pair(ProviderKind::Ringg, from, to)?;
        let response = self
            .client
            .post(format!("{}/v1/calls", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from_number": from,
                "to_number": to,
                "webhook_url": callback_url,
                "agent_id": self.agent_id,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Ringg, e))?;
        let body = Self::decode_response(response).await?;
        let call_id = body["call_id"].as_str().ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::Malformed,
                ProviderKind::Ringg,
                "call response missing call_id",
            )
        })?;
        Ok(CallHandle {
            external_id: call_id.to_string(),
            provider: ProviderKind::Ringg,
            status: Self::map_status(body["status"].as_str().unwrap_or("created")),
            from,
            to,
            initiated_at: Utc::now(),
        })
    }

    async fn end_call(&self, external_id: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(format!("{}/v1/calls/{external_id}/hangup", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Ringg, e))?;
        Self::decode_response(response).await.map(|_| ())
    }

    async fn get_status(&self, external_id: &str) -> Result<StatusSnapshot, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/calls/{external_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Ringg, e))?;
        let body = Self::decode_response(response).await?;
        Ok(StatusSnapshot {
            external_id: external_id.to_string(),
            status: Self::map_status(body["status"].as_str().unwrap_or("")),
            duration_secs: body["duration_seconds"].as_u64().map(|d| d as u32),
            cost: body["cost"].as_f64(),
        })
    }

    async fn send_message(
        &self,
        from: &str,
        to: &str,
        body_text: &str,
    ) -> Result<MessageHandle, ProviderError> {
        let (from, to) = validated_pair(ProviderKind::Ringg, from, to)?;
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from_number": from,
                "to_number": to,
                "text": body_text,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Ringg, e))?;
        let body = Self::decode_response(response).await?;
        Ok(MessageHandle {
            external_id: body["message_id"].as_str().unwrap_or_default().to_string(),
            provider: ProviderKind::Ringg,
            status: body["status"].as_str().unwrap_or("queued").to_string(),
        })
    }

    fn handle_webhook(&self, payload: &serde_json::Value) -> Result<NormalizedEvent, ProviderError> {
        let call_id = payload_str(payload, &["call_id", "message_id"]).ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::Malformed,
                ProviderKind::Ringg,
                "webhook missing call_id/message_id",
            )
        })?;
        let raw_status = payload_str(payload, &["status", "event"]).unwrap_or("");

        let speech = payload
            .get("transcript")
            .and_then(|t| t.get("text"))
            .and_then(|t| t.as_str())
            .map(|text| SpeechInput {
                text: text.to_string(),
                confidence: payload["transcript"]["confidence"].as_f64().unwrap_or(1.0) as f32,
            });

        Ok(NormalizedEvent {
            event_id: payload_str(payload, &["event_id"]).map(str::to_string),
            external_id: call_id.to_string(),
            status: Self::map_status(raw_status),
            raw_status: raw_status.to_string(),
            from: payload_str(payload, &["from_number", "from"]).map(str::to_string),
            to: payload_str(payload, &["to_number", "to"]).map(str::to_string),
            duration_secs: payload["duration_seconds"].as_u64().map(|d| d as u32),
            cost: payload["cost"].as_f64(),
            speech,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> RinggProvider {
        RinggProvider::new(
            ProviderCredentials {
                account_id: String::new(),
                auth_token: String::new(),
                api_key: Some("rk_test".to_string()),
                phone_number: None,
            },
            ProviderSettings::default(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_requires_api_key() {
        let result = RinggProvider::new(
            ProviderCredentials {
                account_id: String::new(),
                auth_token: String::new(),
                api_key: None,
                phone_number: None,
            },
            ProviderSettings::default(),
            Duration::from_secs(5),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(RinggProvider::map_status("dialing"), CallStatus::Ringing);
        assert_eq!(RinggProvider::map_status("ongoing"), CallStatus::InProgress);
        assert_eq!(RinggProvider::map_status("ended"), CallStatus::Completed);
        assert_eq!(RinggProvider::map_status("not_answered"), CallStatus::Failed);
    }

    #[test]
    fn test_webhook_with_transcript() {
        let payload = serde_json::json!({
            "event_id": "evt_42",
            "call_id": "rc_1",
            "status": "ongoing",
            "transcript": {"text": "hello there", "confidence": 0.88}
        });
        let event = provider().handle_webhook(&payload).unwrap();
        assert_eq!(event.event_id.as_deref(), Some("evt_42"));
        assert_eq!(event.status, CallStatus::InProgress);
        let speech = event.speech.unwrap();
        assert_eq!(speech.text, "hello there");
        assert!((speech.confidence - 0.88).abs() < 1e-6);
    }
}
