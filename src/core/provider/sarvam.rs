//! Sarvam AI telephony adapter
//!
//! Bearer-token JSON API against the telephony surface. Sarvam reports
//! call state under `state` and labels webhook deliveries with `id`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use super::base::{
    CallHandle, CallStatus, MessageHandle, NormalizedEvent, ProviderAdapter, ProviderError,
    ProviderErrorKind, ProviderSettings, SpeechInput, StatusSnapshot, payload_str, validated_pair,
};
use super::{ProviderCredentials, ProviderKind};

const DEFAULT_BASE_URL: &str = "https://api.sarvam.ai";

pub struct SarvamProvider {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl SarvamProvider {
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
                    ProviderKind::Sarvam,
                    "API key is required",
                )
            })?;
        let base_url = settings
            .get_str("base_url")
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::from_http(ProviderKind::Sarvam, e))?;
        Ok(Self {
            api_key,
            client,
            base_url,
        })
    }

    fn map_status(raw: &str) -> CallStatus {
        match raw {
            "initiated" | "pending" => CallStatus::Initiated,
            "ringing" => CallStatus::Ringing,
            "active" | "in_call" => CallStatus::InProgress,
            "completed" | "finished" => CallStatus::Completed,
            "failed" | "unreachable" | "declined" => CallStatus::Failed,
            other => {
                warn!(provider = "sarvam", status = other, "unmapped vendor call status");
                CallStatus::Other(other.to_string())
            }
        }
    }

    async fn decode_response(
        response: reqwest::Response,
    ) -> Result<serde_json::Value, ProviderError> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ProviderError::new(
                ProviderErrorKind::Authentication,
                ProviderKind::Sarvam,
                "vendor rejected API key",
            ));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Sarvam, e))?;
        if !status.is_success() {
            let message = body["detail"]
                .as_str()
                .or_else(|| body["message"].as_str())
                .unwrap_or("request rejected");
            return Err(ProviderError::new(
                ProviderErrorKind::VendorRejected,
                ProviderKind::Sarvam,
                message,
            )
            .with_context(format!("http {status}")));
        }
        Ok(body)
    }
}

#[async_trait]
impl ProviderAdapter for SarvamProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sarvam
    }

    async fn initiate_call(
        &self,
        from: &str,
        to: &str,
        callback_url: &str,
    ) -> Result<CallHandle, ProviderError> {
        let (from, to) = validated_pair(ProviderKind::Sarvam, from, to)?;
        let response = self
            .client
            .post(format!("{}/v1/telephony/calls", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "caller": from,
                "callee": to,
                "status_callback": callback_url,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Sarvam, e))?;
        let body = Self::decode_response(response).await?;
        let call_id = body["call_id"].as_str().ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::Malformed,
                ProviderKind::Sarvam,
                "call response missing call_id",
            )
        })?;
        Ok(CallHandle {
            external_id: call_id.to_string(),
            provider: ProviderKind::Sarvam,
            status: Self::map_status(body["state"].as_str().unwrap_or("initiated")),
            from,
            to,
            initiated_at: Utc::now(),
        })
    }

    async fn end_call(&self, external_id: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(format!(
                "{}/v1/telephony/calls/{external_id}/end",
                self.base_url
            ))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Sarvam, e))?;
        Self::decode_response(response).await.map(|_| ())
    }

    async fn get_status(&self, external_id: &str) -> Result<StatusSnapshot, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/telephony/calls/{external_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Sarvam, e))?;
        let body = Self::decode_response(response).await?;
        Ok(StatusSnapshot {
            external_id: external_id.to_string(),
            status: Self::map_status(body["state"].as_str().unwrap_or("")),
            duration_secs: body["duration"].as_u64().map(|d| d as u32),
            cost: body["billed_amount"].as_f64(),
        })
    }

    async fn send_message(
        &self,
        from: &str,
        to: &str,
        body_text: &str,
    ) -> Result<MessageHandle, ProviderError> {
        let (from, to) = validated_pair(ProviderKind::Sarvam, from, to)?;
        let response = self
            .client
            .post(format!("{}/v1/telephony/messages", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "sender": from,
                "recipient": to,
                "body": body_text,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Sarvam, e))?;
        let body = Self::decode_response(response).await?;
        Ok(MessageHandle {
            external_id: body["message_id"].as_str().unwrap_or_default().to_string(),
            provider: ProviderKind::Sarvam,
            status: body["state"].as_str().unwrap_or("queued").to_string(),
        })
    }

    fn handle_webhook(&self, payload: &serde_json::Value) -> Result<NormalizedEvent, ProviderError> {
        let call_id = payload_str(payload, &["call_id", "message_id"]).ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::Malformed,
                ProviderKind::Sarvam,
                "webhook missing call_id/message_id",
            )
        })?;
        let raw_status = payload_str(payload, &["state", "status"]).unwrap_or("");

        let speech = payload
            .get("recognized_speech")
            .and_then(|s| s.as_str())
            .map(|text| SpeechInput {
                text: text.to_string(),
                confidence: payload["speech_confidence"].as_f64().unwrap_or(1.0) as f32,
            });

        Ok(NormalizedEvent {
            event_id: payload_str(payload, &["id"]).map(str::to_string),
            external_id: call_id.to_string(),
            status: Self::map_status(raw_status),
            raw_status: raw_status.to_string(),
            from: payload_str(payload, &["caller"]).map(str::to_string),
            to: payload_str(payload, &["callee"]).map(str::to_string),
            duration_secs: payload["duration"].as_u64().map(|d| d as u32),
            cost: payload["billed_amount"].as_f64(),
            speech,
        })
    }
}
