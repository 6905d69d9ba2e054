//! Twilio Programmable Voice / Messaging adapter
//!
//! REST calls against the 2010-04-01 API with basic auth (Account SID +
//! auth token). Status callbacks arrive form-encoded and are normalized in
//! [`TwilioProvider::handle_webhook`]; authenticity is checked against the
//! `X-Twilio-Signature` HMAC-SHA1 scheme.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use tracing::warn;

use super::base::{
    CallHandle, CallStatus, MessageHandle, NormalizedEvent, ProviderAdapter, ProviderError,
    ProviderErrorKind, ProviderSettings, SpeechInput, StatusSnapshot, payload_str, validated_pair,
};
use super::{ProviderCredentials, ProviderKind};

const DEFAULT_BASE_URL: &str = "https://api.twilio.com";

pub struct TwilioProvider {
    credentials: ProviderCredentials,
    client: reqwest::Client,
    base_url: String,
}

impl TwilioProvider {
    pub fn new(
        credentials: ProviderCredentials,
        settings: ProviderSettings,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        if credentials.account_id.is_empty() || credentials.auth_token.is_empty() {
            return Err(ProviderError::new(
                ProviderErrorKind::Authentication,
                ProviderKind::Twilio,
                "Account SID and auth token are required",
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
            .map_err(|e| ProviderError::from_http(ProviderKind::Twilio, e))?;
        Ok(Self {
            credentials,
            client,
            base_url,
        })
    }

    fn account_url(&self, resource: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/{resource}",
            self.base_url, self.credentials.account_id
        )
    }

    fn map_status(raw: &str) -> CallStatus {
        match raw {
            "queued" | "initiated" => CallStatus::Initiated,
            "ringing" => CallStatus::Ringing,
            "in-progress" | "answered" => CallStatus::InProgress,
            "completed" => CallStatus::Completed,
            "busy" | "failed" | "no-answer" | "canceled" => CallStatus::Failed,
            other => {
                warn!(provider = "twilio", status = other, "unmapped vendor call status");
                CallStatus::Other(other.to_string())
            }
        }
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<serde_json::Value, ProviderError> {
        let response = self
            .client
            .post(url)
            .basic_auth(&self.credentials.account_id, Some(&self.credentials.auth_token))
            .form(form)
            .send()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Twilio, e))?;
        Self::decode_response(response).await
    }

    async fn decode_response(response: reqwest::Response) -> Result<serde_json::Value, ProviderError> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::new(
                ProviderErrorKind::Authentication,
                ProviderKind::Twilio,
                "vendor rejected credentials",
            ));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Twilio, e))?;
        if !status.is_success() {
            let message = body["message"].as_str().unwrap_or("request rejected");
            return Err(ProviderError::new(
                ProviderErrorKind::VendorRejected,
                ProviderKind::Twilio,
                message,
            )
            .with_context(format!("http {status}")));
        }
        Ok(body)
    }
}

#[async_trait]
impl ProviderAdapter for TwilioProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Twilio
    }

    async fn initiate_call(
        &self,
        from: &str,
        to: &str,
        callback_url: &str,
    ) -> Result<CallHandle, ProviderError> {
        let (from, to) = validated_pair(ProviderKind::Twilio, from, to)?;
        let body = self
            .post_form(
                &self.account_url("Calls.json"),
                &[
                    ("From", from.as_str()),
                    ("To", to.as_str()),
                    ("Url", callback_url),
                    ("StatusCallback", callback_url),
                ],
            )
            .await?;
        let sid = body["sid"].as_str().ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::Malformed,
                ProviderKind::Twilio,
                "call response missing sid",
            )
        })?;
        Ok(CallHandle {
            external_id: sid.to_string(),
            provider: ProviderKind::Twilio,
            status: Self::map_status(body["status"].as_str().unwrap_or("queued")),
            from,
            to,
            initiated_at: Utc::now(),
        })
    }

    async fn end_call(&self, external_id: &str) -> Result<(), ProviderError> {
        self.post_form(
            &self.account_url(&format!("Calls/{external_id}.json")),
            &[("Status", "completed")],
        )
        .await?;
        Ok(())
    }

    async fn get_status(&self, external_id: &str) -> Result<StatusSnapshot, ProviderError> {
        let response = self
            .client
            .get(self.account_url(&format!("Calls/{external_id}.json")))
            .basic_auth(&self.credentials.account_id, Some(&self.credentials.auth_token))
            .send()
            .await
            .map_err(|e| ProviderError::from_http(ProviderKind::Twilio, e))?;
        let body = Self::decode_response(response).await?;
        Ok(StatusSnapshot {
            external_id: external_id.to_string(),
            status: Self::map_status(body["status"].as_str().unwrap_or("")),
            duration_secs: body["duration"]
                .as_str()
                .and_then(|d| d.parse().ok())
                .or_else(|| body["duration"].as_u64().map(|d| d as u32)),
            cost: body["price"].as_str().and_then(|p| p.parse::<f64>().ok().map(f64::abs)),
        })
    }

    async fn send_message(
        &self,
        from: &str,
        to: &str,
        body_text: &str,
    ) -> Result<MessageHandle, ProviderError> {
        let (from, to) = validated_pair(ProviderKind::Twilio, from, to)?;
        let body = self
            .post_form(
                &self.account_url("Messages.json"),
                &[("From", from.as_str()), ("To", to.as_str()), ("Body", body_text)],
            )
            .await?;
        Ok(MessageHandle {
            external_id: body["sid"].as_str().unwrap_or_default().to_string(),
            provider: ProviderKind::Twilio,
            status: body["status"].as_str().unwrap_or("queued").to_string(),
        })
    }

    fn handle_webhook(&self, payload: &serde_json::Value) -> Result<NormalizedEvent, ProviderError> {
        let call_sid = payload_str(payload, &["CallSid", "MessageSid"]).ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::Malformed,
                ProviderKind::Twilio,
                "webhook missing CallSid/MessageSid",
            )
        })?;
        let raw_status = payload_str(payload, &["CallStatus", "MessageStatus"]).unwrap_or("");

        // Status callbacks carry no unique event id; SequenceNumber plus the
        // status string gives a stable replay key.
        let event_id = match payload_str(payload, &["SequenceNumber"]) {
            Some(seq) => format!("{call_sid}:{raw_status}:{seq}"),
            None => format!("{call_sid}:{raw_status}"),
        };

        let speech = payload_str(payload, &["SpeechResult"]).map(|text| SpeechInput {
            text: text.to_string(),
            confidence: payload_str(payload, &["Confidence"])
                .and_then(|c| c.parse().ok())
                .unwrap_or(1.0),
        });

        Ok(NormalizedEvent {
            event_id: Some(event_id),
            external_id: call_sid.to_string(),
            status: Self::map_status(raw_status),
            raw_status: raw_status.to_string(),
            from: payload_str(payload, &["From", "Caller"]).map(str::to_string),
            to: payload_str(payload, &["To", "Called"]).map(str::to_string),
            duration_secs: payload_str(payload, &["CallDuration", "Duration"])
                .and_then(|d| d.parse().ok()),
            cost: None,
            speech,
        })
    }

    fn verify_webhook(
        &self,
        url: &str,
        params: &HashMap<String, String>,
        signature: Option<&str>,
    ) -> Result<(), ProviderError> {
        let Some(signature) = signature else {
            return Err(ProviderError::new(
                ProviderErrorKind::SignatureInvalid,
                ProviderKind::Twilio,
                "missing X-Twilio-Signature header",
            ));
        };

        // HMAC-SHA1 over the URL followed by params sorted by key, each
        // appended as key+value with no separators.
        let mut keys: Vec<&String> = params.keys().collect();
        keys.sort();
        let mut payload = url.to_string();
        for key in keys {
            payload.push_str(key);
            payload.push_str(&params[key]);
        }

        let mut mac = Hmac::<Sha1>::new_from_slice(self.credentials.auth_token.as_bytes())
            .map_err(|_| {
                ProviderError::new(
                    ProviderErrorKind::SignatureInvalid,
                    ProviderKind::Twilio,
                    "auth token unusable as HMAC key",
                )
            })?;
        mac.update(payload.as_bytes());
        let expected = BASE64.encode(mac.finalize().into_bytes());

        if expected.as_bytes().ct_eq(signature.as_bytes()).into() {
            Ok(())
        } else {
            Err(ProviderError::new(
                ProviderErrorKind::SignatureInvalid,
                ProviderKind::Twilio,
                "webhook signature mismatch",
            ))
        }
    }
}
