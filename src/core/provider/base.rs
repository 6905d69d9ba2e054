//! Base trait and shared types for telephony providers
//!
//! Every vendor variant implements the full [`ProviderAdapter`] capability
//! set; there is no partial contract. Adapters are stateless per call: they
//! hold decrypted credentials and settings, nothing else. Retry policy
//! belongs to callers - an adapter reports one typed failure and stops.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use super::ProviderKind;
use crate::utils::phone::normalize_e164;

/// Default timeout applied to vendor HTTP calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Input rejected before any vendor call was made
    InvalidNumber,
    /// Vendor rejected the credentials
    Authentication,
    /// Vendor did not answer inside the request timeout
    Timeout,
    /// Vendor rejected the request itself
    VendorRejected,
    /// Transport-level failure reaching the vendor
    Network,
    /// Vendor payload could not be parsed or normalized
    Malformed,
    /// Webhook signature did not verify
    SignatureInvalid,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::InvalidNumber => "invalid_number",
            ProviderErrorKind::Authentication => "authentication",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::VendorRejected => "vendor_rejected",
            ProviderErrorKind::Network => "network",
            ProviderErrorKind::Malformed => "malformed",
            ProviderErrorKind::SignatureInvalid => "signature_invalid",
        }
    }
}

/// Typed provider failure. Callers must not retry automatically.
#[derive(Debug, Error)]
#[error("{provider} provider error [{}]: {message}", .kind.as_str())]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub provider: ProviderKind,
    pub message: String,
    /// Extra context (external call id, vendor error code) for diagnostics
    pub context: Option<String>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, provider: ProviderKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn timeout(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, provider, message)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ProviderErrorKind::Timeout
    }

    /// Map a reqwest failure, keeping timeouts distinguishable.
    pub fn from_http(provider: ProviderKind, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(provider, err.to_string())
        } else {
            Self::new(ProviderErrorKind::Network, provider, err.to_string())
        }
    }
}

/// Normalized call status shared by all vendors.
///
/// Vendor statuses outside the shared set pass through in `Other` - they
/// are logged, never silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Failed,
    #[serde(untagged)]
    Other(String),
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in_progress",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::Other(s) => s,
        }
    }
}

/// Handle returned by a successful `initiate_call`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHandle {
    pub external_id: String,
    pub provider: ProviderKind,
    pub status: CallStatus,
    pub from: String,
    pub to: String,
    pub initiated_at: DateTime<Utc>,
}

/// Handle returned by a successful `send_message`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHandle {
    pub external_id: String,
    pub provider: ProviderKind,
    pub status: String,
}

/// Point-in-time status of a vendor call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub external_id: String,
    pub status: CallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Inbound speech recognized by the vendor (gather/transcription results).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechInput {
    pub text: String,
    pub confidence: f32,
}

/// Vendor webhook payload normalized to the shared shape before it enters
/// the session path.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    /// Vendor event id, when the vendor supplies one; used for replay
    /// suppression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Vendor-assigned call or message id
    pub external_id: String,
    pub status: CallStatus,
    /// Unmapped vendor status string, retained verbatim
    pub raw_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech: Option<SpeechInput>,
}

/// Free-form provider settings (voice id, region, webhook options).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings(pub HashMap<String, serde_json::Value>);

impl ProviderSettings {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(|v| v.as_u64())
    }
}

/// Uniform capability set over telephony/messaging vendors.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which vendor this adapter talks to. `ProviderKind::Mock` signals
    /// degraded mode to callers.
    fn kind(&self) -> ProviderKind;

    /// Start an outbound call. `callback_url` receives vendor webhooks.
    async fn initiate_call(
        &self,
        from: &str,
        to: &str,
        callback_url: &str,
    ) -> Result<CallHandle, ProviderError>;

    /// Hang up a live call.
    async fn end_call(&self, external_id: &str) -> Result<(), ProviderError>;

    /// Fetch the vendor's view of a call.
    async fn get_status(&self, external_id: &str) -> Result<StatusSnapshot, ProviderError>;

    /// Send a text message (SMS/WhatsApp depending on channel).
    async fn send_message(
        &self,
        from: &str,
        to: &str,
        body: &str,
    ) -> Result<MessageHandle, ProviderError>;

    /// Normalize a raw vendor webhook payload. Pure: no I/O, no state.
    /// Must be safe to call twice with the same payload - replay
    /// suppression happens downstream, keyed on `event_id`.
    fn handle_webhook(&self, payload: &serde_json::Value) -> Result<NormalizedEvent, ProviderError>;

    /// Verify a webhook's authenticity where the vendor supports it.
    /// Default accepts everything; vendors with signature schemes override.
    fn verify_webhook(
        &self,
        _url: &str,
        _params: &HashMap<String, String>,
        _signature: Option<&str>,
    ) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Validate both legs of a call before any vendor dispatch.
pub fn validated_pair(
    provider: ProviderKind,
    from: &str,
    to: &str,
) -> Result<(String, String), ProviderError> {
    let from = normalize_e164(from).map_err(|e| {
        ProviderError::new(ProviderErrorKind::InvalidNumber, provider, e.to_string())
    })?;
    let to = normalize_e164(to).map_err(|e| {
        ProviderError::new(ProviderErrorKind::InvalidNumber, provider, e.to_string())
    })?;
    Ok((from, to))
}

/// Pull a string field out of a webhook payload, tolerating either
/// camelCase or PascalCase vendor conventions.
pub fn payload_str<'a>(payload: &'a serde_json::Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| payload.get(k).and_then(|v| v.as_str()))
}
