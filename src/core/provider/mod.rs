//! Telephony provider abstraction
//!
//! One capability contract ([`ProviderAdapter`]) over a closed set of
//! vendors. Dispatch is decided once at resolve time; after that callers
//! hold an `Arc<dyn ProviderAdapter>` and cannot observe which vendor is
//! behind it except through [`ProviderAdapter::kind`].

mod base;
mod credentials;
mod mock;
mod plivo;
mod registry;
mod ringg;
mod sarvam;
mod twilio;

pub use base::{
    CallHandle, CallStatus, DEFAULT_REQUEST_TIMEOUT, MessageHandle, NormalizedEvent,
    ProviderAdapter, ProviderError, ProviderErrorKind, ProviderSettings, SpeechInput,
    StatusSnapshot, payload_str, validated_pair,
};
pub use credentials::{
    CredentialError, ProviderCredentials, decrypt_credentials, encrypt_credentials,
};
pub use mock::MockProvider;
pub use plivo::PlivoProvider;
pub use registry::{ChannelType, ProviderConfig, ProviderRegistry, RegistryError};
pub use ringg::RinggProvider;
pub use sarvam::SarvamProvider;
pub use twilio::TwilioProvider;

use std::sync::Arc;
use std::time::Duration;

/// Supported telephony vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Twilio Programmable Voice / Messaging
    Twilio,
    /// Plivo Voice API
    Plivo,
    /// Ringg AI calling platform
    Ringg,
    /// Sarvam AI telephony
    Sarvam,
    /// Deterministic offline adapter; also the degraded-mode fallback
    Mock,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Twilio => write!(f, "twilio"),
            ProviderKind::Plivo => write!(f, "plivo"),
            ProviderKind::Ringg => write!(f, "ringg"),
            ProviderKind::Sarvam => write!(f, "sarvam"),
            ProviderKind::Mock => write!(f, "mock"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "twilio" => Ok(ProviderKind::Twilio),
            "plivo" => Ok(ProviderKind::Plivo),
            "ringg" | "ringg-ai" | "ringg_ai" => Ok(ProviderKind::Ringg),
            "sarvam" | "sarvam-ai" | "sarvam_ai" => Ok(ProviderKind::Sarvam),
            "mock" => Ok(ProviderKind::Mock),
            _ => Err(ProviderError::new(
                ProviderErrorKind::Malformed,
                ProviderKind::Mock,
                format!(
                    "Unsupported provider: {s}. Supported providers: twilio, plivo, ringg, sarvam, mock"
                ),
            )),
        }
    }
}

/// Construct an adapter for a vendor from decrypted credentials.
///
/// This is the only place the closed vendor set is enumerated; every
/// variant returns the full [`ProviderAdapter`] capability set.
pub fn create_provider(
    kind: ProviderKind,
    credentials: ProviderCredentials,
    settings: ProviderSettings,
    timeout: Duration,
) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    match kind {
        ProviderKind::Twilio => Ok(Arc::new(TwilioProvider::new(credentials, settings, timeout)?)),
        ProviderKind::Plivo => Ok(Arc::new(PlivoProvider::new(credentials, settings, timeout)?)),
        ProviderKind::Ringg => Ok(Arc::new(RinggProvider::new(credentials, settings, timeout)?)),
        ProviderKind::Sarvam => Ok(Arc::new(SarvamProvider::new(credentials, settings, timeout)?)),
        ProviderKind::Mock => Ok(Arc::new(MockProvider::new())),
    }
}

/// Names accepted by the config surface.
pub fn supported_providers() -> Vec<&'static str> {
    vec!["twilio", "plivo", "ringg", "sarvam", "mock"]
}
