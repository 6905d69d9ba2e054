//! Application error taxonomy
//!
//! HTTP-facing errors for the REST surface. WebSocket-side failures never
//! pass through here - the hub answers those with in-band `error` events
//! and keeps the connection open.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::core::provider::{ProviderError, ProviderErrorKind, RegistryError};

/// Errors surfaced by REST handlers.
#[derive(Debug, Error)]
pub enum AppError {
    /// Input rejected before any external effect
    #[error("validation failed: {0}")]
    Validation(String),

    /// Referenced resource does not exist
    #[error("{0}")]
    NotFound(String),

    /// Caller is not allowed to do this
    #[error("{0}")]
    Forbidden(String),

    /// Vendor-side failure
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Config-store failure
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Server-side misconfiguration
    #[error("{0}")]
    Unavailable(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Provider(err) => {
                let status = match err.kind {
                    ProviderErrorKind::InvalidNumber | ProviderErrorKind::Malformed => {
                        StatusCode::BAD_REQUEST
                    }
                    ProviderErrorKind::SignatureInvalid => StatusCode::FORBIDDEN,
                    ProviderErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, err.to_string())
            }
            AppError::Registry(err) => match err {
                RegistryError::ConfigNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
                RegistryError::UnknownProvider(_) => (StatusCode::BAD_REQUEST, err.to_string()),
            },
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::ProviderKind;

    #[test]
    fn test_validation_maps_to_400() {
        let response = AppError::Validation("bad input".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_provider_timeout_maps_to_504() {
        let err = AppError::Provider(ProviderError::timeout(ProviderKind::Twilio, "slow vendor"));
        assert_eq!(err.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_registry_not_found_maps_to_404() {
        let err = AppError::Registry(RegistryError::ConfigNotFound(7));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
