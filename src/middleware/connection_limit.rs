//! Connection limit middleware for WebSocket connections
//!
//! Enforces a global cap and a per-IP cap on concurrent WebSocket
//! connections before the upgrade happens. Non-upgrade requests pass
//! through untouched. The acquired slot travels to the handler as a
//! [`ClientIp`] extension; the handler releases it when the socket dies.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// Client IP carried to the WebSocket handler so it can release the
/// connection slot on teardown.
#[derive(Clone, Debug)]
pub struct ClientIp(pub IpAddr);

pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    if !is_ws_upgrade {
        return next.run(request).await;
    }

    let client_ip = addr.ip();
    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            request.extensions_mut().insert(ClientIp(client_ip));
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(ip = %client_ip, "rejecting connection: global limit reached");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server at capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(ip = %client_ip, "rejecting connection: per-IP limit reached");
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your IP address.",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ServerConfig;
    use crate::state::{AppState, ConnectionLimitError};
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn test_per_ip_limit() {
        let config = ServerConfig {
            max_websocket_connections: Some(10),
            max_connections_per_ip: 2,
            ..ServerConfig::default()
        };
        let state = AppState::new(config).await;
        let ip: IpAddr = Ipv4Addr::new(10, 0, 0, 1).into();

        assert!(state.try_acquire_connection(ip).is_ok());
        assert!(state.try_acquire_connection(ip).is_ok());
        assert_eq!(
            state.try_acquire_connection(ip),
            Err(ConnectionLimitError::PerIpLimitReached)
        );

        state.release_connection(ip);
        assert!(state.try_acquire_connection(ip).is_ok());
    }

    #[tokio::test]
    async fn test_global_limit() {
        let config = ServerConfig {
            max_websocket_connections: Some(3),
            max_connections_per_ip: 10,
            ..ServerConfig::default()
        };
        let state = AppState::new(config).await;

        for i in 1..=3u8 {
            let ip: IpAddr = Ipv4Addr::new(10, 0, 0, i).into();
            assert!(state.try_acquire_connection(ip).is_ok());
        }
        assert_eq!(state.ws_connection_count(), 3);
        assert_eq!(
            state.try_acquire_connection(Ipv4Addr::new(10, 0, 0, 4).into()),
            Err(ConnectionLimitError::GlobalLimitReached)
        );

        state.release_connection(Ipv4Addr::new(10, 0, 0, 1).into());
        assert!(
            state
                .try_acquire_connection(Ipv4Addr::new(10, 0, 0, 4).into())
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_unlimited_when_unset() {
        let config = ServerConfig {
            max_websocket_connections: None,
            max_connections_per_ip: 1000,
            ..ServerConfig::default()
        };
        let state = AppState::new(config).await;
        for i in 1..=50u8 {
            let ip: IpAddr = Ipv4Addr::new(10, 0, i, 1).into();
            assert!(state.try_acquire_connection(ip).is_ok());
        }
        assert_eq!(state.ws_connection_count(), 50);
    }
}
