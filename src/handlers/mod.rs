//! HTTP and WebSocket request handlers
//!
//! - `api` - health check, latency report, provider-config admin
//! - `webhooks` - inbound vendor webhook normalization
//! - `ws` - the realtime WebSocket hub

pub mod api;
pub mod webhooks;
pub mod ws;

pub use ws::ws_handler;
