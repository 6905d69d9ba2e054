//! Concurrent session registry
//!
//! Owns the call-id -> session map, subscriber attachment, broadcast
//! fan-out, and the idle reaper that bounds memory for abandoned sessions.
//! One registry instance is created at server start and injected into the
//! hub, the pipeline, and the webhook boundary - there is no global state.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::call::{CallSession, CallState, SessionSummary};

/// Frame routed to a connection's writer task.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// A serialized JSON event
    Json(String),
    /// Raw binary audio
    Binary(Bytes),
    /// Ask the writer to close the socket
    Close,
}

/// Why a session was ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Completed,
    IdleTimeout,
    ProviderTerminated,
    Shutdown,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Completed => "completed",
            EndReason::IdleTimeout => "idle_timeout",
            EndReason::ProviderTerminated => "provider_terminated",
            EndReason::Shutdown => "shutdown",
        }
    }
}

/// Terminal `call_ended` event, serialized once here so the reaper and the
/// hub produce byte-identical frames.
pub fn terminal_event(call_id: &str, reason: EndReason) -> String {
    json!({
        "type": "call_ended",
        "callId": call_id,
        "reason": reason.as_str(),
    })
    .to_string()
}

/// Registry of live call sessions.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<CallSession>>,
    shutdown: CancellationToken,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Fetch an existing session or atomically create one in the
    /// `Connecting` state. Two concurrent callers racing on an unknown id
    /// observe the same session.
    pub fn get_or_create(&self, call_id: &str) -> Arc<CallSession> {
        self.sessions
            .entry(call_id.to_string())
            .or_insert_with(|| {
                info!(call_id, "creating call session");
                Arc::new(CallSession::new(call_id.to_string()))
            })
            .clone()
    }

    pub fn get(&self, call_id: &str) -> Option<Arc<CallSession>> {
        self.sessions.get(call_id).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Attach a connection to a call's broadcast group.
    pub fn attach(&self, call_id: &str, conn_id: u64, tx: mpsc::Sender<OutboundFrame>) {
        let session = self.get_or_create(call_id);
        session.add_subscriber(conn_id, tx);
        debug!(call_id, conn_id, subscribers = session.subscriber_count(), "subscriber attached");
    }

    /// Detach a connection. Detaching the last subscriber does NOT destroy
    /// the session; destruction is explicit (`end`) or reaper-driven.
    /// Unknown ids are a no-op - disconnect races are not errors.
    pub fn detach(&self, call_id: &str, conn_id: u64) {
        if let Some(session) = self.get(call_id) {
            session.remove_subscriber(conn_id);
            debug!(call_id, conn_id, "subscriber detached");
        }
    }

    /// Deliver a serialized event to every subscriber of one call.
    /// Delivery failures to closed connections are swallowed and the dead
    /// subscriber is pruned. Events for different calls are fully
    /// independent; within one call the fan-out order is the call's event
    /// order.
    pub fn broadcast(&self, call_id: &str, json: &str) -> usize {
        match self.get(call_id) {
            Some(session) => session.fan_out(json),
            None => 0,
        }
    }

    /// End a call: mark it ended, deliver the terminal event, cancel any
    /// in-flight pipeline work, and drop the session from the registry.
    /// Ending an unknown or already-ended call is a no-op.
    pub fn end(&self, call_id: &str, reason: EndReason) {
        let Some((_, session)) = self.sessions.remove(call_id) else {
            debug!(call_id, "end for unknown call ignored");
            return;
        };
        if session.status() != CallState::Ended {
            // Broadcast the terminal event before clearing subscribers
            let delivered = session.fan_out(&terminal_event(call_id, reason));
            info!(call_id, reason = reason.as_str(), delivered, "call ended");
        }
        session.end_locked();
    }

    /// List summaries of all live sessions.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.sessions.iter().map(|s| s.summary()).collect()
    }

    /// Spawn the idle reaper: sessions with no subscribers and no activity
    /// inside `idle_window` are force-ended to bound memory.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        sweep_interval: Duration,
        idle_window: Duration,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = registry.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let stale: Vec<String> = registry
                    .sessions
                    .iter()
                    .filter(|s| s.subscriber_count() == 0 && s.idle_for() >= idle_window)
                    .map(|s| s.id().to_string())
                    .collect();
                for call_id in stale {
                    warn!(call_id = %call_id, "reaping idle session");
                    registry.end(&call_id, EndReason::IdleTimeout);
                }
            }
        })
    }

    /// End every live session and stop the reaper. Called once at server
    /// shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let ids: Vec<String> = self.sessions.iter().map(|s| s.id().to_string()).collect();
        for call_id in ids {
            self.end(&call_id, EndReason::Shutdown);
        }
    }
}
