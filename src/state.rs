//! Application state
//!
//! Everything with process lifetime lives here and is injected into
//! handlers via axum state: the session registry, the provider registry,
//! the conversation pipeline, and WebSocket connection accounting. Created
//! once at server start; tests create as many independent instances as
//! they like.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::core::pipeline::{
    AiResponder, ConversationPipeline, NullTranscriptStore, PipelineMetrics, SpeechSynthesizer,
    SpeechToText, StubResponder, StubSynthesizer, StubTranscriber, TranscriptStore,
};
use crate::core::provider::ProviderRegistry;
use crate::core::session::{SessionRegistry, TranscriptEntry};

/// Why a connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

#[derive(Default)]
struct ConnectionCounters {
    total: usize,
    per_ip: HashMap<IpAddr, usize>,
}

pub struct AppState {
    pub config: ServerConfig,
    pub sessions: Arc<SessionRegistry>,
    pub providers: Arc<ProviderRegistry>,
    pub pipeline: Arc<ConversationPipeline>,
    pub metrics: Arc<PipelineMetrics>,
    pub store: Arc<dyn TranscriptStore>,
    conn_id_counter: AtomicU64,
    connections: Mutex<ConnectionCounters>,
}

impl AppState {
    /// Build state with the offline stub collaborators. The gateway is
    /// fully operational in this configuration - degraded, not broken.
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        Self::with_collaborators(
            config,
            Arc::new(StubTranscriber),
            Arc::new(StubResponder),
            Arc::new(StubSynthesizer),
            Arc::new(NullTranscriptStore),
        )
    }

    /// Build state with explicit collaborator implementations.
    pub fn with_collaborators(
        config: ServerConfig,
        stt: Arc<dyn SpeechToText>,
        responder: Arc<dyn AiResponder>,
        tts: Arc<dyn SpeechSynthesizer>,
        store: Arc<dyn TranscriptStore>,
    ) -> Arc<Self> {
        let metrics = Arc::new(PipelineMetrics::new(config.pipeline_latency_budget_ms));
        let pipeline = Arc::new(ConversationPipeline::new(
            stt,
            responder,
            tts,
            Arc::clone(&store),
            Arc::clone(&metrics),
            config.pipeline_config(),
        ));
        let providers = Arc::new(ProviderRegistry::new(
            config.credential_key.clone(),
            config.provider_timeout(),
        ));

        Arc::new(Self {
            config,
            sessions: Arc::new(SessionRegistry::new()),
            providers,
            pipeline,
            metrics,
            store,
            conn_id_counter: AtomicU64::new(1),
            connections: Mutex::new(ConnectionCounters::default()),
        })
    }

    /// Start background work (today: the idle-session reaper). Call once
    /// after construction in the real server; tests usually skip it.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        vec![self.sessions.spawn_reaper(
            self.config.session_sweep_interval(),
            self.config.session_idle_timeout(),
        )]
    }

    /// Explicit shutdown: ends every live session.
    pub fn shutdown(&self) {
        self.sessions.shutdown();
    }

    pub fn next_connection_id(&self) -> u64 {
        self.conn_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Best-effort transcript persistence off the broadcast path.
    pub fn persist_entry(&self, call_id: &str, entry: &TranscriptEntry) {
        let store = Arc::clone(&self.store);
        let call_id = call_id.to_string();
        let entry = entry.clone();
        tokio::spawn(async move {
            store.append(&call_id, &entry).await;
        });
    }

    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let mut counters = self.connections.lock();
        if let Some(max) = self.config.max_websocket_connections {
            if counters.total >= max {
                return Err(ConnectionLimitError::GlobalLimitReached);
            }
        }
        let per_ip = counters.per_ip.get(&ip).copied().unwrap_or(0);
        if per_ip >= self.config.max_connections_per_ip {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        counters.total += 1;
        *counters.per_ip.entry(ip).or_insert(0) += 1;
        Ok(())
    }

    pub fn release_connection(&self, ip: IpAddr) {
        let mut counters = self.connections.lock();
        counters.total = counters.total.saturating_sub(1);
        if let Some(count) = counters.per_ip.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counters.per_ip.remove(&ip);
            }
        }
    }

    pub fn ws_connection_count(&self) -> usize {
        self.connections.lock().total
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> usize {
        self.connections.lock().per_ip.get(ip).copied().unwrap_or(0)
    }
}
