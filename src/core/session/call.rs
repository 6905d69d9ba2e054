//! Call session state machine
//!
//! Each session serializes its own mutations behind one mutex
//! (single-writer-per-call); sessions never block each other. Lock scopes
//! are short and never held across an await point - collaborator calls
//! resolve first and only then touch session state.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
// tokio's Instant so paused-clock tests can drive the idle reaper
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::registry::OutboundFrame;

/// Lifecycle of a call. Transitions are monotonic:
/// `Connecting -> Active -> Ended`, no reverse edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Connecting,
    Active,
    Ended,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Connecting => "connecting",
            CallState::Active => "active",
            CallState::Ended => "ended",
        }
    }
}

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Customer,
    Ai,
    Agent,
}

/// Sentiment classification attached to a single transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntrySentiment {
    pub label: SentimentLabel,
    pub score: f32,
}

/// One turn in a call transcript.
///
/// Sequence numbers are assigned by the owning session: strictly
/// increasing, gapless, starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub sequence: u64,
    pub id: String,
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<EntrySentiment>,
}

/// Overall sentiment polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

/// Fixed emotion intensities, each in `[0, 1]`. Not required to sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Emotions {
    pub joy: f32,
    pub anger: f32,
    pub fear: f32,
    pub sadness: f32,
    pub surprise: f32,
}

/// Latest sentiment reading for a call. Overwritten on each update,
/// not accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentSnapshot {
    pub overall: SentimentLabel,
    pub score: f32,
    pub emotions: Emotions,
}

impl Default for SentimentSnapshot {
    fn default() -> Self {
        Self {
            overall: SentimentLabel::Neutral,
            score: 0.5,
            emotions: Emotions::default(),
        }
    }
}

/// Audio assembled from an utterance's stream chunks, ordered by
/// sequence number.
#[derive(Debug, Clone)]
pub struct UtteranceAudio {
    pub data: Bytes,
    pub chunk_count: usize,
}

/// Per-utterance chunk buffer. Chunks may arrive out of order; the
/// `BTreeMap` key restores ordering at assembly time.
#[derive(Debug, Default)]
struct UtteranceBuffer {
    chunks: BTreeMap<u64, Bytes>,
}

impl UtteranceBuffer {
    fn push(&mut self, sequence: u64, data: Bytes) {
        // Replays of the same chunk index overwrite rather than duplicate
        self.chunks.insert(sequence, data);
    }

    fn assemble(&mut self) -> Option<UtteranceAudio> {
        if self.chunks.is_empty() {
            return None;
        }
        let chunk_count = self.chunks.len();
        let total: usize = self.chunks.values().map(Bytes::len).sum();
        let mut out = BytesMut::with_capacity(total);
        for (_, chunk) in std::mem::take(&mut self.chunks) {
            out.extend_from_slice(&chunk);
        }
        Some(UtteranceAudio {
            data: out.freeze(),
            chunk_count,
        })
    }
}

/// Mutable session state guarded by the per-session mutex.
struct SessionState {
    status: CallState,
    transcript: Vec<TranscriptEntry>,
    next_sequence: u64,
    current_sentiment: SentimentSnapshot,
    subscribers: HashMap<u64, mpsc::Sender<OutboundFrame>>,
    audio: UtteranceBuffer,
    applied_events: HashSet<String>,
    last_activity: Instant,
    last_voice_activity_ts: Option<i64>,
    utterance_epoch: u64,
}

/// Authoritative in-memory state for one call.
pub struct CallSession {
    id: String,
    created_at: DateTime<Utc>,
    cancel: CancellationToken,
    state: Mutex<SessionState>,
}

impl CallSession {
    pub(super) fn new(id: String) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
            state: Mutex::new(SessionState {
                status: CallState::Connecting,
                transcript: Vec::new(),
                next_sequence: 1,
                current_sentiment: SentimentSnapshot::default(),
                subscribers: HashMap::new(),
                audio: UtteranceBuffer::default(),
                applied_events: HashSet::new(),
                last_activity: Instant::now(),
                last_voice_activity_ts: None,
                utterance_epoch: 0,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Cancellation token shared with any in-flight pipeline work for this
    /// call. Cancelled exactly once, when the session ends.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> CallState {
        self.state.lock().status
    }

    pub fn is_ended(&self) -> bool {
        self.status() == CallState::Ended
    }

    /// Advance the status. Reverse transitions are ignored; returns whether
    /// the state actually changed.
    pub fn advance_status(&self, to: CallState) -> bool {
        let mut state = self.state.lock();
        if to > state.status {
            debug!(call_id = %self.id, from = state.status.as_str(), to = to.as_str(), "call status transition");
            state.status = to;
            state.last_activity = Instant::now();
            true
        } else {
            false
        }
    }

    /// Append a transcript entry, assigning the next sequence number.
    pub fn append_transcript(
        &self,
        speaker: Speaker,
        text: String,
        confidence: Option<f32>,
        sentiment: Option<EntrySentiment>,
    ) -> TranscriptEntry {
        let mut state = self.state.lock();
        let entry = TranscriptEntry {
            sequence: state.next_sequence,
            id: uuid::Uuid::new_v4().to_string(),
            speaker,
            text,
            timestamp: Utc::now(),
            confidence,
            sentiment,
        };
        state.next_sequence += 1;
        state.transcript.push(entry.clone());
        state.last_activity = Instant::now();
        entry
    }

    /// Overwrite the running sentiment (latest wins).
    pub fn set_sentiment(&self, snapshot: SentimentSnapshot) {
        let mut state = self.state.lock();
        state.current_sentiment = snapshot;
        state.last_activity = Instant::now();
    }

    pub fn current_sentiment(&self) -> SentimentSnapshot {
        self.state.lock().current_sentiment
    }

    pub fn transcript_snapshot(&self) -> Vec<TranscriptEntry> {
        self.state.lock().transcript.clone()
    }

    pub fn transcript_len(&self) -> usize {
        self.state.lock().transcript.len()
    }

    /// Last few turns, oldest first, for AI conversation context.
    pub fn recent_turns(&self, max: usize) -> Vec<(Speaker, String)> {
        let state = self.state.lock();
        state
            .transcript
            .iter()
            .rev()
            .take(max)
            .map(|e| (e.speaker, e.text.clone()))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    /// Record a voice-activity signal. Returns `false` when the signal is
    /// stale (an equal-or-newer timestamp was already recorded) and should
    /// be dropped instead of broadcast.
    pub fn record_voice_activity(&self, timestamp: Option<i64>) -> bool {
        let mut state = self.state.lock();
        state.last_activity = Instant::now();
        match (timestamp, state.last_voice_activity_ts) {
            (Some(ts), Some(seen)) if ts <= seen => false,
            (Some(ts), _) => {
                state.last_voice_activity_ts = Some(ts);
                true
            }
            // Untimestamped signals are always treated as fresh
            (None, _) => true,
        }
    }

    /// Buffer one audio chunk of the current utterance.
    pub fn buffer_chunk(&self, sequence: u64, data: Bytes) {
        let mut state = self.state.lock();
        state.audio.push(sequence, data);
        state.last_activity = Instant::now();
    }

    /// Assemble and clear the utterance buffer. Returns `None` when no
    /// chunks were buffered.
    pub fn take_utterance(&self) -> Option<UtteranceAudio> {
        self.state.lock().audio.assemble()
    }

    /// Start a new utterance and return its epoch. Results computed for an
    /// older epoch are discarded on arrival.
    pub fn begin_utterance(&self) -> u64 {
        let mut state = self.state.lock();
        state.utterance_epoch += 1;
        state.utterance_epoch
    }

    pub fn current_epoch(&self) -> u64 {
        self.state.lock().utterance_epoch
    }

    /// Record an externally-supplied event id. Returns `false` when the id
    /// was seen before (webhook replay), in which case the caller must not
    /// re-apply the event.
    pub fn mark_event_applied(&self, event_id: &str) -> bool {
        let mut state = self.state.lock();
        state.last_activity = Instant::now();
        state.applied_events.insert(event_id.to_string())
    }

    pub fn touch(&self) {
        self.state.lock().last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.state.lock().last_activity.elapsed()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    pub(super) fn add_subscriber(&self, conn_id: u64, tx: mpsc::Sender<OutboundFrame>) {
        let mut state = self.state.lock();
        state.subscribers.insert(conn_id, tx);
        state.last_activity = Instant::now();
    }

    pub(super) fn remove_subscriber(&self, conn_id: u64) {
        let mut state = self.state.lock();
        state.subscribers.remove(&conn_id);
        state.last_activity = Instant::now();
    }

    /// Deliver a pre-serialized event to every live subscriber, pruning
    /// connections whose receiving side is gone. Returns the number of
    /// subscribers the frame was handed to.
    pub(super) fn fan_out(&self, json: &str) -> usize {
        let mut state = self.state.lock();
        let mut closed: Vec<u64> = Vec::new();
        let mut delivered = 0usize;
        for (conn_id, tx) in &state.subscribers {
            match tx.try_send(OutboundFrame::Json(json.to_string())) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*conn_id),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Slow consumer: drop this frame for them, keep the
                    // subscription. Delivery is not retried.
                    debug!(call_id = %self.id, conn_id, "subscriber queue full, dropping frame");
                }
            }
        }
        for conn_id in closed {
            debug!(call_id = %self.id, conn_id, "pruning closed subscriber");
            state.subscribers.remove(&conn_id);
        }
        delivered
    }

    pub(super) fn end_locked(&self) {
        let mut state = self.state.lock();
        state.status = CallState::Ended;
        state.subscribers.clear();
        self.cancel.cancel();
    }
}

/// Cheap listing view used by the admin API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub call_id: String,
    pub status: CallState,
    pub subscriber_count: usize,
    pub transcript_len: usize,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn summary(&self) -> SessionSummary {
        let state = self.state.lock();
        SessionSummary {
            call_id: self.id.clone(),
            status: state.status,
            subscriber_count: state.subscribers.len(),
            transcript_len: state.transcript.len(),
            created_at: self.created_at,
        }
    }
}

/// Convenience alias used across the hub and pipeline.
pub type SharedSession = Arc<CallSession>;
