//! In-memory call sessions
//!
//! A [`CallSession`] is the authoritative state for one live or demo call:
//! its transcript, latest sentiment, subscriber connections, and in-flight
//! utterance audio. The [`SessionRegistry`] owns the concurrent map from
//! call id to session and is the single fan-out point for broadcast events.

mod call;
mod registry;

pub use call::{
    CallSession, CallState, Emotions, EntrySentiment, SentimentLabel, SentimentSnapshot,
    SessionSummary, SharedSession, Speaker, TranscriptEntry, UtteranceAudio,
};
pub use registry::{EndReason, OutboundFrame, SessionRegistry, terminal_event};
