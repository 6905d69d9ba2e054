//! Collaborator contracts for the conversation pipeline
//!
//! Speech-to-text, AI response generation, speech synthesis, and transcript
//! persistence are external services. The gateway depends on these traits
//! only; the stub implementations below keep the server fully functional
//! with no vendor configured - deterministic, offline, and safe to use in
//! tests.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::core::session::{CallState, EntrySentiment, Speaker, TranscriptEntry};

use super::sentiment;

/// Failure of an external collaborator call.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("collaborator timed out")]
    Timeout,
    #[error("collaborator failed: {0}")]
    Failed(String),
}

/// Speech-to-text result.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    pub confidence: f32,
}

/// AI responder output for one customer turn.
#[derive(Debug, Clone)]
pub struct AiReply {
    pub text: String,
    pub confidence: f32,
    pub intent: String,
    /// Sentiment of the reply itself, when the responder scores it
    pub sentiment: Option<EntrySentiment>,
}

/// Conversation context handed to the AI responder.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    pub call_id: String,
    /// Recent turns, oldest first
    pub recent_turns: Vec<(Speaker, String)>,
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: Bytes, format: &str) -> Result<Transcription, CollaboratorError>;
}

#[async_trait]
pub trait AiResponder: Send + Sync {
    async fn generate(
        &self,
        text: &str,
        context: &ConversationContext,
    ) -> Result<AiReply, CollaboratorError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Bytes, CollaboratorError>;
}

/// Best-effort persistence. Calls are fire-and-forget from the hub's
/// perspective; implementations log failures and never propagate them.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn append(&self, call_id: &str, entry: &TranscriptEntry);
    async fn update_summary(&self, call_id: &str, status: CallState, duration_secs: Option<u32>);
}

// =============================================================================
// Stub implementations
// =============================================================================

/// Offline transcriber. Returns an empty, zero-confidence result, which the
/// pipeline treats as "nothing was said" - real speech recognition in the
/// stub configuration comes from client-side transcripts instead.
#[derive(Debug, Default)]
pub struct StubTranscriber;

#[async_trait]
impl SpeechToText for StubTranscriber {
    async fn transcribe(&self, audio: Bytes, format: &str) -> Result<Transcription, CollaboratorError> {
        debug!(bytes = audio.len(), format, "stub transcriber invoked");
        Ok(Transcription {
            text: String::new(),
            confidence: 0.0,
        })
    }
}

/// Deterministic keyword responder used when no AI vendor is wired up.
/// Intent detection reuses the lexicon analyzer so identical input always
/// produces the identical reply.
#[derive(Debug, Default)]
pub struct StubResponder;

#[async_trait]
impl AiResponder for StubResponder {
    async fn generate(
        &self,
        text: &str,
        _context: &ConversationContext,
    ) -> Result<AiReply, CollaboratorError> {
        let intent = sentiment::detect_intent(text);
        let reply = match intent {
            "greeting" => "Hello! Thanks for calling. How can I help you today?",
            "billing" => {
                "I can help with billing questions. Could you tell me which charge looks wrong?"
            }
            "technical" => {
                "Sorry you're hitting a technical issue. Let's walk through it together - what are you seeing?"
            }
            "cancellation" => {
                "I understand you'd like to cancel. Before I process that, may I ask what prompted the decision?"
            }
            "escalation" => {
                "Of course - let me connect you with a human agent right away."
            }
            _ => "I see. Could you tell me a bit more so I can point you in the right direction?",
        };
        Ok(AiReply {
            text: reply.to_string(),
            confidence: 0.85,
            intent: intent.to_string(),
            sentiment: Some(sentiment::analyze_entry(reply)),
        })
    }
}

/// Offline synthesizer producing a silence placeholder sized to the text,
/// so downstream chunking and playback paths stay exercised.
#[derive(Debug, Default)]
pub struct StubSynthesizer;

/// Bytes of synthetic audio per character of input text.
const BYTES_PER_CHAR: usize = 160;

#[async_trait]
impl SpeechSynthesizer for StubSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Bytes, CollaboratorError> {
        Ok(Bytes::from(vec![0u8; text.len() * BYTES_PER_CHAR]))
    }
}

/// Persistence stub: logs and drops.
#[derive(Debug, Default)]
pub struct NullTranscriptStore;

#[async_trait]
impl TranscriptStore for NullTranscriptStore {
    async fn append(&self, call_id: &str, entry: &TranscriptEntry) {
        debug!(call_id, sequence = entry.sequence, "transcript append (no store configured)");
    }

    async fn update_summary(&self, call_id: &str, status: CallState, duration_secs: Option<u32>) {
        debug!(call_id, status = status.as_str(), ?duration_secs, "summary update (no store configured)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_responder_is_deterministic() {
        let responder = StubResponder;
        let ctx = ConversationContext::default();
        let a = responder.generate("my bill is wrong", &ctx).await.unwrap();
        let b = responder.generate("my bill is wrong", &ctx).await.unwrap();
        assert_eq!(a.text, b.text);
        assert_eq!(a.intent, "billing");
    }

    #[tokio::test]
    async fn test_stub_responder_escalation() {
        let responder = StubResponder;
        let reply = responder
            .generate("let me speak to a human agent", &ConversationContext::default())
            .await
            .unwrap();
        assert_eq!(reply.intent, "escalation");
        assert!(reply.text.contains("human agent"));
    }

    #[tokio::test]
    async fn test_stub_transcriber_returns_empty() {
        let stt = StubTranscriber;
        let result = stt
            .transcribe(Bytes::from_static(b"pcm"), "webm")
            .await
            .unwrap();
        assert!(result.text.is_empty());
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_stub_synthesizer_scales_with_text() {
        let tts = StubSynthesizer;
        let audio = tts.synthesize("hello").await.unwrap();
        assert_eq!(audio.len(), 5 * BYTES_PER_CHAR);
    }
}
