//! Realtime WebSocket message types
//!
//! Tagged JSON protocol between dashboard/widget clients and the gateway.
//! Field names are camelCase on the wire to match the browser clients.
//! Unknown message types are tolerated: the hub answers with an `error`
//! event and keeps the connection open.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::session::{SentimentSnapshot, TranscriptEntry};

/// Maximum allowed size for a transcript message (16 KB)
pub const MAX_TEXT_SIZE: usize = 16 * 1024;

/// Maximum allowed size for one base64 audio payload (2 MB)
pub const MAX_AUDIO_SIZE: usize = 2 * 1024 * 1024;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// Client-submitted transcript turn.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptPayload {
    pub speaker: String,
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Incoming WebSocket messages from clients.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    /// Subscribe to a call's broadcast group
    #[serde(rename = "join_call", rename_all = "camelCase")]
    JoinCall {
        call_id: String,
        #[serde(default)]
        token: Option<String>,
    },

    /// Unsubscribe from a call
    #[serde(rename = "leave_call", rename_all = "camelCase")]
    LeaveCall { call_id: String },

    /// Append a text turn to the transcript
    #[serde(rename = "transcript_message", rename_all = "camelCase")]
    TranscriptMessage {
        call_id: String,
        message: TranscriptPayload,
    },

    /// Overwrite the call's running sentiment
    #[serde(rename = "sentiment_update", rename_all = "camelCase")]
    SentimentUpdate {
        call_id: String,
        sentiment: SentimentSnapshot,
    },

    /// One complete utterance of audio (base64)
    #[serde(rename = "voice_input", rename_all = "camelCase")]
    VoiceInput {
        call_id: String,
        audio_data: String,
        #[serde(default)]
        format: Option<String>,
        #[serde(default)]
        audio_metrics: Option<Value>,
    },

    /// Begin a streaming voice conversation
    #[serde(rename = "start_voice_conversation", rename_all = "camelCase")]
    StartVoiceConversation {
        call_id: String,
        #[serde(default)]
        voice_settings: Option<Value>,
    },

    /// One chunk of streamed utterance audio (base64)
    #[serde(rename = "voice_stream_chunk", rename_all = "camelCase")]
    VoiceStreamChunk {
        call_id: String,
        audio_chunk: String,
        sequence_number: u64,
        #[serde(default)]
        timestamp: Option<i64>,
    },

    /// Close the current utterance and run the pipeline
    #[serde(rename = "end_voice_stream", rename_all = "camelCase")]
    EndVoiceStream {
        call_id: String,
        #[serde(default)]
        final_transcript: Option<String>,
    },

    /// Low-latency speaking-state signal
    #[serde(rename = "voice_activity_detected", rename_all = "camelCase")]
    VoiceActivityDetected {
        call_id: String,
        is_active: bool,
        #[serde(default)]
        confidence: Option<f32>,
        #[serde(default)]
        timestamp: Option<i64>,
    },

    /// Explicitly end a call (demo calls end this way; live calls usually
    /// end via provider webhook)
    #[serde(rename = "end_call", rename_all = "camelCase")]
    EndCall { call_id: String },
}

impl IncomingMessage {
    pub fn call_id(&self) -> &str {
        match self {
            IncomingMessage::JoinCall { call_id, .. }
            | IncomingMessage::LeaveCall { call_id }
            | IncomingMessage::TranscriptMessage { call_id, .. }
            | IncomingMessage::SentimentUpdate { call_id, .. }
            | IncomingMessage::VoiceInput { call_id, .. }
            | IncomingMessage::StartVoiceConversation { call_id, .. }
            | IncomingMessage::VoiceStreamChunk { call_id, .. }
            | IncomingMessage::EndVoiceStream { call_id, .. }
            | IncomingMessage::VoiceActivityDetected { call_id, .. }
            | IncomingMessage::EndCall { call_id } => call_id,
        }
    }

    /// Validate user-supplied payload sizes and required content before any
    /// session state is touched.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            IncomingMessage::TranscriptMessage { message, .. } => {
                if message.text.trim().is_empty() {
                    return Err("transcript text must not be empty".to_string());
                }
                if message.text.len() > MAX_TEXT_SIZE {
                    return Err(format!(
                        "transcript text too large: {} bytes (max {})",
                        message.text.len(),
                        MAX_TEXT_SIZE
                    ));
                }
                Ok(())
            }
            IncomingMessage::VoiceInput { audio_data, .. } => {
                if audio_data.len() > MAX_AUDIO_SIZE {
                    return Err(format!(
                        "audio payload too large: {} bytes (max {})",
                        audio_data.len(),
                        MAX_AUDIO_SIZE
                    ));
                }
                Ok(())
            }
            IncomingMessage::VoiceStreamChunk { audio_chunk, .. } => {
                if audio_chunk.len() > MAX_AUDIO_SIZE {
                    return Err(format!(
                        "audio chunk too large: {} bytes (max {})",
                        audio_chunk.len(),
                        MAX_AUDIO_SIZE
                    ));
                }
                Ok(())
            }
            IncomingMessage::SentimentUpdate { sentiment, .. } => {
                if !(0.0..=1.0).contains(&sentiment.score) {
                    return Err("sentiment score must be within [0, 1]".to_string());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

/// Outgoing WebSocket events to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    /// Subscription acknowledged
    #[serde(rename = "joined_call", rename_all = "camelCase")]
    JoinedCall {
        call_id: String,
        status: String,
        subscriber_count: usize,
    },

    /// New transcript entry for the call
    #[serde(rename = "transcript_update", rename_all = "camelCase")]
    TranscriptUpdate {
        call_id: String,
        entry: TranscriptEntry,
    },

    /// Running sentiment changed
    #[serde(rename = "sentiment_update", rename_all = "camelCase")]
    SentimentUpdate {
        call_id: String,
        sentiment: SentimentSnapshot,
    },

    /// Recognized speech, not yet committed to the transcript
    #[serde(rename = "voice_transcript_interim", rename_all = "camelCase")]
    VoiceTranscriptInterim {
        call_id: String,
        text: String,
        confidence: f32,
    },

    /// Committed voice transcript entry
    #[serde(rename = "voice_transcript_update", rename_all = "camelCase")]
    VoiceTranscriptUpdate {
        call_id: String,
        entry: TranscriptEntry,
    },

    /// AI response text for the latest utterance
    #[serde(rename = "ai_response_generated", rename_all = "camelCase")]
    AiResponseGenerated {
        call_id: String,
        entry: TranscriptEntry,
        intent: String,
    },

    /// One chunk of synthesized AI audio
    #[serde(rename = "ai_audio_chunk", rename_all = "camelCase")]
    AiAudioChunk {
        call_id: String,
        chunk_index: usize,
        total_chunks: usize,
        is_last: bool,
        audio_chunk: String,
    },

    /// Complete synthesized AI audio in one payload
    #[serde(rename = "ai_audio_response", rename_all = "camelCase")]
    AiAudioResponse {
        call_id: String,
        audio_data: String,
        format: String,
    },

    /// Pipeline stage signal (listening / transcribing / ai_processing /
    /// synthesizing / idle)
    #[serde(rename = "voice_interaction_status", rename_all = "camelCase")]
    VoiceInteractionStatus { call_id: String, status: String },

    /// Speaking-state signal relayed to all subscribers
    #[serde(rename = "voice_activity_detected", rename_all = "camelCase")]
    VoiceActivityDetected {
        call_id: String,
        is_active: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
    },

    /// Something about this connection's last message went wrong
    #[serde(rename = "error")]
    Error { message: String },

    /// Terminal event: the call is over and the session is gone
    #[serde(rename = "call_ended", rename_all = "camelCase")]
    CallEnded { call_id: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{EndReason, terminal_event};

    #[test]
    fn test_join_call_deserialization() {
        let json = r#"{"type": "join_call", "callId": "c1", "token": "jwt"}"#;
        let msg: IncomingMessage = serde_json::from_str(json).expect("Should deserialize");
        match msg {
            IncomingMessage::JoinCall { call_id, token } => {
                assert_eq!(call_id, "c1");
                assert_eq!(token.as_deref(), Some("jwt"));
            }
            _ => panic!("Expected JoinCall variant"),
        }
    }

    #[test]
    fn test_transcript_message_deserialization() {
        let json = r#"{
            "type": "transcript_message",
            "callId": "c1",
            "message": {"speaker": "customer", "text": "Hello", "confidence": 0.97}
        }"#;
        let msg: IncomingMessage = serde_json::from_str(json).expect("Should deserialize");
        match msg {
            IncomingMessage::TranscriptMessage { call_id, message } => {
                assert_eq!(call_id, "c1");
                assert_eq!(message.speaker, "customer");
                assert_eq!(message.text, "Hello");
                assert_eq!(message.confidence, Some(0.97));
            }
            _ => panic!("Expected TranscriptMessage variant"),
        }
    }

    #[test]
    fn test_voice_stream_chunk_deserialization() {
        let json = r#"{
            "type": "voice_stream_chunk",
            "callId": "c1",
            "audioChunk": "AAAA",
            "sequenceNumber": 3,
            "timestamp": 1700000000
        }"#;
        let msg: IncomingMessage = serde_json::from_str(json).expect("Should deserialize");
        match msg {
            IncomingMessage::VoiceStreamChunk {
                sequence_number, ..
            } => assert_eq!(sequence_number, 3),
            _ => panic!("Expected VoiceStreamChunk variant"),
        }
    }

    #[test]
    fn test_unknown_type_fails_typed_parse() {
        let json = r#"{"type": "teleport", "callId": "c1"}"#;
        assert!(serde_json::from_str::<IncomingMessage>(json).is_err());
    }

    #[test]
    fn test_empty_transcript_text_rejected() {
        let msg = IncomingMessage::TranscriptMessage {
            call_id: "c1".to_string(),
            message: TranscriptPayload {
                speaker: "customer".to_string(),
                text: "   ".to_string(),
                timestamp: None,
                confidence: None,
            },
        };
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_oversized_audio_rejected() {
        let msg = IncomingMessage::VoiceInput {
            call_id: "c1".to_string(),
            audio_data: "a".repeat(MAX_AUDIO_SIZE + 1),
            format: None,
            audio_metrics: None,
        };
        let err = msg.validate().unwrap_err();
        assert!(err.contains("too large"));
    }

    #[test]
    fn test_sentiment_score_range_validated() {
        let json = r#"{
            "type": "sentiment_update",
            "callId": "c1",
            "sentiment": {
                "overall": "positive",
                "score": 1.5,
                "emotions": {"joy": 0.5, "anger": 0.0, "fear": 0.0, "sadness": 0.0, "surprise": 0.0}
            }
        }"#;
        let msg: IncomingMessage = serde_json::from_str(json).unwrap();
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_joined_call_serialization() {
        let msg = OutgoingMessage::JoinedCall {
            call_id: "c1".to_string(),
            status: "connecting".to_string(),
            subscriber_count: 2,
        };
        let json = serde_json::to_string(&msg).expect("Should serialize");
        assert!(json.contains(r#""type":"joined_call""#));
        assert!(json.contains(r#""callId":"c1""#));
        assert!(json.contains(r#""subscriberCount":2"#));
    }

    #[test]
    fn test_ai_audio_chunk_serialization() {
        let msg = OutgoingMessage::AiAudioChunk {
            call_id: "c1".to_string(),
            chunk_index: 0,
            total_chunks: 4,
            is_last: false,
            audio_chunk: "QUJD".to_string(),
        };
        let json = serde_json::to_string(&msg).expect("Should serialize");
        assert!(json.contains(r#""chunkIndex":0"#));
        assert!(json.contains(r#""totalChunks":4"#));
        assert!(json.contains(r#""isLast":false"#));
    }

    #[test]
    fn test_call_ended_matches_registry_terminal_event() {
        // The reaper emits the terminal event from core; the hub emits this
        // enum variant. Both must agree on the wire.
        let from_enum = serde_json::to_value(OutgoingMessage::CallEnded {
            call_id: "c1".to_string(),
            reason: "completed".to_string(),
        })
        .unwrap();
        let from_core: serde_json::Value =
            serde_json::from_str(&terminal_event("c1", EndReason::Completed)).unwrap();
        assert_eq!(from_enum, from_core);
    }

    #[test]
    fn test_call_id_accessor_covers_all_variants() {
        let json = r#"{"type": "end_call", "callId": "c7"}"#;
        let msg: IncomingMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.call_id(), "c7");
    }
}
