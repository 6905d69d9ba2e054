//! WebSocket message dispatch
//!
//! Routes each typed inbound message into the session registry and the
//! conversation pipeline, and fans resulting events out to the call's
//! subscribers. Errors stay local to the connection that caused them;
//! nothing here can take down another subscriber or the hub.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::pipeline::{EventCallback, PipelineEvent, UtteranceInput, sentiment};
use crate::core::session::{CallState, EndReason, OutboundFrame, SharedSession, Speaker};
use crate::state::AppState;

use super::messages::{IncomingMessage, OutgoingMessage, TranscriptPayload};

/// Per-connection hub state: identity, current subscription, writer handle.
pub struct ConnectionState {
    pub conn_id: u64,
    pub subscribed: Option<String>,
    tx: mpsc::Sender<OutboundFrame>,
}

impl ConnectionState {
    pub fn new(conn_id: u64, tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            conn_id,
            subscribed: None,
            tx,
        }
    }

    /// Send a direct (non-broadcast) event to this connection.
    pub async fn send(&self, message: OutgoingMessage) {
        match serde_json::to_string(&message) {
            Ok(json) => {
                let _ = self.tx.send(OutboundFrame::Json(json)).await;
            }
            Err(e) => warn!(conn_id = self.conn_id, "failed to serialize outgoing message: {e}"),
        }
    }

    pub fn sender(&self) -> mpsc::Sender<OutboundFrame> {
        self.tx.clone()
    }
}

/// Serialize once, deliver to every subscriber of the call.
fn broadcast(state: &AppState, call_id: &str, message: &OutgoingMessage) {
    match serde_json::to_string(message) {
        Ok(json) => {
            state.sessions.broadcast(call_id, &json);
        }
        Err(e) => warn!(call_id, "failed to serialize broadcast event: {e}"),
    }
}

/// Process one validated incoming message.
///
/// Returns `true` to keep the connection open. Today no message type closes
/// the connection server-side; the return value keeps the dispatch shape
/// ready for ones that do.
pub async fn handle_incoming(
    msg: IncomingMessage,
    conn: &mut ConnectionState,
    state: &Arc<AppState>,
) -> bool {
    match msg {
        IncomingMessage::JoinCall { call_id, token } => {
            handle_join(call_id, token, conn, state).await
        }
        IncomingMessage::LeaveCall { call_id } => {
            // Stray leaves (never joined, already left) are no-ops, not
            // errors: disconnect races make them routine
            if conn.subscribed.as_deref() == Some(call_id.as_str()) {
                state.sessions.detach(&call_id, conn.conn_id);
                conn.subscribed = None;
            } else {
                debug!(conn_id = conn.conn_id, call_id = %call_id, "ignoring stray leave_call");
            }
            true
        }
        IncomingMessage::TranscriptMessage { call_id, message } => {
            handle_transcript_message(call_id, message, state).await
        }
        IncomingMessage::SentimentUpdate { call_id, sentiment } => {
            let session = state.sessions.get_or_create(&call_id);
            session.set_sentiment(sentiment);
            broadcast(state, &call_id, &OutgoingMessage::SentimentUpdate { call_id: call_id.clone(), sentiment });
            true
        }
        IncomingMessage::VoiceInput {
            call_id,
            audio_data,
            format,
            audio_metrics: _,
        } => {
            let audio = match BASE64.decode(audio_data.as_bytes()) {
                Ok(audio) => Bytes::from(audio),
                Err(e) => {
                    conn.send(OutgoingMessage::Error {
                        message: format!("audio data is not valid base64: {e}"),
                    })
                    .await;
                    return true;
                }
            };
            let session = state.sessions.get_or_create(&call_id);
            session.advance_status(CallState::Active);
            spawn_pipeline(
                state,
                session,
                UtteranceInput {
                    audio: Some(audio),
                    format: format.unwrap_or_else(|| "webm".to_string()),
                    final_transcript: None,
                },
            );
            true
        }
        IncomingMessage::StartVoiceConversation {
            call_id,
            voice_settings: _,
        } => {
            let session = state.sessions.get_or_create(&call_id);
            session.advance_status(CallState::Active);
            conn.send(OutgoingMessage::VoiceInteractionStatus {
                call_id,
                status: "listening".to_string(),
            })
            .await;
            true
        }
        IncomingMessage::VoiceStreamChunk {
            call_id,
            audio_chunk,
            sequence_number,
            timestamp: _,
        } => {
            match BASE64.decode(audio_chunk.as_bytes()) {
                Ok(audio) => {
                    let session = state.sessions.get_or_create(&call_id);
                    session.buffer_chunk(sequence_number, Bytes::from(audio));
                }
                Err(e) => {
                    conn.send(OutgoingMessage::Error {
                        message: format!("audio chunk is not valid base64: {e}"),
                    })
                    .await;
                }
            }
            true
        }
        IncomingMessage::EndVoiceStream {
            call_id,
            final_transcript,
        } => {
            let session = state.sessions.get_or_create(&call_id);
            let audio = session.take_utterance().map(|u| {
                debug!(call_id = %call_id, chunks = u.chunk_count, bytes = u.data.len(), "utterance assembled");
                u.data
            });
            if audio.is_none() && final_transcript.as_deref().is_none_or(|t| t.trim().is_empty()) {
                debug!(call_id = %call_id, "end_voice_stream with no audio and no transcript, ignoring");
                return true;
            }
            spawn_pipeline(
                state,
                session,
                UtteranceInput {
                    audio,
                    format: "webm".to_string(),
                    final_transcript,
                },
            );
            true
        }
        IncomingMessage::VoiceActivityDetected {
            call_id,
            is_active,
            confidence,
            timestamp,
        } => {
            let session = state.sessions.get_or_create(&call_id);
            // Stale signals are dropped outright: a newer reading already
            // went out and flicker is worse than a missed edge
            if session.record_voice_activity(timestamp) {
                broadcast(
                    state,
                    &call_id,
                    &OutgoingMessage::VoiceActivityDetected {
                        call_id: call_id.clone(),
                        is_active,
                        confidence,
                    },
                );
            }
            true
        }
        IncomingMessage::EndCall { call_id } => {
            state.sessions.end(&call_id, EndReason::Completed);
            if conn.subscribed.as_deref() == Some(call_id.as_str()) {
                conn.subscribed = None;
            }
            true
        }
    }
}

async fn handle_join(
    call_id: String,
    token: Option<String>,
    conn: &mut ConnectionState,
    state: &Arc<AppState>,
) -> bool {
    // Token verification is the auth layer's concern; the hub only notes
    // whether one was presented
    debug!(
        conn_id = conn.conn_id,
        call_id = %call_id,
        has_token = token.is_some(),
        "join_call"
    );

    // One subscription per connection: joining a new call leaves the old one
    if let Some(previous) = conn.subscribed.take() {
        if previous != call_id {
            state.sessions.detach(&previous, conn.conn_id);
        }
    }

    let session = state.sessions.get_or_create(&call_id);
    state.sessions.attach(&call_id, conn.conn_id, conn.sender());
    conn.subscribed = Some(call_id.clone());

    conn.send(OutgoingMessage::JoinedCall {
        call_id,
        status: session.status().as_str().to_string(),
        subscriber_count: session.subscriber_count(),
    })
    .await;
    true
}

async fn handle_transcript_message(
    call_id: String,
    message: TranscriptPayload,
    state: &Arc<AppState>,
) -> bool {
    let speaker = match message.speaker.to_lowercase().as_str() {
        "customer" | "user" => Speaker::Customer,
        "ai" | "assistant" => Speaker::Ai,
        "agent" => Speaker::Agent,
        other => {
            warn!(call_id = %call_id, speaker = other, "unknown speaker, defaulting to customer");
            Speaker::Customer
        }
    };

    let session = state.sessions.get_or_create(&call_id);
    let entry_sentiment = match speaker {
        Speaker::Customer => Some(sentiment::analyze_entry(&message.text)),
        _ => None,
    };
    let entry = session.append_transcript(speaker, message.text, message.confidence, entry_sentiment);

    state.persist_entry(&call_id, &entry);
    broadcast(
        state,
        &call_id,
        &OutgoingMessage::TranscriptUpdate { call_id: call_id.clone(), entry },
    );
    true
}

/// Run the conversation pipeline for one utterance off the hub's message
/// loop, mapping pipeline events onto broadcast wire events as they occur.
fn spawn_pipeline(state: &Arc<AppState>, session: SharedSession, input: UtteranceInput) {
    let pipeline = Arc::clone(&state.pipeline);
    let state_for_emit = Arc::clone(state);
    let call_id = session.id().to_string();

    let emit: EventCallback = Arc::new(move |event| {
        let state = Arc::clone(&state_for_emit);
        let call_id = call_id.clone();
        Box::pin(async move {
            let message = map_pipeline_event(&call_id, event);
            broadcast(&state, &call_id, &message);
        })
    });

    tokio::spawn(async move {
        pipeline.process_utterance(&session, input, emit).await;
    });
}

fn map_pipeline_event(call_id: &str, event: PipelineEvent) -> OutgoingMessage {
    let call_id = call_id.to_string();
    match event {
        PipelineEvent::Status { stage } => OutgoingMessage::VoiceInteractionStatus {
            call_id,
            status: stage.to_string(),
        },
        PipelineEvent::InterimTranscript { text, confidence } => {
            OutgoingMessage::VoiceTranscriptInterim {
                call_id,
                text,
                confidence,
            }
        }
        PipelineEvent::FinalTranscript { entry } => {
            OutgoingMessage::VoiceTranscriptUpdate { call_id, entry }
        }
        PipelineEvent::Sentiment { snapshot } => OutgoingMessage::SentimentUpdate {
            call_id,
            sentiment: snapshot,
        },
        PipelineEvent::AiResponse { entry, intent } => OutgoingMessage::AiResponseGenerated {
            call_id,
            entry,
            intent,
        },
        PipelineEvent::AudioChunk {
            chunk_index,
            total_chunks,
            is_last,
            audio,
        } => OutgoingMessage::AiAudioChunk {
            call_id,
            chunk_index,
            total_chunks,
            is_last,
            audio_chunk: audio,
        },
        PipelineEvent::AudioReady { audio, format } => OutgoingMessage::AiAudioResponse {
            call_id,
            audio_data: audio,
            format: format.to_string(),
        },
    }
}
