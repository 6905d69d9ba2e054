//! Utterance processing engine
//!
//! One call to [`ConversationPipeline::process_utterance`] drives a single
//! utterance through `transcribing -> ai_processing -> synthesizing` and
//! back to idle, emitting events through the supplied callback as each
//! stage resolves. Session state is only touched between awaits, never
//! across one, so a `leave_call` or `end_call` for the same session is
//! never starved by a slow collaborator.
//!
//! Failure policy: a failed or empty transcription short-circuits quietly;
//! a failed or overdue AI call produces the fallback response (the caller
//! always hears something); a failed synthesis leaves the text response
//! standing. None of these paths return an error to the hub.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::core::session::{SentimentSnapshot, SharedSession, Speaker, TranscriptEntry};

use super::collaborators::{
    AiReply, AiResponder, ConversationContext, SpeechSynthesizer, SpeechToText, TranscriptStore,
    Transcription,
};
use super::metrics::{PipelineMetrics, Stage};
use super::sentiment;

/// Canned response when the AI collaborator fails or times out.
pub const FALLBACK_RESPONSE: &str = "I'm having trouble processing your request right now. \
     Would you like me to connect you with a human agent?";

/// Confidence attached to the fallback response.
const FALLBACK_CONFIDENCE: f32 = 0.3;

/// How many prior turns are given to the AI responder as context.
const CONTEXT_TURNS: usize = 10;

/// Tunables for the pipeline, sourced from server config.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Hard ceiling on the AI collaborator call before falling back
    pub ai_timeout: Duration,
    /// Transcriptions below this confidence are treated as silence
    pub min_transcription_confidence: f32,
    /// Outbound audio chunk size in raw bytes (pre-base64)
    pub audio_chunk_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ai_timeout: Duration::from_secs(10),
            min_transcription_confidence: 0.4,
            audio_chunk_bytes: 32 * 1024,
        }
    }
}

/// Audio and/or client-side transcript for one utterance.
#[derive(Debug, Clone, Default)]
pub struct UtteranceInput {
    pub audio: Option<Bytes>,
    pub format: String,
    /// Transcript produced client-side; trusted over server STT when present
    pub final_transcript: Option<String>,
}

/// Events emitted while an utterance moves through the pipeline.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Stage transition, for `voice_interaction_status` consumers
    Status { stage: &'static str },
    /// Recognized customer speech before it is committed
    InterimTranscript { text: String, confidence: f32 },
    /// Committed customer transcript entry
    FinalTranscript { entry: TranscriptEntry },
    /// Updated running sentiment for the call
    Sentiment { snapshot: SentimentSnapshot },
    /// Committed AI transcript entry
    AiResponse { entry: TranscriptEntry, intent: String },
    /// One chunk of synthesized audio (base64)
    AudioChunk {
        chunk_index: usize,
        total_chunks: usize,
        is_last: bool,
        audio: String,
    },
    /// Complete synthesized audio in one payload (base64)
    AudioReady { audio: String, format: &'static str },
}

/// Async event sink invoked as each stage resolves.
pub type EventCallback =
    Arc<dyn Fn(PipelineEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct ConversationPipeline {
    stt: Arc<dyn SpeechToText>,
    responder: Arc<dyn AiResponder>,
    tts: Arc<dyn SpeechSynthesizer>,
    store: Arc<dyn TranscriptStore>,
    metrics: Arc<PipelineMetrics>,
    config: PipelineConfig,
}

impl ConversationPipeline {
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        responder: Arc<dyn AiResponder>,
        tts: Arc<dyn SpeechSynthesizer>,
        store: Arc<dyn TranscriptStore>,
        metrics: Arc<PipelineMetrics>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            stt,
            responder,
            tts,
            store,
            metrics,
            config,
        }
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run one utterance end to end.
    ///
    /// Returns quietly (discarding any collaborator result) as soon as the
    /// session ends or a newer utterance supersedes this one.
    pub async fn process_utterance(
        &self,
        session: &SharedSession,
        input: UtteranceInput,
        emit: EventCallback,
    ) {
        let epoch = session.begin_utterance();
        let cancel = session.cancel_token();
        let total_started = Instant::now();

        emit(PipelineEvent::Status { stage: "transcribing" }).await;

        // --- transcribing ---
        let stt_started = Instant::now();
        let transcription = self.transcribe(&input).await;
        self.metrics.record(Stage::Transcription, stt_started.elapsed());

        if cancel.is_cancelled() || session.current_epoch() != epoch {
            debug!(call_id = session.id(), "utterance cancelled during transcription, discarding");
            return;
        }

        let Some(transcription) = transcription else {
            // Nothing intelligible was said: back to idle, no transcript
            // entry, no AI turn
            emit(PipelineEvent::Status { stage: "idle" }).await;
            return;
        };

        emit(PipelineEvent::InterimTranscript {
            text: transcription.text.clone(),
            confidence: transcription.confidence,
        })
        .await;

        let snapshot = sentiment::analyze(&transcription.text);
        session.set_sentiment(snapshot);
        emit(PipelineEvent::Sentiment { snapshot }).await;

        let customer_entry = session.append_transcript(
            Speaker::Customer,
            transcription.text.clone(),
            Some(transcription.confidence),
            Some(sentiment::analyze_entry(&transcription.text)),
        );
        self.persist(session.id(), &customer_entry);
        emit(PipelineEvent::FinalTranscript {
            entry: customer_entry,
        })
        .await;

        // --- ai_processing ---
        emit(PipelineEvent::Status { stage: "ai_processing" }).await;
        let context = ConversationContext {
            call_id: session.id().to_string(),
            recent_turns: session.recent_turns(CONTEXT_TURNS),
        };
        let ai_started = Instant::now();
        let reply = self.generate_reply(&transcription.text, &context).await;
        self.metrics.record(Stage::AiResponse, ai_started.elapsed());

        if cancel.is_cancelled() || session.current_epoch() != epoch {
            debug!(call_id = session.id(), "utterance cancelled during AI processing, discarding");
            return;
        }

        let ai_entry = session.append_transcript(
            Speaker::Ai,
            reply.text.clone(),
            Some(reply.confidence),
            reply.sentiment,
        );
        self.persist(session.id(), &ai_entry);
        emit(PipelineEvent::AiResponse {
            entry: ai_entry,
            intent: reply.intent.clone(),
        })
        .await;

        // --- synthesizing ---
        emit(PipelineEvent::Status { stage: "synthesizing" }).await;
        let tts_started = Instant::now();
        let audio = self.tts.synthesize(&reply.text).await;
        self.metrics.record(Stage::Synthesis, tts_started.elapsed());

        if cancel.is_cancelled() || session.current_epoch() != epoch {
            debug!(call_id = session.id(), "utterance cancelled during synthesis, discarding");
            return;
        }

        match audio {
            Ok(audio) if !audio.is_empty() => self.emit_audio(audio, &emit).await,
            Ok(_) => debug!(call_id = session.id(), "synthesizer returned no audio"),
            Err(e) => {
                // Text response already delivered; audio is best-effort
                warn!(call_id = session.id(), error = %e, "synthesis failed, text-only response");
            }
        }

        // Record before the final status event so an observer that saw
        // "idle" also sees this utterance in the report
        self.metrics.record(Stage::Total, total_started.elapsed());
        emit(PipelineEvent::Status { stage: "idle" }).await;
        info!(
            call_id = session.id(),
            intent = %reply.intent,
            elapsed_ms = total_started.elapsed().as_millis() as u64,
            "utterance processed"
        );
    }

    /// Resolve the utterance's text: a client-side transcript wins,
    /// otherwise the STT collaborator runs. Empty or low-confidence
    /// results come back as `None`.
    async fn transcribe(&self, input: &UtteranceInput) -> Option<Transcription> {
        if let Some(text) = &input.final_transcript {
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            return Some(Transcription {
                text: text.to_string(),
                confidence: 1.0,
            });
        }

        let audio = input.audio.clone()?;
        if audio.is_empty() {
            return None;
        }
        match self.stt.transcribe(audio, &input.format).await {
            Ok(result) => {
                let trimmed = result.text.trim();
                if trimmed.is_empty()
                    || result.confidence < self.config.min_transcription_confidence
                {
                    debug!(
                        confidence = result.confidence,
                        "transcription below threshold, treating as silence"
                    );
                    None
                } else {
                    Some(Transcription {
                        text: trimmed.to_string(),
                        confidence: result.confidence,
                    })
                }
            }
            Err(e) => {
                warn!(error = %e, "transcription failed, treating as silence");
                None
            }
        }
    }

    /// AI turn with the timeout/fallback policy applied.
    async fn generate_reply(&self, text: &str, context: &ConversationContext) -> AiReply {
        match timeout(self.config.ai_timeout, self.responder.generate(text, context)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(error = %e, "AI responder failed, using fallback response");
                Self::fallback_reply()
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.ai_timeout.as_millis() as u64,
                    "AI responder timed out, using fallback response"
                );
                Self::fallback_reply()
            }
        }
    }

    fn fallback_reply() -> AiReply {
        AiReply {
            text: FALLBACK_RESPONSE.to_string(),
            confidence: FALLBACK_CONFIDENCE,
            intent: "error".to_string(),
            sentiment: None,
        }
    }

    /// Deliver synthesized audio: chunked when it exceeds one chunk so
    /// playback can start before the last byte, single payload otherwise.
    async fn emit_audio(&self, audio: Bytes, emit: &EventCallback) {
        let chunk_size = self.config.audio_chunk_bytes.max(1);
        if audio.len() <= chunk_size {
            emit(PipelineEvent::AudioReady {
                audio: BASE64.encode(&audio),
                format: "mp3",
            })
            .await;
            return;
        }

        let total_chunks = audio.len().div_ceil(chunk_size);
        for (index, chunk) in audio.chunks(chunk_size).enumerate() {
            emit(PipelineEvent::AudioChunk {
                chunk_index: index,
                total_chunks,
                is_last: index + 1 == total_chunks,
                audio: BASE64.encode(chunk),
            })
            .await;
        }
    }

    fn persist(&self, call_id: &str, entry: &TranscriptEntry) {
        let store = Arc::clone(&self.store);
        let call_id = call_id.to_string();
        let entry = entry.clone();
        // Fire and forget: persistence never blocks broadcast
        tokio::spawn(async move {
            store.append(&call_id, &entry).await;
        });
    }
}
