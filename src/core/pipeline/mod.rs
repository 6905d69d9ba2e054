//! Per-utterance conversation pipeline
//!
//! Drives one utterance through speech-to-text, AI response generation,
//! and speech synthesis. The three collaborators are external services
//! behind narrow traits; the pipeline's own responsibilities are stage
//! sequencing, fallback behavior, cancellation, and latency accounting.

mod collaborators;
mod engine;
mod metrics;
pub mod sentiment;

pub use collaborators::{
    AiReply, AiResponder, CollaboratorError, ConversationContext, NullTranscriptStore,
    SpeechSynthesizer, SpeechToText, StubResponder, StubSynthesizer, StubTranscriber,
    TranscriptStore, Transcription,
};
pub use engine::{
    ConversationPipeline, EventCallback, FALLBACK_RESPONSE, PipelineConfig, PipelineEvent,
    UtteranceInput,
};
pub use metrics::{LatencyReport, PipelineMetrics, Stage, StageReport, StageSeverity};
