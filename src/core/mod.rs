//! Core call-orchestration components
//!
//! - `session` - in-memory call sessions and the concurrent session registry
//! - `provider` - telephony provider abstraction (Twilio, Plivo, Ringg,
//!   Sarvam, Mock) with credential decryption and tenant resolution
//! - `pipeline` - per-utterance speech-to-text -> AI -> text-to-speech
//!   orchestration with latency accounting

pub mod pipeline;
pub mod provider;
pub mod session;
