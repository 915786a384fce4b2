//! # falante-voice — turn-based streaming voice pipeline
//!
//! Real-time conversational loop: caller audio in, transcribed text through a
//! response agent, synthesized speech streamed back, one turn per detected
//! pause in the caller's speech.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        Voice Pipeline                          │
//! │  ┌───────────┐   ┌─────────────┐   ┌──────────────────────┐   │
//! │  │ AudioFrame │→ │  Utterance  │→ │    Turn Orchestrator  │   │
//! │  │ (transport)│   │  Segmenter  │   │ STT → Agent → TTS    │   │
//! │  └───────────┘   └─────────────┘   └──────────┬───────────┘   │
//! │                                                ↓               │
//! │                                     ┌──────────────────────┐   │
//! │                                     │ AudioChunk stream    │   │
//! │                                     │ (ordered, per turn)  │   │
//! │                                     └──────────────────────┘   │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The STT, agent, and TTS engines are external collaborators behind the
//! [`SttBackend`], [`AgentBackend`], and [`TtsBackend`] traits. Failures in
//! any one stage are isolated at the orchestrator: the caller hears a short
//! cue or an apology phrase, and the session keeps listening.

pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod segmenter;
pub mod session;
pub mod stt;
pub mod tts;

pub use audio::{fallback_cue, AudioChunk, AudioFrame, Utterance};
pub use config::PipelineConfig;
pub use error::{AgentError, PipelineError, SttError, TtsError};
pub use pipeline::{AgentBackend, SessionHandle, TurnEvent, VoicePipeline};
pub use segmenter::{EnergyVad, SegmenterConfig, UtteranceSegmenter, VoiceDetector};
pub use session::{Session, SessionId, Turn, TurnPolicy, TurnStatus};
pub use stt::{HttpStt, SttBackend};
pub use tts::{AudioStream, HttpTts, TtsBackend, VoiceOptions};
