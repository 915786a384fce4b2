//! Error types for the voice pipeline.
//!
//! Each engine boundary has its own typed error; the orchestrator converts
//! stage failures into user-audible fallbacks instead of letting them
//! terminate the session.

use crate::session::TurnStatus;
use std::time::Duration;
use thiserror::Error;

/// Failures at the transcription boundary.
#[derive(Debug, Error)]
pub enum SttError {
    #[error("transcription engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("transcription timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid audio: {0}")]
    InvalidAudio(String),
}

/// Failures at the response-agent boundary.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("language model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("response generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("conversation exceeds the model context window: {0}")]
    ContextOverflow(String),
}

/// Failures at the synthesis boundary. A mid-stream failure truncates the
/// chunk sequence at the last successfully produced chunk.
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("synthesis engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("unsupported voice: {0}")]
    UnsupportedVoice(String),

    #[error("synthesis timed out after {0:?}")]
    Timeout(Duration),
}

/// Orchestrator-level failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A turn tried to move backward or skip a stage.
    #[error("invalid turn transition: {from:?} -> {to:?}")]
    InvalidTransition { from: TurnStatus, to: TurnStatus },

    /// An utterance arrived while another turn was still active.
    #[error("session conflict: turn {active} still active")]
    SessionConflict { active: u64 },

    /// The transport stopped consuming outbound audio (caller disconnected).
    #[error("outbound media stream closed")]
    Disconnected,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Stt(#[from] SttError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Tts(#[from] TtsError),
}
