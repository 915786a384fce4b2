//! Pipeline configuration loaded from the environment.
//!
//! Thresholds and timeouts change behavior without code edits. Everything is
//! read once at startup.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | FALANTE_SILENCE_GAP_MS | 800 | Trailing silence that ends an utterance. |
//! | FALANTE_MIN_SPEECH_MS | 200 | Shorter segments are dropped as noise. |
//! | FALANTE_MAX_UTTERANCE_SECS | 30 | Auto-commit bound for long utterances. |
//! | FALANTE_VAD_SENSITIVITY | 0.5 | Speech-probability threshold. |
//! | FALANTE_TURN_POLICY | drop | `drop` \| `queue` for mid-turn utterances. |
//! | FALANTE_STT_TIMEOUT_SECS | 30 | Transcription call bound. |
//! | FALANTE_AGENT_TIMEOUT_SECS | 60 | Response generation bound. |
//! | FALANTE_TTS_TIMEOUT_SECS | 60 | Synthesis start / first chunk bound. |
//! | FALANTE_TTS_CHUNK_TIMEOUT_SECS | 10 | Per-chunk bound after the first. |
//! | FALANTE_LANGUAGE | pt-br | Synthesis/transcription locale. |
//! | FALANTE_VOICE | pf_dora | Synthesis voice identifier. |
//! | FALANTE_SPEED | 1.0 | Synthesis playback-rate multiplier. |

use crate::segmenter::SegmenterConfig;
use crate::session::TurnPolicy;
use crate::tts::VoiceOptions;
use std::time::Duration;

/// All orchestrator tunables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub segmenter: SegmenterConfig,
    pub turn_policy: TurnPolicy,
    pub stt_timeout: Duration,
    pub agent_timeout: Duration,
    /// Bound on synthesis start and on the first produced chunk.
    pub tts_timeout: Duration,
    /// Bound on every chunk after the first.
    pub tts_chunk_timeout: Duration,
    pub voice: VoiceOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            segmenter: SegmenterConfig::default(),
            turn_policy: TurnPolicy::Drop,
            stt_timeout: Duration::from_secs(30),
            agent_timeout: Duration::from_secs(60),
            tts_timeout: Duration::from_secs(60),
            tts_chunk_timeout: Duration::from_secs(10),
            voice: VoiceOptions::default(),
        }
    }
}

impl PipelineConfig {
    /// Load tunables from environment. Unset or unparsable values keep the
    /// defaults documented in the table above.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            segmenter: SegmenterConfig {
                silence_gap: env_ms("FALANTE_SILENCE_GAP_MS", defaults.segmenter.silence_gap),
                min_speech: env_ms("FALANTE_MIN_SPEECH_MS", defaults.segmenter.min_speech),
                max_utterance: env_secs(
                    "FALANTE_MAX_UTTERANCE_SECS",
                    defaults.segmenter.max_utterance,
                ),
                sensitivity: env_f32("FALANTE_VAD_SENSITIVITY", defaults.segmenter.sensitivity),
            },
            turn_policy: std::env::var("FALANTE_TURN_POLICY")
                .map(|s| TurnPolicy::parse(&s))
                .unwrap_or(defaults.turn_policy),
            stt_timeout: env_secs("FALANTE_STT_TIMEOUT_SECS", defaults.stt_timeout),
            agent_timeout: env_secs("FALANTE_AGENT_TIMEOUT_SECS", defaults.agent_timeout),
            tts_timeout: env_secs("FALANTE_TTS_TIMEOUT_SECS", defaults.tts_timeout),
            tts_chunk_timeout: env_secs(
                "FALANTE_TTS_CHUNK_TIMEOUT_SECS",
                defaults.tts_chunk_timeout,
            ),
            voice: VoiceOptions {
                language: std::env::var("FALANTE_LANGUAGE")
                    .unwrap_or(defaults.voice.language),
                voice: std::env::var("FALANTE_VOICE").unwrap_or(defaults.voice.voice),
                speed: env_f32("FALANTE_SPEED", defaults.voice.speed),
            },
        }
    }
}

fn env_ms(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<f32>().ok())
        .unwrap_or(default)
}
