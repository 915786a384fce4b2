//! Utterance segmentation: turn the continuous inbound frame stream into
//! discrete utterances by detecting pauses in the caller's speech.
//!
//! State machine `Idle → Speaking → Trailing → (commit) → Idle`. All timing
//! is summed from frame durations, never read from the wall clock, so the
//! segmenter is deterministic for a given frame sequence.

use crate::audio::{AudioFrame, Utterance};
use std::time::Duration;
use tracing::debug;

/// Per-frame speech probability. Pluggable so a model-based detector can
/// replace the built-in energy detector without touching the segmenter.
pub trait VoiceDetector: Send {
    /// Probability in 0.0..=1.0 that the frame contains speech.
    fn speech_probability(&mut self, frame: &AudioFrame) -> f32;
}

/// RMS-energy voice detector. `reference` is the RMS level mapped to
/// probability 1.0; quieter audio scales linearly below it.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    pub reference: f32,
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self { reference: 0.05 }
    }
}

impl VoiceDetector for EnergyVad {
    fn speech_probability(&mut self, frame: &AudioFrame) -> f32 {
        if frame.samples.is_empty() || self.reference <= 0.0 {
            return 0.0;
        }
        let energy: f32 = frame.samples.iter().map(|s| s * s).sum();
        let rms = (energy / frame.samples.len() as f32).sqrt();
        (rms / self.reference).min(1.0)
    }
}

/// Configuration for pause detection.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Trailing silence that ends an utterance (default 800ms).
    pub silence_gap: Duration,
    /// Segments shorter than this are dropped as noise (default 200ms).
    pub min_speech: Duration,
    /// Auto-commit bound for very long utterances (default 30s).
    pub max_utterance: Duration,
    /// Speech-probability threshold (default 0.5).
    pub sensitivity: f32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            silence_gap: Duration::from_millis(800),
            min_speech: Duration::from_millis(200),
            max_utterance: Duration::from_secs(30),
            sensitivity: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentState {
    /// No speech seen since the last commit.
    Idle,
    /// Speech in progress; frames are being buffered.
    Speaking,
    /// Speech paused; counting silence toward the gap threshold.
    Trailing,
}

/// Accumulates frames while voice activity is detected and emits one
/// [`Utterance`] per detected pause. A single pause never double-emits.
pub struct UtteranceSegmenter {
    config: SegmenterConfig,
    detector: Box<dyn VoiceDetector>,
    state: SegmentState,
    frames: Vec<AudioFrame>,
    sample_rate: u32,
    speech: Duration,
    trailing: Duration,
}

impl UtteranceSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self::with_detector(config, Box::new(EnergyVad::default()))
    }

    pub fn with_detector(config: SegmenterConfig, detector: Box<dyn VoiceDetector>) -> Self {
        Self {
            config,
            detector,
            state: SegmentState::Idle,
            frames: Vec::new(),
            sample_rate: 0,
            speech: Duration::ZERO,
            trailing: Duration::ZERO,
        }
    }

    /// Feed the next frame in arrival order. Returns a committed utterance
    /// when the trailing silence passes the configured gap.
    pub fn push(&mut self, frame: AudioFrame) -> Option<Utterance> {
        let duration = frame.duration();
        let is_speech =
            self.detector.speech_probability(&frame) > self.config.sensitivity;

        match (self.state, is_speech) {
            (SegmentState::Idle, true) => {
                self.state = SegmentState::Speaking;
                self.sample_rate = frame.sample_rate;
                self.speech = duration;
                self.frames.push(frame);
                None
            }
            (SegmentState::Idle, false) => None,
            (SegmentState::Speaking, true) => {
                self.speech += duration;
                self.frames.push(frame);
                if self.speech >= self.config.max_utterance {
                    debug!(speech_ms = self.speech.as_millis() as u64, "max utterance reached, auto-committing");
                    return self.commit();
                }
                None
            }
            (SegmentState::Speaking, false) => {
                self.state = SegmentState::Trailing;
                self.trailing = duration;
                None
            }
            (SegmentState::Trailing, true) => {
                self.state = SegmentState::Speaking;
                self.trailing = Duration::ZERO;
                self.speech += duration;
                self.frames.push(frame);
                None
            }
            (SegmentState::Trailing, false) => {
                self.trailing += duration;
                if self.trailing >= self.config.silence_gap {
                    return self.commit();
                }
                None
            }
        }
    }

    /// Emit whatever is buffered as a final utterance. Called on stream
    /// termination; bypasses the minimum-speech filter so a degenerate tail
    /// is still surfaced.
    pub fn flush(&mut self) -> Option<Utterance> {
        if self.frames.is_empty() {
            self.reset();
            return None;
        }
        let frames = std::mem::take(&mut self.frames);
        let utterance = Utterance::from_frames(frames, self.sample_rate, self.speech);
        self.reset();
        Some(utterance)
    }

    fn commit(&mut self) -> Option<Utterance> {
        let speech = self.speech;
        if speech < self.config.min_speech {
            debug!(speech_ms = speech.as_millis() as u64, "segment too short, dropping");
            self.frames.clear();
            self.reset();
            return None;
        }
        let frames = std::mem::take(&mut self.frames);
        let sample_rate = self.sample_rate;
        self.reset();
        Some(Utterance::from_frames(frames, sample_rate, speech))
    }

    fn reset(&mut self) {
        self.state = SegmentState::Idle;
        self.speech = Duration::ZERO;
        self.trailing = Duration::ZERO;
    }
}
