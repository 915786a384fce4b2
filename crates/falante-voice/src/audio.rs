//! Audio data types shared across the pipeline.
//!
//! Frames arrive from the transport, utterances leave the segmenter, and
//! chunks flow back out to the transport. All PCM is f32 in -1.0..1.0.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// One timestamped chunk of inbound audio as delivered by the transport.
/// Immutable once produced.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Sample rate in Hz (e.g. 16000).
    pub sample_rate: u32,
    /// PCM samples, mono.
    pub samples: Vec<f32>,
    /// When the transport handed the frame over.
    pub captured_at: DateTime<Utc>,
}

impl AudioFrame {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            samples,
            captured_at: Utc::now(),
        }
    }

    /// Playback duration derived from the sample count, so downstream timing
    /// never depends on wall-clock arrival jitter.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// A finalized, bounded span of caller audio between detected silences.
/// Consumed exactly once by transcription.
#[derive(Debug, Clone)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
    sample_rate: u32,
    /// Accumulated speech duration (frame-clocked).
    pub speech: Duration,
    /// When the segmenter committed the utterance.
    pub committed_at: DateTime<Utc>,
}

impl Utterance {
    pub(crate) fn from_frames(frames: Vec<AudioFrame>, sample_rate: u32, speech: Duration) -> Self {
        Self {
            frames,
            sample_rate,
            speech,
            committed_at: Utc::now(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.iter().all(|f| f.samples.is_empty())
    }

    /// Concatenated PCM for the whole utterance.
    pub fn samples(&self) -> Vec<f32> {
        let total = self.frames.iter().map(|f| f.samples.len()).sum();
        let mut out = Vec::with_capacity(total);
        for frame in &self.frames {
            out.extend_from_slice(&frame.samples);
        }
        out
    }
}

/// A unit of synthesized outbound audio, tagged with the turn it belongs to.
/// Chunks are forwarded in production order and never interleave across turns.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Turn this chunk belongs to. Assigned by the orchestrator when the
    /// chunk is forwarded; engine backends leave it as 0.
    pub turn_id: u64,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl AudioChunk {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            turn_id: 0,
            sample_rate,
            samples,
        }
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Short audible cue played when a turn fails before any speech could be
/// synthesized, so the caller is never left wondering whether the line died.
/// A 180ms tone with a linear fade-out.
pub fn fallback_cue(turn_id: u64, sample_rate: u32) -> AudioChunk {
    const FREQ_HZ: f64 = 660.0;
    const AMPLITUDE: f64 = 0.2;
    const LENGTH_SECS: f64 = 0.18;

    let n = (sample_rate as f64 * LENGTH_SECS) as usize;
    let mut samples = Vec::with_capacity(n);
    for i in 0..n {
        let t = i as f64 / sample_rate as f64;
        let fade = 1.0 - i as f64 / n as f64;
        samples.push((AMPLITUDE * fade * (2.0 * std::f64::consts::PI * FREQ_HZ * t).sin()) as f32);
    }
    AudioChunk {
        turn_id,
        sample_rate,
        samples,
    }
}
