//! Text-to-speech boundary: turn reply text into a lazy stream of audio
//! chunks.
//!
//! The stream is pull-based (bounded channel): the producer suspends when the
//! consumer pauses, so chunks are never pushed faster than the transport can
//! send them. The first chunk is available before the whole reply is
//! synthesized; a mid-stream failure truncates the sequence and surfaces an
//! error marker as the final element.

use crate::audio::AudioChunk;
use crate::error::{PipelineError, TtsError};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

const DEFAULT_API_BASE: &str = "https://api.groq.com/openai/v1";
const DEFAULT_MODEL: &str = "playai-tts";
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// How many chunks may sit between producer and consumer before the producer
/// suspends.
const STREAM_DEPTH: usize = 4;

/// Synthesis voice selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceOptions {
    /// Locale tag, e.g. `pt-br`.
    pub language: String,
    /// Voice identifier, e.g. `pf_dora`.
    pub voice: String,
    /// Playback-rate multiplier.
    pub speed: f32,
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self {
            language: "pt-br".to_string(),
            voice: "pf_dora".to_string(),
            speed: 1.0,
        }
    }
}

/// A finite, non-restartable lazy sequence of synthesized chunks.
pub struct AudioStream {
    rx: mpsc::Receiver<Result<AudioChunk, TtsError>>,
}

impl AudioStream {
    /// Producer side plus the stream handed to the consumer.
    pub fn channel() -> (mpsc::Sender<Result<AudioChunk, TtsError>>, AudioStream) {
        let (tx, rx) = mpsc::channel(STREAM_DEPTH);
        (tx, AudioStream { rx })
    }

    /// A pre-materialized stream, mainly for fixed phrases and tests.
    pub fn from_chunks(chunks: Vec<AudioChunk>) -> AudioStream {
        let (tx, stream) = Self::channel();
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
        });
        stream
    }

    /// Pull the next chunk. `None` means the sequence is exhausted;
    /// `Some(Err(_))` is the mid-stream error marker and is always last.
    pub async fn next_chunk(&mut self) -> Option<Result<AudioChunk, TtsError>> {
        self.rx.recv().await
    }

    /// Adapt to a `futures::Stream` for transports that want one.
    pub fn into_stream(self) -> ReceiverStream<Result<AudioChunk, TtsError>> {
        ReceiverStream::new(self.rx)
    }
}

/// Synthesis engine boundary.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Start synthesizing `text`. Returns the lazy chunk sequence; chunk
    /// production continues in the background as the stream is pulled.
    async fn synthesize(
        &self,
        text: &str,
        options: &VoiceOptions,
    ) -> Result<AudioStream, TtsError>;
}

/// Production TTS backend: OpenAI-compatible `/audio/speech` API requesting
/// WAV output, re-chunked into ~200ms [`AudioChunk`]s as the response body
/// streams in.
#[derive(Debug, Clone)]
pub struct HttpTts {
    /// Base URL without trailing slash.
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// Model, e.g. `playai-tts`.
    pub model: String,
    client: reqwest::Client,
}

impl HttpTts {
    /// Build from environment: `TTS_API_URL`, `TTS_API_KEY` (or
    /// `GROQ_API_KEY`), `TTS_MODEL`. A missing key is a startup error.
    pub fn from_env() -> Result<Self, PipelineError> {
        let base_url =
            std::env::var("TTS_API_URL").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let api_key = std::env::var("TTS_API_KEY")
            .or_else(|_| std::env::var("GROQ_API_KEY"))
            .map_err(|_| {
                PipelineError::Config("TTS requires TTS_API_KEY or GROQ_API_KEY".to_string())
            })?;
        let model = std::env::var("TTS_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(base_url, api_key, model)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }
}

#[async_trait]
impl TtsBackend for HttpTts {
    async fn synthesize(
        &self,
        text: &str,
        options: &VoiceOptions,
    ) -> Result<AudioStream, TtsError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(AudioStream::from_chunks(Vec::new()));
        }
        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": options.voice,
            "speed": options.speed,
            "response_format": "wav",
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TtsError::Timeout(HTTP_TIMEOUT)
                } else {
                    TtsError::EngineUnavailable(e.to_string())
                }
            })?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return if status.as_u16() == 400 && body.contains("voice") {
                Err(TtsError::UnsupportedVoice(format!(
                    "{}: {body}",
                    options.voice
                )))
            } else {
                Err(TtsError::EngineUnavailable(format!("{status}: {body}")))
            };
        }

        let (tx, stream) = AudioStream::channel();
        let mut bytes = res.bytes_stream();
        tokio::spawn(async move {
            let mut decoder = WavStreamDecoder::new();
            while let Some(item) = bytes.next().await {
                let data = match item {
                    Ok(d) => d,
                    Err(e) => {
                        let marker = if e.is_timeout() {
                            TtsError::Timeout(HTTP_TIMEOUT)
                        } else {
                            TtsError::EngineUnavailable(e.to_string())
                        };
                        let _ = tx.send(Err(marker)).await;
                        return;
                    }
                };
                match decoder.feed(&data) {
                    Ok(chunks) => {
                        for chunk in chunks {
                            // Receiver dropped: consumer cancelled, stop producing.
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
            if let Some(tail) = decoder.finish() {
                let _ = tx.send(Ok(tail)).await;
            }
            debug!("synthesis stream complete");
        });
        Ok(stream)
    }
}

/// Incremental decoder for a canonical 16-bit mono WAV byte stream, emitting
/// fixed-duration PCM chunks as bytes arrive.
struct WavStreamDecoder {
    header: Vec<u8>,
    sample_rate: Option<u32>,
    chunk_samples: usize,
    pending_byte: Option<u8>,
    samples: Vec<f32>,
}

impl WavStreamDecoder {
    fn new() -> Self {
        Self {
            header: Vec::with_capacity(44),
            sample_rate: None,
            chunk_samples: 0,
            pending_byte: None,
            samples: Vec::new(),
        }
    }

    fn feed(&mut self, mut data: &[u8]) -> Result<Vec<AudioChunk>, TtsError> {
        if self.sample_rate.is_none() {
            let need = 44 - self.header.len();
            let take = need.min(data.len());
            self.header.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.header.len() < 44 {
                return Ok(Vec::new());
            }
            if &self.header[0..4] != b"RIFF" || &self.header[8..12] != b"WAVE" {
                return Err(TtsError::EngineUnavailable(
                    "synthesis returned a non-WAV payload".to_string(),
                ));
            }
            let rate = u32::from_le_bytes(self.header[24..28].try_into().unwrap());
            if rate == 0 {
                return Err(TtsError::EngineUnavailable(
                    "synthesis reported a zero sample rate".to_string(),
                ));
            }
            self.sample_rate = Some(rate);
            self.chunk_samples = (rate / 5).max(1) as usize; // ~200ms
        }

        let rate = self.sample_rate.unwrap_or(0);
        let mut bytes = Vec::with_capacity(data.len() + 1);
        if let Some(b) = self.pending_byte.take() {
            bytes.push(b);
        }
        bytes.extend_from_slice(data);
        let mut iter = bytes.chunks_exact(2);
        for pair in &mut iter {
            let v = i16::from_le_bytes([pair[0], pair[1]]);
            self.samples.push(v as f32 / 32768.0);
        }
        self.pending_byte = iter.remainder().first().copied();

        let mut out = Vec::new();
        while self.samples.len() >= self.chunk_samples {
            let rest = self.samples.split_off(self.chunk_samples);
            let chunk = std::mem::replace(&mut self.samples, rest);
            out.push(AudioChunk::new(rate, chunk));
        }
        Ok(out)
    }

    fn finish(&mut self) -> Option<AudioChunk> {
        let rate = self.sample_rate?;
        if self.samples.is_empty() {
            return None;
        }
        Some(AudioChunk::new(rate, std::mem::take(&mut self.samples)))
    }
}
