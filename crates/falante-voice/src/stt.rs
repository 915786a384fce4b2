//! Speech-to-text boundary: convert one finalized [`Utterance`] into text.
//!
//! From the orchestrator's viewpoint this is a pure call: audio in, text (or
//! a typed failure) out. Empty or near-silent utterances transcribe to empty
//! text, never to an error.

use crate::audio::Utterance;
use crate::error::{PipelineError, SttError};
use async_trait::async_trait;
use std::io::Write;
use std::time::Duration;

const DEFAULT_API_BASE: &str = "https://api.groq.com/openai/v1";
const DEFAULT_MODEL: &str = "whisper-large-v3-turbo";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Transcription engine boundary.
#[async_trait]
pub trait SttBackend: Send + Sync {
    /// Transcribe one utterance. `language` is a locale hint (e.g. `pt-br`).
    async fn transcribe(&self, utterance: &Utterance, language: &str) -> Result<String, SttError>;
}

/// Encode f32 PCM (mono) to 16-bit WAV bytes for API upload.
pub fn pcm_f32_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = samples.len() * 2; // 16-bit = 2 bytes per sample
    let file_len = 44u32 + data_len as u32;

    let mut buf = Vec::with_capacity(44 + data_len);
    // RIFF header
    buf.write_all(b"RIFF").unwrap();
    buf.write_all(&(file_len - 8).to_le_bytes()).unwrap();
    buf.write_all(b"WAVE").unwrap();
    // fmt subchunk
    buf.write_all(b"fmt ").unwrap();
    buf.write_all(&16u32.to_le_bytes()).unwrap();
    buf.write_all(&1u16.to_le_bytes()).unwrap(); // PCM
    buf.write_all(&1u16.to_le_bytes()).unwrap(); // mono
    buf.write_all(&sample_rate.to_le_bytes()).unwrap();
    buf.write_all(&(sample_rate * 2).to_le_bytes()).unwrap(); // byte rate
    buf.write_all(&2u16.to_le_bytes()).unwrap(); // block align
    buf.write_all(&16u16.to_le_bytes()).unwrap(); // bits per sample
    // data subchunk
    buf.write_all(b"data").unwrap();
    buf.write_all(&(data_len as u32).to_le_bytes()).unwrap();
    for &s in samples {
        let i = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        buf.write_all(&i.to_le_bytes()).unwrap();
    }
    buf
}

/// Production STT backend: OpenAI-compatible transcription API (Groq Whisper,
/// OpenAI, etc.). Uploads the utterance as a 16-bit WAV.
#[derive(Debug, Clone)]
pub struct HttpStt {
    /// Base URL without trailing slash (e.g. `https://api.groq.com/openai/v1`).
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// Model, e.g. `whisper-large-v3-turbo`.
    pub model: String,
    client: reqwest::Client,
}

impl HttpStt {
    /// Build from environment: `STT_API_URL`, `STT_API_KEY` (or
    /// `GROQ_API_KEY`), `STT_MODEL`. A missing key is a startup error.
    pub fn from_env() -> Result<Self, PipelineError> {
        let base_url =
            std::env::var("STT_API_URL").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let api_key = std::env::var("STT_API_KEY")
            .or_else(|_| std::env::var("GROQ_API_KEY"))
            .map_err(|_| {
                PipelineError::Config("STT requires STT_API_KEY or GROQ_API_KEY".to_string())
            })?;
        let model = std::env::var("STT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
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

    fn map_send_error(e: reqwest::Error) -> SttError {
        if e.is_timeout() {
            SttError::Timeout(HTTP_TIMEOUT)
        } else {
            SttError::EngineUnavailable(e.to_string())
        }
    }
}

#[async_trait]
impl SttBackend for HttpStt {
    async fn transcribe(&self, utterance: &Utterance, language: &str) -> Result<String, SttError> {
        let samples = utterance.samples();
        if samples.is_empty() {
            return Ok(String::new());
        }
        let wav = pcm_f32_to_wav(&samples, utterance.sample_rate());
        let url = format!(
            "{}/audio/transcriptions",
            self.base_url.trim_end_matches('/')
        );
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| SttError::InvalidAudio(e.to_string()))?;
        // The API takes the primary language subtag ("pt-br" -> "pt").
        let lang = language
            .split('-')
            .next()
            .unwrap_or(language)
            .to_string();
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", lang);

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return if status.as_u16() == 400 || status.as_u16() == 422 {
                Err(SttError::InvalidAudio(format!("{status}: {body}")))
            } else {
                Err(SttError::EngineUnavailable(format!("{status}: {body}")))
            };
        }

        let json: serde_json::Value = res
            .json()
            .await
            .map_err(|e| SttError::EngineUnavailable(e.to_string()))?;
        Ok(json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_matches_payload() {
        let wav = pcm_f32_to_wav(&[0.0, 0.5, -0.5, 1.0], 16000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[36..40], b"data");
        // 4 samples * 2 bytes
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 8);
        assert_eq!(u32::from_le_bytes(wav[24..28].try_into().unwrap()), 16000);
        assert_eq!(wav.len(), 44 + 8);
    }

    #[test]
    fn wav_clamps_out_of_range_samples() {
        let wav = pcm_f32_to_wav(&[2.0, -2.0], 16000);
        let hi = i16::from_le_bytes(wav[44..46].try_into().unwrap());
        let lo = i16::from_le_bytes(wav[46..48].try_into().unwrap());
        assert_eq!(hi, 32767);
        assert_eq!(lo, -32767);
    }
}
