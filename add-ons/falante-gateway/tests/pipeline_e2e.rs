//! End-to-end turn: "2 mais 2" through the real tool registry and back out
//! as audio. The STT/LLM/TTS engines are scripted; the orchestrator, the
//! segmenter, and the tool dispatch are the real thing.

use async_trait::async_trait;
use falante_agent::ToolRegistry;
use falante_voice::{
    AgentBackend, AgentError, AudioChunk, AudioFrame, AudioStream, PipelineConfig, SegmenterConfig,
    SessionId, SttBackend, SttError, TtsBackend, TtsError, TurnStatus, Utterance, VoiceOptions,
    VoicePipeline,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

const RATE: u32 = 16000;
const FRAME: usize = 480;

struct ScriptedStt;

#[async_trait]
impl SttBackend for ScriptedStt {
    async fn transcribe(&self, _u: &Utterance, language: &str) -> Result<String, SttError> {
        assert_eq!(language, "pt-br");
        Ok("2 mais 2".to_string())
    }
}

/// Stand-in for the LLM that resolves arithmetic through the real registry,
/// the way the model's tool call would.
struct MathAgent {
    tools: ToolRegistry,
}

#[async_trait]
impl AgentBackend for MathAgent {
    async fn respond(&self, _session: &SessionId, text: &str) -> Result<String, AgentError> {
        assert_eq!(text, "2 mais 2");
        let value = self
            .tools
            .dispatch("sum_numbers", r#"{"a": 2, "b": 2}"#)
            .map_err(|e| AgentError::ModelUnavailable(e.to_string()))?;
        let result = value["result"].as_f64().unwrap_or_default();
        Ok(format!("o resultado é {result}"))
    }
}

/// Synthesizes a fixed amount of audio per sentence and records the input.
struct ScriptedTts {
    spoken: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl TtsBackend for ScriptedTts {
    async fn synthesize(
        &self,
        text: &str,
        _options: &VoiceOptions,
    ) -> Result<AudioStream, TtsError> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(AudioStream::from_chunks(vec![
            AudioChunk::new(RATE, vec![0.3; 1600]),
            AudioChunk::new(RATE, vec![0.3; 1600]),
        ]))
    }
}

#[tokio::test]
async fn two_plus_two_turn_completes_with_audio() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let spoken = Arc::new(Mutex::new(Vec::new()));
    let config = PipelineConfig {
        segmenter: SegmenterConfig {
            silence_gap: Duration::from_millis(60),
            min_speech: Duration::from_millis(30),
            ..SegmenterConfig::default()
        },
        ..PipelineConfig::default()
    };
    let pipeline = VoicePipeline::new(
        Arc::new(ScriptedStt),
        Arc::new(MathAgent {
            tools: ToolRegistry::with_builtin_math(),
        }),
        Arc::new(ScriptedTts {
            spoken: spoken.clone(),
        }),
        config,
    );
    let mut handle = pipeline.connect(SessionId::new("e2e"));

    // One spoken utterance followed by a pause.
    for _ in 0..8 {
        handle
            .frames
            .send(AudioFrame::new(RATE, vec![0.5; FRAME]))
            .await
            .unwrap();
    }
    for _ in 0..4 {
        handle
            .frames
            .send(AudioFrame::new(RATE, vec![0.0; FRAME]))
            .await
            .unwrap();
    }

    // The turn walks the whole forward path.
    let mut statuses = Vec::new();
    loop {
        let ev = timeout(Duration::from_secs(2), handle.events.recv())
            .await
            .expect("event within bound")
            .expect("events open");
        statuses.push(ev.status);
        if ev.status.is_terminal() {
            break;
        }
    }
    assert_eq!(
        statuses,
        vec![
            TurnStatus::Listening,
            TurnStatus::Transcribing,
            TurnStatus::Generating,
            TurnStatus::Synthesizing,
            TurnStatus::Completed,
        ]
    );

    // The reply went through the sum tool.
    assert_eq!(spoken.lock().unwrap().as_slice(), ["o resultado é 4"]);

    // And came back as nonzero audio, in order, tagged with the turn.
    let mut total = Duration::ZERO;
    let mut chunks = 0;
    while let Ok(Some(chunk)) = timeout(Duration::from_millis(300), handle.chunks.recv()).await {
        assert_eq!(chunk.turn_id, 1);
        total += chunk.duration();
        chunks += 1;
    }
    assert!(chunks >= 1);
    assert!(total > Duration::ZERO);
}
