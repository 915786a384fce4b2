//! Integration tests for the turn orchestrator, with scripted engine
//! backends standing in for the external STT/agent/TTS collaborators.

use async_trait::async_trait;
use falante_voice::{
    AgentBackend, AgentError, AudioChunk, AudioFrame, AudioStream, PipelineConfig, SegmenterConfig,
    SessionHandle, SessionId, SttBackend, SttError, TtsBackend, TtsError, TurnPolicy, TurnStatus,
    Utterance, VoiceOptions, VoicePipeline,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

const RATE: u32 = 16000;
const FRAME: usize = 480; // 30ms

fn test_config() -> PipelineConfig {
    PipelineConfig {
        segmenter: SegmenterConfig {
            silence_gap: Duration::from_millis(60),
            min_speech: Duration::from_millis(30),
            max_utterance: Duration::from_secs(30),
            sensitivity: 0.5,
        },
        turn_policy: TurnPolicy::Drop,
        stt_timeout: Duration::from_millis(100),
        agent_timeout: Duration::from_millis(500),
        tts_timeout: Duration::from_millis(500),
        tts_chunk_timeout: Duration::from_millis(500),
        voice: VoiceOptions::default(),
    }
}

/// Push one spoken utterance (speech frames then enough silence to commit).
async fn speak(handle: &SessionHandle, amplitude: f32, speech_frames: usize) {
    for _ in 0..speech_frames {
        handle
            .frames
            .send(AudioFrame::new(RATE, vec![amplitude; FRAME]))
            .await
            .expect("inbound open");
    }
    for _ in 0..4 {
        handle
            .frames
            .send(AudioFrame::new(RATE, vec![0.0; FRAME]))
            .await
            .expect("inbound open");
    }
}

async fn next_status(handle: &mut SessionHandle) -> Option<(u64, TurnStatus)> {
    timeout(Duration::from_secs(2), handle.events.recv())
        .await
        .expect("event within bound")
        .map(|e| (e.turn, e.status))
}

async fn statuses_until_terminal(handle: &mut SessionHandle) -> Vec<(u64, TurnStatus)> {
    let mut seen = Vec::new();
    loop {
        let (turn, status) = next_status(handle).await.expect("events open");
        seen.push((turn, status));
        if status.is_terminal() {
            return seen;
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted backends
// ---------------------------------------------------------------------------

struct FixedStt(&'static str);

#[async_trait]
impl SttBackend for FixedStt {
    async fn transcribe(&self, _u: &Utterance, _language: &str) -> Result<String, SttError> {
        Ok(self.0.to_string())
    }
}

/// Classifies by peak amplitude so two sessions can be told apart.
struct AmplitudeStt;

#[async_trait]
impl SttBackend for AmplitudeStt {
    async fn transcribe(&self, u: &Utterance, _language: &str) -> Result<String, SttError> {
        let peak = u.samples().iter().fold(0.0f32, |m, s| m.max(s.abs()));
        Ok(if peak > 0.45 { "alto" } else { "baixo" }.to_string())
    }
}

/// Never answers; the orchestrator's timeout has to fire.
struct StalledStt;

#[async_trait]
impl SttBackend for StalledStt {
    async fn transcribe(&self, _u: &Utterance, _language: &str) -> Result<String, SttError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(String::new())
    }
}

struct CountingAgent {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingAgent {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }
}

#[async_trait]
impl AgentBackend for CountingAgent {
    async fn respond(&self, _session: &SessionId, _text: &str) -> Result<String, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok("resposta".to_string())
    }
}

struct FailingAgent;

#[async_trait]
impl AgentBackend for FailingAgent {
    async fn respond(&self, _session: &SessionId, _text: &str) -> Result<String, AgentError> {
        Err(AgentError::ModelUnavailable("offline".to_string()))
    }
}

/// Appends each (session, transcript) pair to a shared log, like a keyed
/// memory store would.
struct RecordingAgent {
    log: Arc<Mutex<HashMap<String, Vec<String>>>>,
}

#[async_trait]
impl AgentBackend for RecordingAgent {
    async fn respond(&self, session: &SessionId, text: &str) -> Result<String, AgentError> {
        self.log
            .lock()
            .unwrap()
            .entry(session.as_str().to_string())
            .or_default()
            .push(text.to_string());
        Ok(format!("ouvi {text}"))
    }
}

/// Emits `chunks` marker chunks per call and records every synthesized text.
struct ScriptedTts {
    chunks: usize,
    fail_after: Option<usize>,
    texts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTts {
    fn new(chunks: usize) -> Self {
        Self {
            chunks,
            fail_after: None,
            texts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn failing_after(chunks: usize, produced: usize) -> Self {
        Self {
            chunks,
            fail_after: Some(produced),
            texts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl TtsBackend for ScriptedTts {
    async fn synthesize(
        &self,
        text: &str,
        _options: &VoiceOptions,
    ) -> Result<AudioStream, TtsError> {
        self.texts.lock().unwrap().push(text.to_string());
        let total = self.chunks;
        let fail_after = self.fail_after;
        let (tx, stream) = AudioStream::channel();
        tokio::spawn(async move {
            for i in 0..total {
                if fail_after == Some(i) {
                    let _ = tx
                        .send(Err(TtsError::EngineUnavailable("mid-stream".to_string())))
                        .await;
                    return;
                }
                // Marker sample encodes production order.
                let marker = (i + 1) as f32 / 10.0;
                let chunk = AudioChunk::new(RATE, vec![marker; 160]);
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        });
        Ok(stream)
    }
}

struct BrokenTts;

#[async_trait]
impl TtsBackend for BrokenTts {
    async fn synthesize(
        &self,
        _text: &str,
        _options: &VoiceOptions,
    ) -> Result<AudioStream, TtsError> {
        Err(TtsError::EngineUnavailable("no synthesis".to_string()))
    }
}

fn pipeline(
    stt: Arc<dyn SttBackend>,
    agent: Arc<dyn AgentBackend>,
    tts: Arc<dyn TtsBackend>,
    config: PipelineConfig,
) -> VoicePipeline {
    VoicePipeline::new(stt, agent, tts, config)
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stalled_transcription_fails_turn_without_invoking_agent() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let agent = CountingAgent::new(Duration::ZERO);
    let pipe = pipeline(
        Arc::new(StalledStt),
        agent.clone(),
        Arc::new(ScriptedTts::new(1)),
        test_config(),
    );
    let mut handle = pipe.connect(SessionId::new("call-stt-timeout"));

    speak(&handle, 0.5, 5).await;
    let seen = statuses_until_terminal(&mut handle).await;
    assert_eq!(
        seen,
        vec![
            (1, TurnStatus::Listening),
            (1, TurnStatus::Transcribing),
            (1, TurnStatus::Failed),
        ]
    );
    assert_eq!(agent.calls.load(Ordering::SeqCst), 0);

    // The caller hears the cue instead of dead air.
    let cue = timeout(Duration::from_secs(2), handle.chunks.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cue.turn_id, 1);
    assert!(cue.samples.iter().any(|s| s.abs() > 0.01));

    // Session is back to listening: a fresh utterance opens turn 2.
    speak(&handle, 0.5, 5).await;
    let (turn, status) = next_status(&mut handle).await.unwrap();
    assert_eq!((turn, status), (2, TurnStatus::Listening));
}

#[tokio::test]
async fn agent_failure_streams_an_apology() {
    let tts = ScriptedTts::new(2);
    let texts = tts.texts.clone();
    let pipe = pipeline(
        Arc::new(FixedStt("quanto é dois mais dois")),
        Arc::new(FailingAgent),
        Arc::new(tts),
        test_config(),
    );
    let mut handle = pipe.connect(SessionId::new("call-agent-down"));

    speak(&handle, 0.5, 5).await;
    let seen = statuses_until_terminal(&mut handle).await;
    assert_eq!(seen.last(), Some(&(1, TurnStatus::Failed)));

    let chunk = timeout(Duration::from_secs(2), handle.chunks.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(!chunk.samples.is_empty());
    assert_eq!(chunk.turn_id, 1);

    let spoken = texts.lock().unwrap().join(" ");
    assert!(spoken.contains("Desculpe"));
}

#[tokio::test]
async fn agent_failure_with_broken_synthesis_still_emits_the_cue() {
    let pipe = pipeline(
        Arc::new(FixedStt("oi")),
        Arc::new(FailingAgent),
        Arc::new(BrokenTts),
        test_config(),
    );
    let mut handle = pipe.connect(SessionId::new("call-all-down"));

    speak(&handle, 0.5, 5).await;
    let chunk = timeout(Duration::from_secs(2), handle.chunks.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(chunk.samples.iter().any(|s| s.abs() > 0.01));
}

#[tokio::test]
async fn chunks_stay_ordered_and_never_interleave_across_turns() {
    let pipe = pipeline(
        Arc::new(FixedStt("fala")),
        CountingAgent::new(Duration::ZERO),
        Arc::new(ScriptedTts::new(3)),
        test_config(),
    );
    let mut handle = pipe.connect(SessionId::new("call-order"));

    speak(&handle, 0.5, 5).await;
    let seen = statuses_until_terminal(&mut handle).await;
    assert_eq!(
        seen,
        vec![
            (1, TurnStatus::Listening),
            (1, TurnStatus::Transcribing),
            (1, TurnStatus::Generating),
            (1, TurnStatus::Synthesizing),
            (1, TurnStatus::Completed),
        ]
    );

    speak(&handle, 0.5, 5).await;
    let seen = statuses_until_terminal(&mut handle).await;
    assert_eq!(seen.last(), Some(&(2, TurnStatus::Completed)));

    let mut collected = Vec::new();
    for _ in 0..6 {
        let chunk = timeout(Duration::from_secs(2), handle.chunks.recv())
            .await
            .unwrap()
            .unwrap();
        collected.push(chunk);
    }
    let turn_ids: Vec<u64> = collected.iter().map(|c| c.turn_id).collect();
    assert_eq!(turn_ids, vec![1, 1, 1, 2, 2, 2]);
    for turn_chunks in collected.chunks(3) {
        let markers: Vec<i32> = turn_chunks
            .iter()
            .map(|c| (c.samples[0] * 10.0).round() as i32)
            .collect();
        assert_eq!(markers, vec![1, 2, 3]);
    }
}

#[tokio::test]
async fn mid_stream_synthesis_failure_truncates_but_session_survives() {
    let pipe = pipeline(
        Arc::new(FixedStt("fala")),
        CountingAgent::new(Duration::ZERO),
        Arc::new(ScriptedTts::failing_after(5, 2)),
        test_config(),
    );
    let mut handle = pipe.connect(SessionId::new("call-truncated"));

    speak(&handle, 0.5, 5).await;
    let seen = statuses_until_terminal(&mut handle).await;
    assert_eq!(seen.last(), Some(&(1, TurnStatus::Failed)));

    // Exactly the chunks produced before the failure were forwarded.
    let mut forwarded = 0;
    while let Ok(Some(chunk)) = timeout(Duration::from_millis(200), handle.chunks.recv()).await {
        assert_eq!(chunk.turn_id, 1);
        forwarded += 1;
    }
    assert_eq!(forwarded, 2);

    // The next utterance starts a fresh turn.
    speak(&handle, 0.5, 5).await;
    let (turn, _) = next_status(&mut handle).await.unwrap();
    assert_eq!(turn, 2);
}

#[tokio::test]
async fn drop_policy_rejects_overlapping_utterances() {
    let agent = CountingAgent::new(Duration::from_millis(300));
    let pipe = pipeline(
        Arc::new(FixedStt("fala")),
        agent.clone(),
        Arc::new(ScriptedTts::new(1)),
        test_config(),
    );
    let mut handle = pipe.connect(SessionId::new("call-drop"));

    // Two utterances back to back: the second lands while turn 1 is busy in
    // the agent and is dropped (one may sit in the pending slot race-free,
    // so use three to make the overlap certain).
    speak(&handle, 0.5, 5).await;
    speak(&handle, 0.5, 5).await;
    speak(&handle, 0.5, 5).await;

    tokio::time::sleep(Duration::from_millis(900)).await;
    let calls = agent.calls.load(Ordering::SeqCst);
    assert!(calls < 3, "expected overlapping utterances to be dropped, agent ran {calls} times");
    assert!(calls >= 1);
}

#[tokio::test]
async fn queue_one_policy_processes_the_pending_utterance() {
    let agent = CountingAgent::new(Duration::from_millis(150));
    let config = PipelineConfig {
        turn_policy: TurnPolicy::QueueOne,
        ..test_config()
    };
    let pipe = pipeline(
        Arc::new(FixedStt("fala")),
        agent.clone(),
        Arc::new(ScriptedTts::new(1)),
        config,
    );
    let mut handle = pipe.connect(SessionId::new("call-queue"));

    speak(&handle, 0.5, 5).await;
    // Let turn 1 start before the second utterance lands in the pending slot.
    tokio::time::sleep(Duration::from_millis(50)).await;
    speak(&handle, 0.5, 5).await;

    // Drain chunks so the second turn is never blocked on outbound space.
    let drain = tokio::spawn(async move {
        while handle.chunks.recv().await.is_some() {}
    });
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(agent.calls.load(Ordering::SeqCst), 2);
    drain.abort();
}

#[tokio::test]
async fn sessions_are_isolated_and_run_in_parallel() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let log = Arc::new(Mutex::new(HashMap::new()));
    let pipe = pipeline(
        Arc::new(AmplitudeStt),
        Arc::new(RecordingAgent { log: log.clone() }),
        Arc::new(ScriptedTts::new(1)),
        test_config(),
    );
    let mut quiet = pipe.connect(SessionId::new("call-a"));
    let mut loud = pipe.connect(SessionId::new("call-b"));

    tokio::join!(speak(&quiet, 0.4, 5), speak(&loud, 0.8, 5));
    let (a, b) = tokio::join!(
        statuses_until_terminal(&mut quiet),
        statuses_until_terminal(&mut loud)
    );
    assert_eq!(a.last(), Some(&(1, TurnStatus::Completed)));
    assert_eq!(b.last(), Some(&(1, TurnStatus::Completed)));

    let log = log.lock().unwrap();
    assert_eq!(log["call-a"], vec!["baixo".to_string()]);
    assert_eq!(log["call-b"], vec!["alto".to_string()]);
}

#[tokio::test]
async fn disconnecting_the_transport_cancels_the_session() {
    let pipe = pipeline(
        Arc::new(FixedStt("fala")),
        CountingAgent::new(Duration::ZERO),
        Arc::new(ScriptedTts::new(3)),
        test_config(),
    );
    let SessionHandle {
        frames,
        chunks,
        mut events,
    } = pipe.connect(SessionId::new("call-hangup"));

    // Caller hangs up: outbound is gone before the turn finishes streaming.
    drop(chunks);
    for _ in 0..5 {
        let _ = frames
            .send(AudioFrame::new(RATE, vec![0.5; FRAME]))
            .await;
    }
    for _ in 0..4 {
        let _ = frames.send(AudioFrame::new(RATE, vec![0.0; FRAME])).await;
    }

    // The session tears down: the event stream ends after the aborted turn.
    let ended = timeout(Duration::from_secs(2), async {
        while let Some(ev) = events.recv().await {
            if ev.status == TurnStatus::Failed {
                // expected terminal state for the cancelled turn
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "session should close after disconnect");
}

#[tokio::test]
async fn empty_transcript_still_reaches_the_agent() {
    let agent = CountingAgent::new(Duration::ZERO);
    let pipe = pipeline(
        Arc::new(FixedStt("")),
        agent.clone(),
        Arc::new(ScriptedTts::new(1)),
        test_config(),
    );
    let mut handle = pipe.connect(SessionId::new("call-empty"));

    speak(&handle, 0.5, 5).await;
    let seen = statuses_until_terminal(&mut handle).await;
    assert_eq!(seen.last(), Some(&(1, TurnStatus::Completed)));
    assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
}
