//! The turn orchestrator: wires segmentation, transcription, response
//! generation, and synthesis into one per-session pipeline.
//!
//! Two tasks per session. The ingest task runs the segmenter on every inbound
//! frame and never blocks on outbound processing; the turn task runs at most
//! one turn at a time, so agent memory is never updated out of order and
//! exactly one outbound stream is active per session. Stage failures are
//! absorbed here: the caller hears a short cue or an apology phrase and the
//! session keeps listening. Sessions are independent; one stalled pipeline
//! never blocks another.

use crate::audio::{fallback_cue, AudioChunk, AudioFrame, Utterance};
use crate::config::PipelineConfig;
use crate::error::{AgentError, PipelineError, SttError};
use crate::segmenter::UtteranceSegmenter;
use crate::session::{Session, SessionId, Turn, TurnPolicy, TurnStatus};
use crate::stt::SttBackend;
use crate::tts::TtsBackend;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Streamed to the caller when a turn fails after the reply was lost too
/// (synthesis of this phrase is itself best-effort; the cue is the floor).
const APOLOGY_PHRASE: &str =
    "Desculpe, tive um problema para pensar na resposta. Pode repetir, por favor?";

/// Cue sample rate when the failed utterance carried none.
const FALLBACK_RATE: u32 = 16000;

const INBOUND_DEPTH: usize = 64;
const OUTBOUND_DEPTH: usize = 8;

/// Response-generation boundary. Implementations own a durable memory store
/// keyed by [`SessionId`]; distinct sessions may call concurrently, a single
/// session is serialized by the one-turn-at-a-time rule here.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn respond(&self, session: &SessionId, text: &str) -> Result<String, AgentError>;
}

/// Status change notification for one session's turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnEvent {
    pub turn: u64,
    pub status: TurnStatus,
}

/// The transport's view of one connected session.
pub struct SessionHandle {
    /// Inbound media: drop the sender to end the call (the segmenter flushes
    /// a final utterance first).
    pub frames: mpsc::Sender<AudioFrame>,
    /// Outbound media, in emission order. Dropping the receiver cancels the
    /// active turn and tears the session down.
    pub chunks: mpsc::Receiver<AudioChunk>,
    /// Turn lifecycle notifications, for logging and UIs.
    pub events: mpsc::UnboundedReceiver<TurnEvent>,
}

/// One orchestrator shared by all sessions; engines are swappable backends.
pub struct VoicePipeline {
    stt: Arc<dyn SttBackend>,
    agent: Arc<dyn AgentBackend>,
    tts: Arc<dyn TtsBackend>,
    config: PipelineConfig,
}

impl VoicePipeline {
    pub fn new(
        stt: Arc<dyn SttBackend>,
        agent: Arc<dyn AgentBackend>,
        tts: Arc<dyn TtsBackend>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            stt,
            agent,
            tts,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Open a session. Spawns the per-session ingest and turn tasks; they end
    /// when the transport closes either side of the handle.
    pub fn connect(&self, id: SessionId) -> SessionHandle {
        let (frame_tx, frame_rx) = mpsc::channel(INBOUND_DEPTH);
        let (chunk_tx, chunk_rx) = mpsc::channel(OUTBOUND_DEPTH);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (utterance_tx, utterance_rx) = mpsc::channel(1);
        // Active turn id; 0 means the session is listening.
        let active_turn = Arc::new(AtomicU64::new(0));

        let segmenter = UtteranceSegmenter::new(self.config.segmenter.clone());
        tokio::spawn(ingest_loop(
            id.clone(),
            segmenter,
            frame_rx,
            utterance_tx,
            Arc::clone(&active_turn),
            self.config.turn_policy,
        ));
        tokio::spawn(turn_loop(
            id,
            utterance_rx,
            chunk_tx,
            event_tx,
            active_turn,
            Arc::clone(&self.stt),
            Arc::clone(&self.agent),
            Arc::clone(&self.tts),
            self.config.clone(),
        ));

        SessionHandle {
            frames: frame_tx,
            chunks: chunk_rx,
            events: event_rx,
        }
    }
}

/// Consumes inbound frames concurrently with turn processing. Committed
/// utterances pass through the overlap policy before reaching the turn task.
async fn ingest_loop(
    session_id: SessionId,
    mut segmenter: UtteranceSegmenter,
    mut frames: mpsc::Receiver<AudioFrame>,
    utterances: mpsc::Sender<Utterance>,
    active_turn: Arc<AtomicU64>,
    policy: TurnPolicy,
) {
    while let Some(frame) = frames.recv().await {
        if let Some(utterance) = segmenter.push(frame) {
            if !route_utterance(&session_id, utterance, &utterances, &active_turn, policy) {
                return;
            }
        }
    }
    // Transport closed the inbound side: flush whatever is buffered.
    if let Some(utterance) = segmenter.flush() {
        route_utterance(&session_id, utterance, &utterances, &active_turn, policy);
    }
    debug!(session = %session_id, "inbound media stream ended");
}

/// Returns false when the turn task is gone and ingestion should stop.
fn route_utterance(
    session_id: &SessionId,
    utterance: Utterance,
    utterances: &mpsc::Sender<Utterance>,
    active_turn: &AtomicU64,
    policy: TurnPolicy,
) -> bool {
    let active = active_turn.load(Ordering::SeqCst);
    if policy == TurnPolicy::Drop && active != 0 {
        let conflict = PipelineError::SessionConflict { active };
        warn!(session = %session_id, error = %conflict, "utterance dropped");
        return true;
    }
    match utterances.try_send(utterance) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(session = %session_id, "pending utterance slot full, dropping");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[allow(clippy::too_many_arguments)]
async fn turn_loop(
    id: SessionId,
    mut utterances: mpsc::Receiver<Utterance>,
    chunks: mpsc::Sender<AudioChunk>,
    events: mpsc::UnboundedSender<TurnEvent>,
    active_turn: Arc<AtomicU64>,
    stt: Arc<dyn SttBackend>,
    agent: Arc<dyn AgentBackend>,
    tts: Arc<dyn TtsBackend>,
    config: PipelineConfig,
) {
    let mut session = Session::new(id);
    while let Some(utterance) = utterances.recv().await {
        let mut turn = session.begin_turn();
        active_turn.store(turn.id, Ordering::SeqCst);
        emit(&events, &turn);

        let result = run_turn(
            &session.id, &mut turn, utterance, &chunks, &events, &stt, &agent, &tts, &config,
        )
        .await;

        if result.is_err() && !turn.status().is_terminal() {
            turn.fail();
            emit(&events, &turn);
        }
        let status = turn.status();
        let turn_id = turn.id;
        session.record(turn);
        active_turn.store(0, Ordering::SeqCst);

        match result {
            Ok(()) => debug!(session = %session.id, turn = turn_id, status = ?status, "turn finished"),
            Err(PipelineError::Disconnected) => {
                info!(session = %session.id, turn = turn_id, "caller disconnected mid-turn, dropping unstreamed audio");
                break;
            }
            Err(e) => error!(session = %session.id, turn = turn_id, error = %e, "turn aborted"),
        }
    }
    info!(session = %session.id, turns = session.history().len(), "session closed");
}

fn emit(events: &mpsc::UnboundedSender<TurnEvent>, turn: &Turn) {
    let _ = events.send(TurnEvent {
        turn: turn.id,
        status: turn.status(),
    });
}

fn advance(
    turn: &mut Turn,
    next: TurnStatus,
    events: &mpsc::UnboundedSender<TurnEvent>,
) -> Result<(), PipelineError> {
    turn.advance(next)?;
    emit(events, turn);
    Ok(())
}

fn fail(turn: &mut Turn, events: &mpsc::UnboundedSender<TurnEvent>) {
    turn.fail();
    emit(events, turn);
}

/// One transcribe → respond → synthesize cycle. Returns `Err` only when the
/// transport disconnected; every stage failure leaves the turn terminal and
/// the caller with something audible.
#[allow(clippy::too_many_arguments)]
async fn run_turn(
    session_id: &SessionId,
    turn: &mut Turn,
    utterance: Utterance,
    out: &mpsc::Sender<AudioChunk>,
    events: &mpsc::UnboundedSender<TurnEvent>,
    stt: &Arc<dyn SttBackend>,
    agent: &Arc<dyn AgentBackend>,
    tts: &Arc<dyn TtsBackend>,
    config: &PipelineConfig,
) -> Result<(), PipelineError> {
    let cue_rate = match utterance.sample_rate() {
        0 => FALLBACK_RATE,
        rate => rate,
    };

    advance(turn, TurnStatus::Transcribing, events)?;
    let transcript = match timeout(
        config.stt_timeout,
        stt.transcribe(&utterance, &config.voice.language),
    )
    .await
    {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(session = %session_id, turn = turn.id, error = %e, "transcription failed");
            fail(turn, events);
            return send_cue(out, turn.id, cue_rate).await;
        }
        Err(_) => {
            let e = SttError::Timeout(config.stt_timeout);
            warn!(session = %session_id, turn = turn.id, error = %e, "transcription failed");
            fail(turn, events);
            return send_cue(out, turn.id, cue_rate).await;
        }
    };
    info!(session = %session_id, turn = turn.id, transcript = %transcript, "transcribed");
    turn.transcript = Some(transcript.clone());

    advance(turn, TurnStatus::Generating, events)?;
    let reply = match timeout(config.agent_timeout, agent.respond(session_id, &transcript)).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => {
            warn!(session = %session_id, turn = turn.id, error = %e, "response generation failed");
            return apologize(session_id, turn, out, events, tts, config, cue_rate).await;
        }
        Err(_) => {
            let e = AgentError::Timeout(config.agent_timeout);
            warn!(session = %session_id, turn = turn.id, error = %e, "response generation failed");
            return apologize(session_id, turn, out, events, tts, config, cue_rate).await;
        }
    };
    info!(session = %session_id, turn = turn.id, reply = %reply, "reply ready");
    turn.reply = Some(reply.clone());

    advance(turn, TurnStatus::Synthesizing, events)?;
    let outcome = stream_reply(session_id, turn.id, &reply, out, tts, config).await?;
    if outcome.completed {
        advance(turn, TurnStatus::Completed, events)?;
        info!(session = %session_id, turn = turn.id, chunks = outcome.forwarded, "turn completed");
    } else {
        // Whatever was already produced has been forwarded; no retry.
        fail(turn, events);
    }
    Ok(())
}

/// Agent-stage failure: the turn is failed, but the caller still hears the
/// apology phrase — or at least the cue when synthesis fails too.
async fn apologize(
    session_id: &SessionId,
    turn: &mut Turn,
    out: &mpsc::Sender<AudioChunk>,
    events: &mpsc::UnboundedSender<TurnEvent>,
    tts: &Arc<dyn TtsBackend>,
    config: &PipelineConfig,
    cue_rate: u32,
) -> Result<(), PipelineError> {
    fail(turn, events);
    let outcome = stream_reply(session_id, turn.id, APOLOGY_PHRASE, out, tts, config).await?;
    if outcome.forwarded == 0 {
        return send_cue(out, turn.id, cue_rate).await;
    }
    Ok(())
}

struct StreamOutcome {
    completed: bool,
    forwarded: usize,
}

/// Forward synthesized chunks to the transport as they are produced, tagged
/// with the turn id, in order. Backpressure comes from the bounded outbound
/// channel; `Err` means the transport hung up.
async fn stream_reply(
    session_id: &SessionId,
    turn_id: u64,
    text: &str,
    out: &mpsc::Sender<AudioChunk>,
    tts: &Arc<dyn TtsBackend>,
    config: &PipelineConfig,
) -> Result<StreamOutcome, PipelineError> {
    let mut stream = match timeout(config.tts_timeout, tts.synthesize(text, &config.voice)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(session = %session_id, turn = turn_id, error = %e, "synthesis failed to start");
            return Ok(StreamOutcome {
                completed: false,
                forwarded: 0,
            });
        }
        Err(_) => {
            warn!(session = %session_id, turn = turn_id, "synthesis start timed out");
            return Ok(StreamOutcome {
                completed: false,
                forwarded: 0,
            });
        }
    };

    let mut forwarded = 0usize;
    loop {
        let wait = if forwarded == 0 {
            config.tts_timeout
        } else {
            config.tts_chunk_timeout
        };
        match timeout(wait, stream.next_chunk()).await {
            Ok(None) => {
                return Ok(StreamOutcome {
                    completed: true,
                    forwarded,
                })
            }
            Ok(Some(Ok(mut chunk))) => {
                if chunk.samples.is_empty() {
                    continue;
                }
                chunk.turn_id = turn_id;
                out.send(chunk)
                    .await
                    .map_err(|_| PipelineError::Disconnected)?;
                forwarded += 1;
            }
            Ok(Some(Err(e))) => {
                warn!(session = %session_id, turn = turn_id, forwarded, error = %e, "synthesis failed mid-stream");
                return Ok(StreamOutcome {
                    completed: false,
                    forwarded,
                });
            }
            Err(_) => {
                warn!(session = %session_id, turn = turn_id, forwarded, "synthesis stalled mid-stream");
                return Ok(StreamOutcome {
                    completed: false,
                    forwarded,
                });
            }
        }
    }
}

async fn send_cue(
    out: &mpsc::Sender<AudioChunk>,
    turn_id: u64,
    sample_rate: u32,
) -> Result<(), PipelineError> {
    out.send(fallback_cue(turn_id, sample_rate))
        .await
        .map_err(|_| PipelineError::Disconnected)
}
