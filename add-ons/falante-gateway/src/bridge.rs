//! Media bridge: the narrow seam where the transport collaborator plugs in.
//!
//! Wire format, both directions: `[u32 le sample_count][u32 le sample_rate]`
//! followed by `sample_count` little-endian i16 PCM samples. One pipeline
//! session per connection; a disconnect cancels the active turn and drops
//! whatever audio was not yet streamed.

use anyhow::Context;
use falante_voice::{AudioChunk, AudioFrame, SessionId, VoicePipeline};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

/// Upper bound on one frame; anything larger is a broken or hostile peer.
const MAX_FRAME_SAMPLES: u32 = 1 << 20;

pub async fn serve(pipeline: Arc<VoicePipeline>, bind: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind media socket {bind}"))?;
    info!(%bind, "media bridge listening");

    let mut next_call = 0u64;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted.context("accept media connection")?;
                next_call += 1;
                let id = SessionId::new(format!("call-{next_call}"));
                info!(session = %id, %peer, "call connected");
                tokio::spawn(handle_call(Arc::clone(&pipeline), socket, id));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("CTRL-C received; shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_call(pipeline: Arc<VoicePipeline>, socket: TcpStream, id: SessionId) {
    let handle = pipeline.connect(id.clone());
    let frames = handle.frames;
    let mut chunks = handle.chunks;
    let mut events = handle.events;
    let (reader, writer) = socket.into_split();

    let event_id = id.clone();
    let event_task = tokio::spawn(async move {
        while let Some(ev) = events.recv().await {
            debug!(session = %event_id, turn = ev.turn, status = ?ev.status, "turn status");
        }
    });

    let inbound_id = id.clone();
    let inbound = tokio::spawn(async move {
        let mut reader = reader;
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => {
                    if frames.send(frame).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(session = %inbound_id, error = %e, "inbound read failed");
                    break;
                }
            }
        }
        // Dropping the sender flushes the segmenter and winds the session down.
    });

    let outbound_id = id.clone();
    let outbound = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(chunk) = chunks.recv().await {
            if let Err(e) = write_chunk(&mut writer, &chunk).await {
                debug!(session = %outbound_id, error = %e, "outbound write failed");
                // Dropping the receiver cancels the active turn.
                break;
            }
        }
    });

    let _ = inbound.await;
    let _ = outbound.await;
    let _ = event_task.await;
    info!(session = %id, "call ended");
}

/// `Ok(None)` on clean EOF between frames.
async fn read_frame(reader: &mut OwnedReadHalf) -> anyhow::Result<Option<AudioFrame>> {
    let mut header = [0u8; 8];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let count = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let sample_rate = u32::from_le_bytes(header[4..8].try_into().unwrap());
    anyhow::ensure!(count <= MAX_FRAME_SAMPLES, "oversized frame: {count} samples");

    let mut pcm = vec![0u8; count as usize * 2];
    reader.read_exact(&mut pcm).await?;
    let samples = pcm
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect();
    Ok(Some(AudioFrame::new(sample_rate, samples)))
}

async fn write_chunk(writer: &mut OwnedWriteHalf, chunk: &AudioChunk) -> anyhow::Result<()> {
    let mut out = Vec::with_capacity(8 + chunk.samples.len() * 2);
    out.extend_from_slice(&(chunk.samples.len() as u32).to_le_bytes());
    out.extend_from_slice(&chunk.sample_rate.to_le_bytes());
    for &s in &chunk.samples {
        let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    writer.write_all(&out).await?;
    writer.flush().await?;
    Ok(())
}

/// Register with the telephony bridge (`--phone`) and obtain a temporary
/// number. Both env vars are required; their absence is a startup error.
pub async fn register_phone() -> anyhow::Result<String> {
    let api =
        std::env::var("FALANTE_PHONE_API").context("--phone requires FALANTE_PHONE_API")?;
    let token =
        std::env::var("FALANTE_PHONE_TOKEN").context("--phone requires FALANTE_PHONE_TOKEN")?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("build telephony client")?;
    let res = client
        .post(format!("{}/numbers", api.trim_end_matches('/')))
        .bearer_auth(token.trim())
        .send()
        .await
        .context("telephony bridge registration")?;
    anyhow::ensure!(
        res.status().is_success(),
        "telephony bridge refused registration: {}",
        res.status()
    );
    let body: serde_json::Value = res.json().await.context("registration response")?;
    let number = body
        .get("number")
        .and_then(|n| n.as_str())
        .context("registration response missing number")?;
    Ok(number.to_string())
}
