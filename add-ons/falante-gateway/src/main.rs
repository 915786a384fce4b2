//! falante-gateway — launches the voice conversation service.
//!
//! Default mode binds the local media socket for an interactive UI client;
//! `--phone` additionally registers with the telephony bridge for a
//! temporary phone number. Engine credentials are loaded once at startup and
//! their absence is fatal (exit code 1), never a per-call failure.

mod bridge;

use anyhow::Context;
use falante_agent::{ChatClient, ResponseAgent};
use falante_voice::{HttpStt, HttpTts, PipelineConfig, VoicePipeline};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BIND: &str = "127.0.0.1:8035";

#[tokio::main]
async fn main() {
    // Load .env if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[falante-gateway] .env not loaded: {e} (using system environment)");
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let phone = std::env::args().any(|arg| arg == "--phone");
    if let Err(e) = run(phone).await {
        tracing::error!(error = format!("{e:#}"), "startup failed");
        std::process::exit(1);
    }
}

async fn run(phone: bool) -> anyhow::Result<()> {
    let config = PipelineConfig::from_env();
    let stt = HttpStt::from_env().context("transcription engine")?;
    let tts = HttpTts::from_env().context("synthesis engine")?;
    let chat = ChatClient::from_env()
        .context("reasoning engine: GROQ_API_KEY (or LLM_API_KEY) is not set")?;
    let agent = ResponseAgent::new(chat);

    let pipeline = Arc::new(VoicePipeline::new(
        Arc::new(stt),
        Arc::new(agent),
        Arc::new(tts),
        config,
    ));

    if phone {
        let number = bridge::register_phone().await?;
        tracing::info!(%number, "📞 telephony bridge registered");
    } else {
        tracing::info!("🎧 local UI mode; point the client at the media socket");
    }

    let bind = std::env::var("FALANTE_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    bridge::serve(pipeline, &bind).await
}
