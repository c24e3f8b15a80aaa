//! `fennec-stream`: streams a raw PCM file through a realtime transcription session
//! and prints transcripts as they arrive.
//!
//! ```text
//! export FENNEC_API_KEY=sk_...
//! fennec-stream speech.pcm --detect-thoughts
//! ```

mod audio;
mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use fennec_realtime::{Error, EventRegistry, MessageStream, RealtimeSession, SessionHandle};
use futures_util::StreamExt;
use tracing::{error, info, warn};

use crate::audio::PcmFormat;
use crate::config::Config;

/// Stream a raw PCM file to Fennec realtime transcription
#[derive(Parser, Debug)]
#[command(name = "fennec-stream", version)]
struct Args {
    /// Raw 16-bit little-endian PCM file
    #[arg(value_name = "FILE")]
    file: PathBuf,

    #[arg(long, default_value_t = 16000)]
    sample_rate: u32,

    #[arg(long, default_value_t = 1)]
    channels: u16,

    /// Audio per WebSocket frame
    #[arg(long, value_name = "MS", default_value_t = 100)]
    chunk_ms: u32,

    /// Send as fast as possible instead of in real time
    #[arg(long)]
    no_pace: bool,

    #[arg(long)]
    detect_thoughts: bool,

    #[arg(long)]
    single_utterance: bool,

    /// Put the API key in the WebSocket URL instead of fetching a streaming token
    #[arg(long)]
    legacy_auth: bool,

    /// Print every server message as a JSON line instead of transcript text
    #[arg(long)]
    json: bool,

    /// Seconds to wait for the server after end-of-stream
    #[arg(long, value_name = "SECONDS", default_value_t = 10)]
    linger: u64,
}

impl Args {
    fn format(&self) -> PcmFormat {
        PcmFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    // --- 3. Load Audio ---
    let format = args.format();
    let audio = audio::load_pcm(&args.file, format)
        .await
        .context("Failed to load audio")?;
    info!(
        file = %args.file.display(),
        duration = ?format.duration_of(audio.len()),
        "audio loaded"
    );

    // --- 4. Build Session ---
    let session_config = config
        .session_builder()
        .sample_rate(args.sample_rate)
        .channels(args.channels)
        .detect_thoughts(args.detect_thoughts)
        .single_utterance(args.single_utterance)
        .force_token(!args.legacy_auth)
        .build()
        .context("Invalid session configuration")?;
    let mut session = RealtimeSession::new(session_config);
    register_printers(session.events(), args.json);

    // --- 5. Stream ---
    session
        .scoped(|handle| stream_audio(handle, audio, &args))
        .await
}

fn register_printers(events: &EventRegistry, json: bool) {
    events
        .on_open(|| {
            info!("session open");
            Ok(())
        })
        .on_error(|err| {
            match err {
                Error::ConnectionClosed { code, reason } => {
                    info!(code = ?code, reason = ?reason, "server ended the stream")
                }
                Error::ServerReported(msg) => warn!(message = %msg, "server reported an error"),
                other => error!(error = %other, "session error"),
            }
            Ok(())
        })
        .on_close(|| {
            info!("session closed");
            Ok(())
        });

    if json {
        return;
    }
    events
        .on_partial(|text| {
            println!("~ {text}");
            Ok(())
        })
        .on_final(|text| {
            println!("{text}");
            Ok(())
        })
        .on_thought(|text| {
            println!("[thought] {text}");
            Ok(())
        });
}

async fn stream_audio(handle: SessionHandle, audio: Vec<u8>, args: &Args) -> anyhow::Result<()> {
    let format = args.format();
    let consumer = tokio::spawn(drain(handle.messages(), args.json));

    let mut sent = 0usize;
    for piece in audio.chunks(format.chunk_bytes(args.chunk_ms)) {
        tokio::select! {
            result = handle.send_bytes(piece) => result.context("Failed to send audio")?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, ending the stream early");
                break;
            }
        }
        sent += piece.len();
        if !args.no_pace {
            tokio::time::sleep(format.duration_of(piece.len())).await;
        }
    }

    handle
        .send_eos()
        .await
        .context("Failed to send end-of-stream")?;
    info!(
        sent = ?format.duration_of(sent),
        "audio sent, waiting for final transcripts"
    );

    match tokio::time::timeout(Duration::from_secs(args.linger), consumer).await {
        Ok(Ok(count)) => info!(messages = count, "server finished"),
        Ok(Err(e)) => warn!(error = %e, "message consumer failed"),
        Err(_) => info!(linger = args.linger, "stopped waiting for the server"),
    }
    Ok(())
}

async fn drain(mut messages: MessageStream, json: bool) -> usize {
    let mut count = 0;
    while let Some(msg) = messages.next().await {
        count += 1;
        if json {
            println!("{msg}");
        }
    }
    count
}
