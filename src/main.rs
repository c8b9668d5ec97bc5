//! ClawVoice demo binary: run a voice conversation from the terminal.
//!
//! Connects to the configured speech-to-speech service, wires the local
//! microphone and speaker (requires `--features device-cpal`), registers
//! the reference clock action, and prints transcripts until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use clawvoice::{
    ActionRegistry, ClockAction, Config, Session, SessionEvent, WsTransport,
};

#[derive(Parser)]
#[command(name = "clawvoice", version, about = "Full-duplex realtime voice conversations")]
struct Cli {
    /// Path to the config file (defaults to the platform config dir).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// WebSocket URL of the speech-to-speech service (overrides config).
    #[arg(long)]
    url: Option<String>,

    /// Bearer token (overrides config and CLAWVOICE_TOKEN).
    #[arg(long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("loading config")?;
    if let Some(url) = cli.url {
        config.transport.url = url;
    }
    if let Some(token) = cli.token {
        config.transport.token = Some(token);
    } else if config.transport.token.is_none() {
        config.transport.token = std::env::var("CLAWVOICE_TOKEN").ok();
    }

    let (source, sink) = open_devices(&config)?;

    let mut registry = ActionRegistry::new();
    registry.register(Arc::new(ClockAction));

    let transport = WsTransport::connect(&config.transport.url, config.transport.token.as_deref())
        .await
        .context("connecting to speech service")?;

    let handle = Session::start(config, source, sink, Arc::new(transport), registry);
    println!("Voice session running. Start speaking! Press Ctrl-C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping...");
                handle.stop();
                handle.closed().await;
                break;
            }
            event = handle.next_event() => match event {
                Some(SessionEvent::InputTranscript(text)) => println!("you: {text}"),
                Some(SessionEvent::OutputTranscript(text)) => println!("agent: {text}"),
                Some(SessionEvent::ActionStarted { name, .. }) => println!("[action: {name}]"),
                Some(SessionEvent::Ended { reason }) => {
                    println!("Session ended: {reason}");
                    break;
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    Ok(())
}

#[cfg(feature = "device-cpal")]
fn open_devices(
    config: &Config,
) -> anyhow::Result<(Box<dyn clawvoice::AudioSource>, Box<dyn clawvoice::AudioSink>)> {
    use clawvoice::audio::device::{CpalSink, CpalSource};

    let source = CpalSource::open(&config.audio).context("opening input device")?;
    let sink = CpalSink::open(&config.audio).context("opening output device")?;
    Ok((Box::new(source), Box::new(sink)))
}

#[cfg(not(feature = "device-cpal"))]
fn open_devices(
    _config: &Config,
) -> anyhow::Result<(Box<dyn clawvoice::AudioSource>, Box<dyn clawvoice::AudioSink>)> {
    anyhow::bail!(
        "this build has no audio device backend. \
         Rebuild with `cargo build --features device-cpal`."
    )
}
