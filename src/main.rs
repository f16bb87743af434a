use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use callstream::{CaptureSource, Config, NullSink, SessionEvent, VoiceSession, WavFileSource};

#[derive(Parser)]
#[command(name = "callstream", about = "Real-time voice streaming client")]
struct Cli {
    /// Path to the configuration file (without extension)
    #[arg(long, default_value = "config/callstream")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream a WAV file as the microphone into the configured endpoint
    Stream {
        /// WAV file to stream
        #[arg(long)]
        input: String,

        /// Override the websocket endpoint from the config file
        #[arg(long)]
        url: Option<String>,

        /// Override the caller identity
        #[arg(long)]
        from: Option<String>,

        /// Override the target identity
        #[arg(long)]
        to: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Stream {
            input,
            url,
            from,
            to,
        } => {
            let mut session_config = config.session_config();
            if let Some(url) = url {
                session_config.transport.url = url;
            }
            if let Some(from) = from {
                session_config.peer.from = from;
            }
            if let Some(to) = to {
                session_config.peer.to = to;
            }

            let source = WavFileSource::open(&input)?;
            session_config.capture.native_rate = source.sample_rate();

            let session = VoiceSession::new(session_config, Box::new(source), Arc::new(NullSink));
            let mut events = session.subscribe_events();

            session.start().await?;
            session.arm_streaming();

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupted, stopping session");
                        break;
                    }
                    event = events.recv() => {
                        match event {
                            Ok(SessionEvent::State(state)) => info!("state: {:?}", state),
                            Ok(SessionEvent::Turn(turn)) => info!("turn: {:?}", turn),
                            Ok(SessionEvent::ReconnectScheduled { attempt, delay }) => {
                                info!("reconnecting (attempt {}) in {:?}", attempt, delay);
                            }
                            Ok(SessionEvent::Degraded(reason)) => info!("degraded: {}", reason),
                            Ok(SessionEvent::ProtocolError(message)) => info!("peer error: {}", message),
                            Ok(SessionEvent::Terminal(reason)) => {
                                info!("terminal: {}", reason);
                                break;
                            }
                            Err(_) => break,
                        }
                    }
                }
            }

            session.stop().await?;
            let stats = session.stats().await;
            info!(
                "Session finished: {} frames sent, {} dropped, {} chunks played",
                stats.frames_sent, stats.frames_dropped, stats.chunks_played
            );
        }
    }

    Ok(())
}
