use anyhow::{Context, Result};
use clap::Parser;
use loqa_voice::{
    CaptureSource, Config, DeviceFactory, PlaybackSink, SessionState, VoiceSession,
    WebSocketConnector,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Duplex voice client: streams the microphone out and plays speech back
#[derive(Parser, Debug)]
#[command(name = "loqa-voice", version)]
struct Args {
    /// Config file (extension optional)
    #[arg(long, default_value = "config/loqa-voice")]
    config: String,

    /// Override the remote endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// Stream this WAV file instead of the microphone
    #[arg(long)]
    input: Option<String>,

    /// Write received speech to this WAV file instead of the speaker
    #[arg(long)]
    output: Option<String>,

    /// Connect and play back only
    #[arg(long)]
    no_capture: bool,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.service.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(endpoint) = args.endpoint {
        cfg.transport.endpoint = endpoint;
    }
    if let Some(input) = &args.input {
        cfg.capture.source = CaptureSource::File { path: input.into() };
    }
    if let Some(output) = &args.output {
        cfg.playback.sink = PlaybackSink::File {
            path: output.into(),
        };
    }

    if let CaptureSource::File { path } = &mut cfg.capture.source {
        let expanded = expand(&path.to_string_lossy());
        *path = expanded;
    }
    if let PlaybackSink::File { path } = &mut cfg.playback.sink {
        let expanded = expand(&path.to_string_lossy());
        *path = expanded;
    }

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Endpoint: {}", cfg.transport.endpoint);

    let capture = DeviceFactory::capture(&cfg.capture.source)
        .context("Failed to create capture device")?;
    let playback = DeviceFactory::playback(&cfg.playback.sink, cfg.playback.sample_rate)
        .context("Failed to create playback device")?;
    let connector = Arc::new(WebSocketConnector::new(cfg.transport.queue_frames));

    let session = VoiceSession::start(cfg.session_config(), connector, capture, playback);
    let autostart = cfg.capture.autostart && !args.no_capture;

    let mut state = session.watch_state();
    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let terminal = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break None;
            }
            _ = &mut deadline => {
                info!("Duration elapsed, shutting down");
                break None;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break None;
                }

                let current = *state.borrow_and_update();
                match current {
                    SessionState::Idle if autostart => {
                        if let Err(e) = session.start_capture() {
                            warn!("Capture unavailable: {}", e);
                        }
                    }
                    SessionState::Disconnected => break session.closed().await,
                    _ => {}
                }
            }
        }
    };

    let stats = session.dispose().await;
    match &stats {
        Ok(stats) => println!("{}", serde_json::to_string_pretty(stats)?),
        Err(e) => error!("Failed to release session resources: {}", e),
    }

    if let Some(e) = terminal {
        error!("Session ended: {}", e);
        return Err(e.into());
    }

    stats.map(|_| ()).map_err(Into::into)
}
