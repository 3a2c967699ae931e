//! Audio Player (serene-ap) - Main entry point
//!
//! Headless player for one generated session: loads the PCM payload, starts
//! playback and takes transport commands on stdin while printing progress.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serene_ap::audio::{CpalOutput, EncodedPayload, OutputDevice, VirtualOutput};
use serene_ap::playback::{EngineSettings, LoadOutcome};
use serene_ap::PlaybackEngine;
use serene_common::config::TomlConfig;
use serene_common::events::PlayerEvent;
use serene_common::human_time::{format_clock, format_progress};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

mod commands;

use commands::Command;

/// Command-line arguments for serene-ap
#[derive(Parser, Debug)]
#[command(name = "serene-ap")]
#[command(about = "Headless player for Serene session audio")]
#[command(version)]
struct Args {
    /// Session audio: raw 16-bit little-endian PCM (base64 text with --base64)
    #[arg(short, long, env = "SERENE_INPUT", required_unless_present = "list_devices")]
    input: Option<PathBuf>,

    /// Input file holds base64 text instead of raw bytes
    #[arg(long)]
    base64: bool,

    /// Config file (overrides SERENE_CONFIG and the platform default)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Initial volume 0.0-1.0 (overrides playback.initial_volume)
    #[arg(long)]
    volume: Option<f32>,

    /// Start position in seconds
    #[arg(long)]
    start: Option<f64>,

    /// Play through the silent software device instead of a sound card
    #[arg(long)]
    null_output: bool,

    /// Output device name (overrides output.device)
    #[arg(short, long, env = "SERENE_DEVICE")]
    device: Option<String>,

    /// Log level when RUST_LOG is unset (overrides logging.level)
    #[arg(long)]
    log_level: Option<String>,

    /// Print every player event as a JSON line instead of progress text
    #[arg(long)]
    json_events: bool,

    /// List audio output device names and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing; the filter is swapped once the config file is known
    let rust_log_set = std::env::var("RUST_LOG").is_ok();
    let initial_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_deref().unwrap_or("info")));
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.list_devices {
        for name in CpalOutput::list_devices().context("Failed to list audio devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    info!(
        "Starting Serene audio player (git {}, built {}, {})",
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let (config, source) = TomlConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    info!("Configuration source: {:?}", source);

    if !rust_log_set && args.log_level.is_none() {
        if let Err(e) = filter_handle.reload(EnvFilter::new(&config.logging.level)) {
            warn!("Could not apply logging.level '{}': {}", config.logging.level, e);
        }
    }

    let settings = EngineSettings::from(&config.playback);

    let device: Arc<dyn OutputDevice> = if args.null_output {
        info!("Using software output (no sound)");
        Arc::new(VirtualOutput::new())
    } else {
        let name = args.device.as_deref().or(config.output.device.as_deref());
        let output = CpalOutput::open(name, config.output.buffer_size, settings.format)
            .context("Failed to open audio output (use --null-output to play silently)")?;
        Arc::new(output)
    };

    let input = args
        .input
        .as_deref()
        .context("No input file given (--input or SERENE_INPUT)")?;

    let engine = PlaybackEngine::new(device, settings);
    let mut events = engine.subscribe_events();

    let payload = EncodedPayload::from_file(input, args.base64)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let outcome = engine
        .load(payload)
        .await
        .context("Failed to load session audio")?;
    if let LoadOutcome::Ready { duration_seconds } = outcome {
        println!("loaded {} of audio", format_clock(duration_seconds));
    }

    if let Some(volume) = args.volume {
        engine.set_volume(volume).await;
    }
    if let Some(start) = args.start {
        engine.seek(start).await;
    }
    engine.play().await;
    println!("{}", commands::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match Command::parse(&line) {
                    Some(Command::Quit) => break,
                    Some(command) => command.apply(&engine).await,
                    None if line.trim().is_empty() => {}
                    None => println!("{}", commands::HELP),
                },
                Ok(None) => {
                    debug!("stdin closed, continuing playback");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },

            event = events.recv() => match event {
                Ok(event) if args.json_events => {
                    match event.to_json_line() {
                        Ok(line) => println!("{}", line),
                        Err(e) => warn!("Failed to serialize {} event: {}", event.event_type(), e),
                    }
                    if matches!(event, PlayerEvent::PlaybackCompleted { .. }) {
                        break;
                    }
                }
                Ok(PlayerEvent::PlaybackProgress { position_seconds, duration_seconds, .. }) => {
                    println!("{}", format_progress(position_seconds, duration_seconds));
                }
                Ok(PlayerEvent::PlaybackCompleted { duration_seconds, .. }) => {
                    println!("{}", format_progress(duration_seconds, duration_seconds));
                    info!("Session finished");
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Event receiver lagged, skipped {} event(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.shutdown().await;
    info!("Player shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
