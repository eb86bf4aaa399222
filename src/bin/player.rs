//! Stem Player
//!
//! Loads the configured stems, plays the master mix on an output device and
//! takes transport and mixer commands from stdin.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stem_mixer::{
    audio::{list_output_devices, AudioOutput},
    clock::MonotonicClock,
    codec::SymphoniaLoader,
    config::AppConfig,
    protocol::{ControlMessage, EngineEvent},
    service::{EngineHandle, EngineService},
    transport::format_time,
    Engine,
};

const HELP: &str = "\
Commands:
  play | pause | toggle        transport
  seek <seconds>               jump to a position
  next | prev                  skip forward / back
  rate <x>                     playback rate (0.25 - 4)
  loop                         toggle looping
  mute <id> | solo <id>        toggle track mute / solo
  vol <id> <0-1>               track volume
  pan <id> <-1..1>             track pan
  master <0-1> | mastermute    master bus
  reset                        restore the initial session
  status                       print the engine state as JSON
  quit
Any line starting with '{' is parsed as a JSON control message.";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Stem Player");

    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(&PathBuf::from(path)).context("loading config")?,
        None => AppConfig::load_or_default().context("loading config")?,
    };

    println!("\n=== Available Output Devices ===");
    for device in list_output_devices() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
    }
    println!();

    let engine = Engine::from_config(&config, MonotonicClock::shared())?;
    let mixer = engine.mixer();
    let (handle, service) = EngineService::spawn(engine);

    let mut output = AudioOutput::new(
        config.output.device_id.as_deref(),
        config.output.sample_rate,
        config.output.buffer_size,
        mixer,
    )?;
    output.start()?;
    tracing::info!(
        "Output running at {}Hz, {} channels",
        output.sample_rate(),
        output.channels()
    );

    tokio::spawn(print_events(handle.subscribe()));

    let loader = Arc::new(SymphoniaLoader::new(config.asset_root()));
    let reports = handle.load_tracks(loader).await?;
    let loaded = reports.iter().filter(|r| r.is_ok()).count();
    println!("{}/{} stems loaded. Type 'help' for commands.", loaded, reports.len());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "quit" | "exit" => break,
            "help" => println!("{}", HELP),
            "status" => print_status(&handle).await?,
            _ => match parse_command(line) {
                Ok(message) => handle.send(message).await?,
                Err(e) => println!("{}", e),
            },
        }
        if let Some(e) = output.check_errors() {
            tracing::warn!("Output stream error: {}", e);
        }
    }

    handle.shutdown().await?;
    service.await?;
    output.stop();
    tracing::info!("Stem Player stopped");
    Ok(())
}

fn parse_command(line: &str) -> Result<ControlMessage> {
    if line.starts_with('{') {
        return serde_json::from_str(line).context("invalid JSON control message");
    }

    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    let number = |index: usize| -> Result<f64> {
        args.get(index)
            .with_context(|| format!("'{}' needs more arguments", command))?
            .parse::<f64>()
            .with_context(|| format!("'{}' expects a number", command))
    };
    let track = |index: usize| -> Result<u8> {
        args.get(index)
            .with_context(|| format!("'{}' needs a track id", command))?
            .parse::<u8>()
            .with_context(|| format!("'{}' expects a track id", command))
    };

    let message = match command {
        "play" => ControlMessage::Play,
        "pause" => ControlMessage::Pause,
        "toggle" => ControlMessage::TogglePlayback,
        "seek" => ControlMessage::Seek {
            position: number(0)?,
        },
        "next" => ControlMessage::SkipForward,
        "prev" => ControlMessage::SkipBackward,
        "rate" => ControlMessage::SetPlaybackRate { rate: number(0)? },
        "loop" => ControlMessage::ToggleLoop,
        "mute" => ControlMessage::ToggleMute {
            track_id: track(0)?,
        },
        "solo" => ControlMessage::ToggleSolo {
            track_id: track(0)?,
        },
        "vol" => ControlMessage::SetTrackVolume {
            track_id: track(0)?,
            volume: number(1)? as f32,
        },
        "pan" => ControlMessage::SetTrackPan {
            track_id: track(0)?,
            pan: number(1)? as f32,
        },
        "master" => ControlMessage::SetMasterVolume {
            volume: number(0)? as f32,
        },
        "mastermute" => ControlMessage::ToggleMasterMute,
        "reset" => ControlMessage::Reset,
        other => anyhow::bail!("unknown command '{}', try 'help'", other),
    };
    Ok(message)
}

async fn print_status(handle: &EngineHandle) -> Result<()> {
    let snapshot = handle.snapshot().await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    println!(
        "{} / {}",
        format_time(snapshot.position),
        format_time(snapshot.duration)
    );
    Ok(())
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<EngineEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("Event printer skipped {} events", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event {
            EngineEvent::Position { .. } => {}
            EngineEvent::StateChanged { playing, position } => println!(
                "{} at {}",
                if playing { "Playing" } else { "Paused" },
                format_time(position)
            ),
            EngineEvent::Seeked { position } => println!("Position {}", format_time(position)),
            EngineEvent::Looped { .. } => println!("Looped"),
            EngineEvent::Ended => println!("Reached the end"),
            EngineEvent::TrackLoaded { track_id, duration } => {
                println!("Track {} loaded ({})", track_id, format_time(duration))
            }
            EngineEvent::LoadFailed { track_id, error } => {
                println!("Track {} failed to load: {}", track_id, error)
            }
            EngineEvent::Ready { duration } => println!("Ready, {}", format_time(duration)),
            EngineEvent::TrackChanged(status) => println!(
                "{:<12} vol {:.2} pan {:+.2}{}{}",
                status.name,
                status.volume,
                status.pan,
                if status.muted { " [M]" } else { "" },
                if status.soloed { " [S]" } else { "" }
            ),
            other => match serde_json::to_string(&other) {
                Ok(json) => println!("{}", json),
                Err(e) => tracing::warn!("Unprintable event: {}", e),
            },
        }
    }
}
