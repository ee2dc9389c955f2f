use anyhow::{bail, Context, Result};
use ccsync::source::{FfmpegOpener, MediaOpener, SyntheticOpener, SyntheticSpec};
use ccsync::utils::config::SinkKind;
use ccsync::{Config, CoreEvent, PlaybackCore, PlaybackSnapshot};
use clap::{ArgAction, Parser};
use env_logger::Env;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Presenter pull cadence, roughly one 60 Hz refresh
const RENDER_INTERVAL: Duration = Duration::from_millis(16);

/// ccsync - headless audio/video sync driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Media file to play
    #[arg(value_name = "FILE", required_unless_present = "synthetic")]
    file: Option<PathBuf>,

    /// Play a generated test clip of this many seconds instead of a file
    #[arg(long, value_name = "SECONDS")]
    synthetic: Option<f64>,

    /// Initial volume (0-100)
    #[arg(short, long, value_name = "VOLUME")]
    volume: Option<u8>,

    /// Playback speed (0.25-2.0)
    #[arg(short, long, value_name = "SPEED")]
    speed: Option<f64>,

    /// Seek to this position before playing
    #[arg(long, value_name = "SECONDS")]
    seek: Option<f64>,

    /// Ignore the audio stream
    #[arg(long = "no-audio", action = ArgAction::SetFalse)]
    audio: bool,

    /// Pace audio in real time without an output device
    #[arg(long)]
    null_audio: bool,

    /// Configuration file to use instead of the default locations
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print status lines as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ccsync::utils::load_config().context("failed to load configuration")?,
    };
    apply_overrides(&mut config, &args);
    config.validate().context("invalid configuration")?;

    // Initialize logging
    let log_level = if args.debug { "debug" } else { config.general.log_level.as_str() };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("Starting ccsync v{}", env!("CARGO_PKG_VERSION"));

    let (opener, path): (Arc<dyn MediaOpener>, PathBuf) = match (args.synthetic, &args.file) {
        (Some(seconds), _) => {
            info!("Generating a {:.1}s synthetic clip", seconds);
            (
                Arc::new(SyntheticOpener::new(SyntheticSpec::with_duration(seconds))),
                PathBuf::from("synthetic"),
            )
        }
        (None, Some(file)) => (Arc::new(FfmpegOpener::new()), file.clone()),
        (None, None) => bail!("no media given"),
    };

    let core = PlaybackCore::new(config, opener)?;
    let result = drive(&core, &args, path).await;

    tokio::task::spawn_blocking(move || drop(core))
        .await
        .context("playback core teardown failed")?;

    info!("ccsync shutting down");
    result
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(volume) = args.volume {
        config.audio.volume = f32::from(volume.min(100)) / 100.0;
    }
    if let Some(speed) = args.speed {
        config.playback.speed = speed;
    }
    if !args.audio {
        config.audio.enabled = false;
    }
    if args.null_audio {
        config.audio.sink = SinkKind::Clocked;
    }
    if args.debug {
        config.general.log_level = "debug".to_string();
    }
}

/// Feed the presenter and report status until the media ends or ctrl-c
async fn drive(core: &PlaybackCore, args: &Args, path: PathBuf) -> Result<()> {
    let events = core.events();
    core.open(&path);

    let mut render = tokio::time::interval(RENDER_INTERVAL);
    let mut status = tokio::time::interval(Duration::from_secs(1));
    let mut presented: u64 = 0;

    loop {
        tokio::select! {
            _ = render.tick() => {
                if let Some(frame) = core.get_frame_for_render() {
                    presented += 1;
                    debug!("Presenting {}x{} frame at {:.3}s", frame.width(), frame.height(), frame.pts());
                }

                while let Ok(event) = events.try_recv() {
                    if handle_event(core, args, event)? {
                        info!("Presented {} frames", presented);
                        return Ok(());
                    }
                }
            }
            _ = status.tick() => {
                print_status(&core.snapshot(), args.json)?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
        }
    }
}

/// Log one core event; returns true when playback is finished
fn handle_event(core: &PlaybackCore, args: &Args, event: CoreEvent) -> Result<bool> {
    match event {
        CoreEvent::MediaOpened(info) => {
            info!("Opened media:\n{}", info);
            if let Some(target) = args.seek {
                core.seek(target);
            }
            core.play();
        }
        CoreEvent::OpenFailed { path, message } => {
            error!("Failed to open {}: {}", path.display(), message);
            bail!("could not open {}", path.display());
        }
        CoreEvent::StateChanged { from, to } => {
            info!("State changed: {} -> {}", from, to);
        }
        CoreEvent::SeekCompleted { target } => {
            info!("Seeked to {:.3}s", target);
        }
        CoreEvent::SeekFailed { target, message } => {
            warn!("Seek to {:.3}s failed: {}", target, message);
        }
        CoreEvent::CommandDropped(command) => {
            warn!("Command dropped: {}", command);
        }
        CoreEvent::EndOfMedia => {
            info!("End of media");
            print_status(&core.snapshot(), args.json)?;
            return Ok(true);
        }
    }
    Ok(false)
}

fn print_status(snapshot: &PlaybackSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
    } else {
        println!("{}", snapshot);
    }
    Ok(())
}
