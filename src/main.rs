use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use sidwatch::audio::{Clock, SystemClock, WavFileSource};
use sidwatch::cli::{Cli, Commands, ConfigAction, IngestArgs};
use sidwatch::config::{Config, PipelineMode, TransmitterCatalog};
use sidwatch::pipeline::{Pipeline, PipelineHandle, PipelineSummary};
use sidwatch::SidwatchError;
use sidwatch::storage::StoreReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// How often `ingest` checks for Ctrl-C, the deadline, and pipeline exit.
const SUPERVISE_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    #[cfg(feature = "cpal-audio")]
    sidwatch::audio::suppress_audio_warnings();

    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Ingest(args) => run_ingest(cli.config.as_deref(), args)?,
        Commands::Devices => list_audio_devices()?,
        Commands::Inspect { data, day } => run_inspect(cli.config.as_deref(), data, day)?,
        Commands::Config { action } => handle_config_command(action, cli.config.as_deref())?,
    }

    Ok(())
}

/// Log to stderr, honouring `RUST_LOG` when set.
fn init_logging(quiet: bool, verbose: u8) {
    let default = match (quiet, verbose) {
        (true, _) => "sidwatch=warn",
        (false, 0) => "sidwatch=info",
        (false, 1) => "sidwatch=debug",
        (false, _) => "sidwatch=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/sidwatch/config.toml)
/// 3. Built-in defaults
///
/// Environment variable overrides are applied last.
fn load_config(custom_path: Option<&Path>, catalog: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    let config = match catalog {
        Some(path) => config.merged_with(&TransmitterCatalog::load(path)?),
        None => config,
    };
    Ok(config.with_env_overrides())
}

fn run_ingest(custom_path: Option<&Path>, args: IngestArgs) -> Result<()> {
    let mut config = load_config(custom_path, args.catalog.as_deref())?;
    if let Some(data) = args.data {
        config.data.path = data;
    }
    if let Some(device) = args.device {
        config.audio.device = Some(device);
    }
    if args.inline {
        config.pipeline.mode = PipelineMode::Inline;
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("failed to install Ctrl-C handler")?;

    let handle = match args.wav {
        Some(path) => {
            let start = args.start.unwrap_or_else(|| SystemClock.now());
            let source = WavFileSource::open(&path, start).map_err(with_hint)?;
            // Filters are designed for the rate the file was recorded at.
            config.audio.sample_rate = source.spec().sample_rate;
            Pipeline::new(&config)
                .and_then(|pipeline| pipeline.start(source))
                .map_err(with_hint)?
        }
        None => start_capture(&config).map_err(with_hint)?,
    };

    eprintln!(
        "{} storing to {} ({} channel(s), {:?} mode)",
        "sidwatch".bold(),
        config.data.path.display(),
        config.channels.len(),
        config.pipeline.mode
    );

    let summary = supervise(handle, &interrupted, args.duration).map_err(with_hint)?;
    print_run_summary(&summary);
    Ok(())
}

#[cfg(feature = "cpal-audio")]
fn start_capture(config: &Config) -> sidwatch::Result<PipelineHandle> {
    let pipeline = Pipeline::new(config)?;
    let source = sidwatch::audio::CpalAudioSource::new(
        config.audio.device.as_deref(),
        config.audio.sample_rate,
        config.audio.channels,
    )?;
    tracing::info!(device = %source.device_name(), "capture device opened");
    pipeline.start(source)
}

#[cfg(not(feature = "cpal-audio"))]
fn start_capture(_config: &Config) -> sidwatch::Result<PipelineHandle> {
    Err(SidwatchError::Acquisition {
        message: "built without audio capture support".to_string(),
    })
}

/// Attach the error's suggestion, if it has one.
fn with_hint(error: SidwatchError) -> anyhow::Error {
    match error.hint() {
        Some(hint) => anyhow::Error::new(error).context(hint),
        None => error.into(),
    }
}

/// Wait for the pipeline to end, stopping it on Ctrl-C or after `duration`.
fn supervise(
    handle: PipelineHandle,
    interrupted: &AtomicBool,
    duration: Option<Duration>,
) -> sidwatch::Result<PipelineSummary> {
    let deadline = duration.map(|d| Instant::now() + d);
    while !handle.is_finished() {
        if interrupted.load(Ordering::SeqCst) {
            tracing::info!("interrupted, draining queued chunks");
            return handle.stop();
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::info!("duration reached");
            return handle.stop();
        }
        thread::sleep(SUPERVISE_INTERVAL);
    }
    handle.wait()
}

fn print_run_summary(summary: &PipelineSummary) {
    println!("chunks acquired: {}", summary.chunks_acquired);
    println!("chunks stored:   {}", summary.chunks_stored);
    if summary.chunks_dropped > 0 {
        println!("chunks dropped:  {}", summary.chunks_dropped.yellow());
    }
    println!("feature records: {}", summary.feature_records);
    if summary.events > 0 {
        println!("SID candidates:  {}", summary.events.green().bold());
    } else {
        println!("SID candidates:  0");
    }
}

/// List available audio input devices.
#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    let devices = sidwatch::audio::list_devices()?;

    if devices.is_empty() {
        eprintln!("No audio input devices found");
        std::process::exit(1);
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        let marker = if device.is_default { " (default)" } else { "" };
        match device.nyquist_hz() {
            Some(nyquist) => println!(
                "  [{}] {}{}  up to {} Hz, channels below {} Hz",
                idx,
                device.name.bold(),
                marker,
                device.max_sample_rate.unwrap_or_default(),
                nyquist
            ),
            None => println!("  [{}] {}{}", idx, device.name.bold(), marker),
        }
    }

    Ok(())
}

#[cfg(not(feature = "cpal-audio"))]
fn list_audio_devices() -> Result<()> {
    anyhow::bail!("built without audio capture support")
}

fn run_inspect(
    custom_path: Option<&Path>,
    data: Option<PathBuf>,
    day: Option<String>,
) -> Result<()> {
    let root = match data {
        Some(path) => path,
        None => load_config(custom_path, None)?.data.path,
    };
    let reader = StoreReader::new(&root);
    let days = match day {
        Some(day) => vec![day],
        None => reader.days()?,
    };
    if days.is_empty() {
        println!("No data under {}", root.display());
        return Ok(());
    }

    for day in days {
        let summary = reader
            .summary(&day)
            .with_context(|| format!("failed to read day {}", day))?;
        println!("{}", summary.day.bold());
        println!("  channels: {}", summary.channels.join(", "));
        println!("  signals:  {}", summary.signal_rows);
        println!("  features: {}", summary.feature_rows);
        if summary.event_rows > 0 {
            println!("  events:   {}", summary.event_rows.green());
        } else {
            println!("  events:   0");
        }
        if !summary.has_metadata {
            println!("  {}", "metadata.json missing".yellow());
        }
    }
    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Path => {
            let path = custom_path
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
        ConfigAction::Show => {
            let config = load_config(custom_path, None)?;
            print!("{}", config.to_toml_string()?);
        }
    }
    Ok(())
}
