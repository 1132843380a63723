//! Command-line interface for sidwatch
//!
//! Provides argument parsing using clap derive macros.

use crate::storage::layout::is_day_name;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::{Duration, UNIX_EPOCH};

/// VLF receiver monitor for Sudden Ionospheric Disturbance detection
#[derive(Parser, Debug)]
#[command(name = "sidwatch", version, about)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Acquire audio and store signals, features and events
    Ingest(IngestArgs),

    /// List available audio input devices
    Devices,

    /// Summarise stored days
    Inspect {
        /// Store root (default: data.path from the configuration)
        #[arg(long, value_name = "DIR")]
        data: Option<PathBuf>,

        /// Day to inspect as YYYYMMDD (default: every stored day)
        #[arg(value_parser = parse_day)]
        day: Option<String>,
    },

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct IngestArgs {
    /// Store root (overrides data.path)
    #[arg(long, value_name = "DIR")]
    pub data: Option<PathBuf>,

    /// Audio input device name (overrides audio.device)
    #[arg(long, value_name = "NAME", conflicts_with = "wav")]
    pub device: Option<String>,

    /// Replay a WAV file instead of capturing from a device
    #[arg(long, value_name = "FILE")]
    pub wav: Option<PathBuf>,

    /// Transmitter catalog merged into [[channels]]
    #[arg(long, value_name = "FILE")]
    pub catalog: Option<PathBuf>,

    /// Start time of a replayed WAV file, RFC 3339 or epoch seconds (default: now)
    #[arg(long, value_name = "TIME", requires = "wav", value_parser = parse_epoch_seconds)]
    pub start: Option<f64>,

    /// Stop after this long. Examples: 90s, 30m, 1h30m
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Run all stages in one loop instead of one thread per stage
    #[arg(long)]
    pub inline: bool,
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the configuration file path
    Path,
    /// Print the resolved configuration as TOML
    Show,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Accept only `YYYYMMDD` day names, the form of a store day directory.
fn parse_day(s: &str) -> Result<String, String> {
    if is_day_name(s) {
        Ok(s.to_string())
    } else {
        Err(format!("expected a day as YYYYMMDD, got {:?}", s))
    }
}

/// Parse an RFC 3339 timestamp or bare epoch seconds into epoch seconds.
fn parse_epoch_seconds(s: &str) -> Result<f64, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<f64>() {
        return if secs.is_finite() {
            Ok(secs)
        } else {
            Err(format!("invalid timestamp: {}", s))
        };
    }
    let time = humantime::parse_rfc3339_weak(s).map_err(|e| e.to_string())?;
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .map_err(|_| format!("timestamp before 1970: {}", s))
}
