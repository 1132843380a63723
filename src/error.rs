//! Error types for sidwatch.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SidwatchError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Acquisition errors (fatal to the run)
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio format not supported: {message}")]
    AudioFormat { message: String },

    #[error("Audio acquisition failed: {message}")]
    Acquisition { message: String },

    #[error("Audio overrun: {dropped_blocks} block(s) lost before they could be read")]
    AudioOverrun { dropped_blocks: u64 },

    // Channel bank construction errors
    #[error("Invalid filter configuration for channel {channel}: {message}")]
    FilterConfig { channel: String, message: String },

    // Pipeline errors
    #[error("Pipeline station {station} failed: {message}")]
    Station { station: String, message: String },

    // Persistence errors
    #[error("Storage error at {path}: {message}")]
    Storage { path: String, message: String },

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl SidwatchError {
    /// True for errors raised by the audio input side. These end the run.
    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            SidwatchError::AudioDeviceNotFound { .. }
                | SidwatchError::AudioFormat { .. }
                | SidwatchError::Acquisition { .. }
                | SidwatchError::AudioOverrun { .. }
        )
    }

    /// Suggestion printed alongside an error that ended a run.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            SidwatchError::AudioOverrun { .. } => {
                Some("the pipeline fell behind the sound card; try a larger audio.chunk_ms")
            }
            SidwatchError::FilterConfig { .. } => {
                Some("every channel must lie below half the sample rate")
            }
            e if e.is_acquisition() => {
                Some("check the input with `sidwatch devices` or replay a recording with --wav")
            }
            _ => None,
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, SidwatchError>;
