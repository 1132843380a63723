//! Per-day metadata sidecar.

use crate::config::{Config, ObservatoryConfig};
use crate::processing::ChannelSpec;
use serde::{Deserialize, Serialize};

/// Static description of the station and its processing setup.
///
/// Written once per day as `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationMetadata {
    pub observatory: ObservatoryConfig,
    pub audio: AudioMetadata,
    pub processing: ProcessingMetadata,
    pub channels: Vec<ChannelSpec>,
    pub software: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    pub window_seconds: f64,
    pub step_seconds: f64,
    pub sensitivity: f64,
    pub reset_on_fire: bool,
    pub filter_order: usize,
}

impl StationMetadata {
    pub fn new(
        observatory: ObservatoryConfig,
        audio: AudioMetadata,
        processing: ProcessingMetadata,
        channels: Vec<ChannelSpec>,
    ) -> Self {
        Self {
            observatory,
            audio,
            processing,
            channels,
            software: format!("sidwatch {}", crate::version_string()),
        }
    }

    /// Snapshot of a validated configuration.
    pub fn from_config(config: &Config, channels: Vec<ChannelSpec>) -> Self {
        Self::new(
            config.observatory.clone(),
            AudioMetadata {
                device: config.audio.device.clone(),
                sample_rate: config.audio.sample_rate,
                channels: config.audio.channels,
                chunk_ms: config.audio.chunk_ms,
            },
            ProcessingMetadata {
                window_seconds: config.processing.window_seconds,
                step_seconds: config.processing.step_seconds,
                sensitivity: config.processing.sensitivity,
                reset_on_fire: config.processing.reset_on_fire,
                filter_order: config.processing.filter_order,
            },
            channels,
        )
    }
}
