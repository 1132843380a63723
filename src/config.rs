use crate::defaults;
use crate::error::{Result, SidwatchError};
use crate::processing::{ChannelSpec, validate_channel_name};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub observatory: ObservatoryConfig,
    pub audio: AudioConfig,
    pub processing: ProcessingConfig,
    pub data: DataConfig,
    pub pipeline: PipelineConfig,
    pub channels: Vec<ChannelConfig>,
}

/// Station identity, copied into every day's metadata sidecar
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ObservatoryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_ms: u32,
}

/// Feature and detector configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessingConfig {
    pub window_seconds: f64,
    pub step_seconds: f64,
    pub sensitivity: f64,
    pub reset_on_fire: bool,
    pub filter_order: usize,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    pub path: PathBuf,
}

/// How the processing stages are driven
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: PipelineMode,
    pub queue_depth: usize,
    pub backpressure: Backpressure,
}

/// Pipeline execution mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// One thread per stage, bounded queues in between.
    Staged,
    /// All stages run synchronously in the acquisition loop.
    Inline,
}

/// What acquisition does when the first stage queue is full
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// Wait for room; slow storage eventually stalls the device read.
    Block,
    /// Discard the chunk and count it.
    DropNewest,
}

/// One `[[channels]]` entry. Missing fields may be filled from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freq: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bw: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>, freq: f64, bw: f64) -> Self {
        Self {
            name: name.into(),
            freq: Some(freq),
            bw: Some(bw),
            location: None,
        }
    }
}

/// Global transmitter catalog (`[[transmitters]]`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TransmitterCatalog {
    pub transmitters: Vec<ChannelConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            observatory: ObservatoryConfig::default(),
            audio: AudioConfig::default(),
            processing: ProcessingConfig::default(),
            data: DataConfig::default(),
            pipeline: PipelineConfig::default(),
            // GQD22 fits below Nyquist at the default 48 kHz rate.
            channels: vec![ChannelConfig::new("GQD22", 22000.0, 40.0)],
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNEL_COUNT,
            chunk_ms: defaults::CHUNK_MS,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            window_seconds: defaults::WINDOW_SECONDS,
            step_seconds: defaults::STEP_SECONDS,
            sensitivity: defaults::SENSITIVITY,
            reset_on_fire: false,
            filter_order: defaults::FILTER_ORDER,
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(defaults::DATA_PATH),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::Staged,
            queue_depth: defaults::QUEUE_DEPTH,
            backpressure: Backpressure::Block,
        }
    }
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SidwatchError::ConfigFileNotFound {
                path: path.display().to_string(),
            }
        } else {
            SidwatchError::Io(e)
        }
    })?;
    Ok(toml::from_str(&contents)?)
}

fn invalid(key: &str, message: impl Into<String>) -> SidwatchError {
    SidwatchError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

impl TransmitterCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        read_toml(path)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values. A file without `[[channels]]`
    /// keeps the default channel list.
    pub fn load(path: &Path) -> Result<Self> {
        read_toml(path)
    }

    /// Load configuration and fill channel fields from a transmitter catalog
    ///
    /// Catalog entries are matched by name; values set in the observatory file win.
    pub fn load_with_catalog(path: &Path, catalog: &Path) -> Result<Self> {
        let config = Self::load(path)?;
        let catalog = TransmitterCatalog::load(catalog)?;
        Ok(config.merged_with(&catalog))
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(SidwatchError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Fill unset channel fields from `catalog`
    pub fn merged_with(mut self, catalog: &TransmitterCatalog) -> Self {
        let lookup: HashMap<&str, &ChannelConfig> = catalog
            .transmitters
            .iter()
            .map(|t| (t.name.as_str(), t))
            .collect();

        for channel in &mut self.channels {
            if let Some(tx) = lookup.get(channel.name.as_str()) {
                channel.freq = channel.freq.or(tx.freq);
                channel.bw = channel.bw.or(tx.bw);
                if channel.location.is_none() {
                    channel.location = tx.location.clone();
                }
            }
        }
        self
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - SIDWATCH_DATA → data.path
    /// - SIDWATCH_AUDIO_DEVICE → audio.device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("SIDWATCH_DATA")
            && !path.is_empty()
        {
            self.data.path = PathBuf::from(path);
        }

        if let Ok(device) = std::env::var("SIDWATCH_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/sidwatch/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sidwatch")
            .join("config.toml")
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SidwatchError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Samples per acquisition chunk
    pub fn chunk_samples(&self) -> usize {
        (u64::from(self.audio.sample_rate) * u64::from(self.audio.chunk_ms) / 1000) as usize
    }

    /// Samples per feature window
    pub fn window_samples(&self) -> usize {
        seconds_to_samples(self.processing.window_seconds, self.audio.sample_rate)
    }

    /// Samples per feature step
    pub fn step_samples(&self) -> usize {
        seconds_to_samples(self.processing.step_seconds, self.audio.sample_rate)
    }

    /// Resolve `[[channels]]` into channel specs
    ///
    /// Every entry needs a frequency and bandwidth, either inline or from the catalog.
    pub fn channel_specs(&self) -> Result<Vec<ChannelSpec>> {
        if self.channels.is_empty() {
            return Err(invalid("channels", "at least one channel must be configured"));
        }

        let mut seen = HashSet::new();
        self.channels
            .iter()
            .map(|c| {
                validate_channel_name(&c.name)?;
                if !seen.insert(c.name.as_str()) {
                    return Err(invalid(
                        "channels",
                        format!("channel name {} is used more than once", c.name),
                    ));
                }
                let missing = |key: &str| invalid(key, format!("missing for channel {}", c.name));
                let freq = c.freq.ok_or_else(|| missing("channels.freq"))?;
                let bw = c.bw.ok_or_else(|| missing("channels.bw"))?;
                Ok(ChannelSpec::new(c.name.clone(), freq, bw))
            })
            .collect()
    }

    /// Check numeric ranges and resolve channels
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be greater than 0"));
        }
        if self.audio.channels == 0 {
            return Err(invalid("audio.channels", "must be at least 1"));
        }
        if self.audio.chunk_ms == 0 || self.chunk_samples() == 0 {
            return Err(invalid("audio.chunk_ms", "chunk must hold at least one sample"));
        }
        let p = &self.processing;
        if !(p.sensitivity > 0.0 && p.sensitivity <= 1.0) {
            return Err(invalid(
                "processing.sensitivity",
                format!("must be in (0, 1], got {}", p.sensitivity),
            ));
        }
        if !p.window_seconds.is_finite() || self.window_samples() == 0 {
            return Err(invalid(
                "processing.window_seconds",
                "window must cover at least one sample",
            ));
        }
        if !p.step_seconds.is_finite() || p.step_seconds < 0.0 {
            return Err(invalid("processing.step_seconds", "must be a non-negative number"));
        }
        if p.filter_order == 0 {
            return Err(invalid("processing.filter_order", "must be at least 1"));
        }
        if self.pipeline.queue_depth == 0 {
            return Err(invalid("pipeline.queue_depth", "must be at least 1"));
        }
        self.channel_specs()?;
        Ok(())
    }
}

fn seconds_to_samples(seconds: f64, sample_rate: u32) -> usize {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds * f64::from(sample_rate)).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_sidwatch_env() {
        remove_env("SIDWATCH_DATA");
        remove_env("SIDWATCH_AUDIO_DEVICE");
    }

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.audio.device, None);
        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.audio.chunk_ms, 250);

        assert_eq!(config.processing.window_seconds, 5.0);
        assert_eq!(config.processing.step_seconds, 1.0);
        assert_eq!(config.processing.sensitivity, 0.8);
        assert!(!config.processing.reset_on_fire);
        assert_eq!(config.processing.filter_order, 6);

        assert_eq!(config.data.path, PathBuf::from("./data"));
        assert_eq!(config.pipeline.mode, PipelineMode::Staged);
        assert_eq!(config.pipeline.queue_depth, 8);
        assert_eq!(config.pipeline.backpressure, Backpressure::Block);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_sample_counts() {
        let config = Config::default();
        assert_eq!(config.chunk_samples(), 12000);
        assert_eq!(config.window_samples(), 240000);
        assert_eq!(config.step_samples(), 48000);
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_temp(
            r##"
            [observatory]
            code = "#999"
            location = "Testland"
            operator = "Unit Tester"
            latitude = -34.9
            longitude = -56.2

            [audio]
            device = "hw:1,0"
            sample_rate = 96000
            channels = 2
            chunk_ms = 500

            [processing]
            window_seconds = 10
            step_seconds = 2
            sensitivity = 0.5
            reset_on_fire = true

            [data]
            path = "/var/lib/sidwatch"

            [pipeline]
            mode = "inline"
            queue_depth = 4
            backpressure = "drop_newest"

            [[channels]]
            name = "DHO38"
            freq = 38300
            bw = 40

            [[channels]]
            name = "NAA"
            freq = 24000.0
            bw = 50.0
        "##,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.observatory.code.as_deref(), Some("#999"));
        assert_eq!(config.observatory.latitude, Some(-34.9));
        assert_eq!(config.audio.device.as_deref(), Some("hw:1,0"));
        assert_eq!(config.audio.sample_rate, 96000);
        assert_eq!(config.audio.channels, 2);
        assert_eq!(config.processing.window_seconds, 10.0);
        assert!(config.processing.reset_on_fire);
        assert_eq!(config.data.path, PathBuf::from("/var/lib/sidwatch"));
        assert_eq!(config.pipeline.mode, PipelineMode::Inline);
        assert_eq!(config.pipeline.backpressure, Backpressure::DropNewest);

        let specs = config.channel_specs().unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0], ChannelSpec::new("DHO38", 38300.0, 40.0));
        assert_eq!(specs[1].center_frequency, 24000.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_temp(
            r#"
            [processing]
            sensitivity = 0.3
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.processing.sensitivity, 0.3);
        assert_eq!(config.processing.window_seconds, 5.0);
        assert_eq!(config.audio, AudioConfig::default());
        assert_eq!(config.channels, Config::default().channels);
    }

    #[test]
    fn test_catalog_fills_missing_channel_fields() {
        let catalog = write_temp(
            r#"
            [[transmitters]]
            name = "TEST1"
            freq = 12345
            bw = 40
            location = "Nowhere"

            [[transmitters]]
            name = "UNUSED"
            freq = 20000
            bw = 40
        "#,
        );
        let obs = write_temp(
            r##"
            [observatory]
            code = "#999"

            [[channels]]
            name = "TEST1"

            [[channels]]
            name = "LOCAL"
            freq = 19800
            bw = 60
        "##,
        );

        let config = Config::load_with_catalog(obs.path(), catalog.path()).unwrap();

        assert_eq!(config.observatory.code.as_deref(), Some("#999"));
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[0].freq, Some(12345.0));
        assert_eq!(config.channels[0].bw, Some(40.0));
        assert_eq!(config.channels[0].location.as_deref(), Some("Nowhere"));
        assert_eq!(config.channels[1].freq, Some(19800.0));
    }

    #[test]
    fn test_observatory_values_override_catalog() {
        let catalog = TransmitterCatalog {
            transmitters: vec![ChannelConfig::new("NAA", 24000.0, 40.0)],
        };
        let config = Config {
            channels: vec![ChannelConfig {
                name: "NAA".to_string(),
                freq: None,
                bw: Some(100.0),
                location: None,
            }],
            ..Config::default()
        }
        .merged_with(&catalog);

        assert_eq!(config.channels[0].freq, Some(24000.0));
        assert_eq!(config.channels[0].bw, Some(100.0));
    }

    #[test]
    fn test_missing_catalog_file_is_an_error() {
        let obs = write_temp("[[channels]]\nname = \"A\"\n");
        let result = Config::load_with_catalog(obs.path(), Path::new("/nonexistent/tx.toml"));
        assert!(matches!(result, Err(SidwatchError::ConfigFileNotFound { .. })));
    }

    #[test]
    fn test_channel_without_frequency_fails_validation() {
        let config = Config {
            channels: vec![ChannelConfig {
                name: "UNKNOWN".to_string(),
                freq: None,
                bw: Some(40.0),
                location: None,
            }],
            ..Config::default()
        };
        match config.validate() {
            Err(SidwatchError::ConfigInvalidValue { key, .. }) => assert_eq!(key, "channels.freq"),
            other => panic!("Expected ConfigInvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.processing.sensitivity = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.processing.sensitivity = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.audio.chunk_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.audio.sample_rate = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.processing.window_seconds = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.queue_depth = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.channels.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_duplicate_and_unsafe_names() {
        let mut config = Config::default();
        config.channels = vec![
            ChannelConfig::new("A", 1000.0, 40.0),
            ChannelConfig::new("A", 2000.0, 40.0),
        ];
        assert!(config.validate().is_err());

        config.channels = vec![ChannelConfig::new("a/b", 1000.0, 40.0)];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_override_data_path() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_sidwatch_env();

        set_env("SIDWATCH_DATA", "/tmp/sid");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.data.path, PathBuf::from("/tmp/sid"));
        assert_eq!(config.audio.device, None);

        clear_sidwatch_env();
    }

    #[test]
    fn test_env_override_device() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_sidwatch_env();

        set_env("SIDWATCH_AUDIO_DEVICE", "hw:1,0");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.audio.device, Some("hw:1,0".to_string()));

        clear_sidwatch_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_sidwatch_env();

        set_env("SIDWATCH_DATA", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.data.path, PathBuf::from("./data"));

        clear_sidwatch_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_temp(
            r#"
            [audio
            device = "broken
        "#,
        );

        let result = Config::load(temp_file.path());
        assert!(matches!(result, Err(SidwatchError::Config(_))));
    }

    #[test]
    fn test_default_path_ends_with_sidwatch_config() {
        let path = Config::default_path();
        assert!(path.ends_with("sidwatch/config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_sidwatch_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_propagates_invalid_toml() {
        let temp_file = write_temp("[audio\n");
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = Config::default();
        config.observatory.code = Some("#281".to_string());
        config.pipeline.backpressure = Backpressure::DropNewest;

        let text = config.to_toml_string().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
