//! Default configuration constants for sidwatch.
//!
//! Shared by the config layer and the processing components so the two never
//! drift apart.

/// Default capture sample rate in Hz.
///
/// 48 kHz covers transmitters up to 24 kHz. Stations monitoring the upper VLF
/// band (e.g. DHO38 at 23.4 kHz and above) need a 96 kHz card.
pub const SAMPLE_RATE: u32 = 48000;

/// Default number of interleaved input channels requested from the device.
pub const CHANNEL_COUNT: u16 = 1;

/// Default chunk duration in milliseconds.
pub const CHUNK_MS: u32 = 250;

/// Default feature window length in seconds.
pub const WINDOW_SECONDS: f64 = 5.0;

/// Default feature step in seconds (advisory, extraction runs once per chunk).
pub const STEP_SECONDS: f64 = 1.0;

/// Default detector sensitivity in (0, 1].
pub const SENSITIVITY: f64 = 0.8;

/// CUSUM slack `k`, subtracted from every increment.
pub const CUSUM_SLACK: f64 = 0.01;

/// CUSUM threshold per unit of sensitivity: `h = CUSUM_THRESHOLD_SCALE * sensitivity`.
pub const CUSUM_THRESHOLD_SCALE: f64 = 0.2;

/// Weight of the newest RMS value in the baseline EMA.
pub const BASELINE_ALPHA: f64 = 0.01;

/// Lowest permitted low cutoff of a band-pass channel in Hz.
pub const MIN_LOW_CUTOFF_HZ: f64 = 10.0;

/// Butterworth prototype order of every channel filter.
pub const FILTER_ORDER: usize = 6;

/// Default depth of each inter-stage queue in the staged pipeline.
pub const QUEUE_DEPTH: usize = 8;

/// Default data directory.
pub const DATA_PATH: &str = "./data";

/// Event kind emitted by the CUSUM detector.
pub const SID_CANDIDATE: &str = "sid_candidate";
