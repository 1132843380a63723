//! Rolling per-channel signal statistics.
//!
//! Each channel keeps a bounded buffer of its most recent filtered samples.
//! Once a full window is available, every chunk yields RMS, mean absolute
//! deviation, and an SNR against the history immediately preceding the window.

use crate::error::{Result, SidwatchError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Root mean square. Zero for an empty slice.
pub fn rms(x: &[f64]) -> f64 {
    power(x).sqrt()
}

/// Mean absolute deviation around the mean. Zero for an empty slice.
pub fn mad(x: &[f64]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    x.iter().map(|v| (v - mean).abs()).sum::<f64>() / n
}

/// Mean power `mean(x^2)`. Zero for an empty slice.
pub fn power(x: &[f64]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64
}

/// Signal-to-noise ratio in dB of `signal` over `noise`.
///
/// An empty or silent noise reference yields `+inf`.
pub fn snr(signal: &[f64], noise: &[f64]) -> f64 {
    let noise_power = power(noise);
    if noise.is_empty() || noise_power == 0.0 {
        return f64::INFINITY;
    }
    10.0 * (power(signal) / noise_power).log10()
}

/// Statistics of one channel's most recent window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureValues {
    pub rms: f64,
    pub mad: f64,
    pub snr: f64,
}

/// A feature row as persisted: one channel at one chunk timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub ts: f64,
    pub channel: String,
    pub rms: f64,
    pub mad: f64,
    pub snr: f64,
}

impl FeatureRecord {
    pub fn new(ts: f64, channel: impl Into<String>, values: FeatureValues) -> Self {
        Self {
            ts,
            channel: channel.into(),
            rms: values.rms,
            mad: values.mad,
            snr: values.snr,
        }
    }

    pub fn values(&self) -> FeatureValues {
        FeatureValues {
            rms: self.rms,
            mad: self.mad,
            snr: self.snr,
        }
    }
}

/// Rolling sample history of a single channel.
///
/// Holds at most two windows: the current one and the noise reference
/// preceding it. Older samples are discarded.
#[derive(Debug, Clone)]
pub struct ChannelBuffer {
    samples: VecDeque<f64>,
    window: usize,
}

impl ChannelBuffer {
    pub fn new(window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(2 * window),
            window,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.window
    }

    /// Appends samples and trims history beyond two windows.
    pub fn extend(&mut self, samples: &[f64]) {
        self.samples.extend(samples.iter().copied());
        let retain = 2 * self.window;
        if self.samples.len() > retain {
            let excess = self.samples.len() - retain;
            self.samples.drain(..excess);
        }
    }

    /// Splits the buffer into `(noise, window)`, or `None` before a full window
    /// has accumulated.
    pub fn split(&mut self) -> Option<(&[f64], &[f64])> {
        if !self.is_full() {
            return None;
        }
        let window = self.window;
        let contiguous = self.samples.make_contiguous();
        Some(contiguous.split_at(contiguous.len() - window))
    }

    /// Computes the window statistics, or `None` with insufficient history.
    pub fn features(&mut self) -> Option<FeatureValues> {
        let (noise, window) = self.split()?;
        Some(FeatureValues {
            rms: rms(window),
            mad: mad(window),
            snr: snr(window, noise),
        })
    }
}

/// Per-channel rolling feature extraction.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    window_samples: usize,
    step_samples: usize,
    buffers: BTreeMap<String, ChannelBuffer>,
}

impl FeatureExtractor {
    /// `step_samples` is advisory; extraction runs once per chunk.
    pub fn new(window_samples: usize, step_samples: usize) -> Result<Self> {
        if window_samples == 0 {
            return Err(SidwatchError::ConfigInvalidValue {
                key: "processing.window_seconds".to_string(),
                message: "window must cover at least one sample".to_string(),
            });
        }
        Ok(Self {
            window_samples,
            step_samples,
            buffers: BTreeMap::new(),
        })
    }

    pub fn window_samples(&self) -> usize {
        self.window_samples
    }

    pub fn step_samples(&self) -> usize {
        self.step_samples
    }

    /// Number of samples buffered for `channel`.
    pub fn buffered(&self, channel: &str) -> usize {
        self.buffers.get(channel).map_or(0, ChannelBuffer::len)
    }

    /// Appends one chunk of filtered samples per channel and returns the
    /// features of every channel that has a full window. Channels still
    /// warming up are absent from the result.
    pub fn compute(
        &mut self,
        banded: &BTreeMap<String, Vec<f64>>,
    ) -> BTreeMap<String, FeatureValues> {
        let window = self.window_samples;
        let mut out = BTreeMap::new();
        for (name, samples) in banded {
            let buffer = self
                .buffers
                .entry(name.clone())
                .or_insert_with(|| ChannelBuffer::new(window));
            buffer.extend(samples);
            if let Some(values) = buffer.features() {
                out.insert(name.clone(), values);
            }
        }
        out
    }

    /// Clears all buffered history.
    pub fn reset(&mut self) {
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn banded(name: &str, samples: Vec<f64>) -> BTreeMap<String, Vec<f64>> {
        let mut map = BTreeMap::new();
        map.insert(name.to_string(), samples);
        map
    }

    #[test]
    fn test_rms_known_signal() {
        assert!((rms(&[2.0; 1000]) - 2.0).abs() < 1e-12);
        assert!((rms(&[3.0, -3.0, 3.0, -3.0]) - 3.0).abs() < 1e-12);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn test_mad_known_signal() {
        assert_eq!(mad(&[5.0; 1000]), 0.0);
        assert!((mad(&[1.0, -1.0, 1.0, -1.0]) - 1.0).abs() < 1e-12);
        assert_eq!(mad(&[]), 0.0);
    }

    #[test]
    fn test_snr_of_sine_over_small_noise() {
        let signal: Vec<f64> = (0..1000)
            .map(|i| (2.0 * std::f64::consts::PI * i as f64 / 999.0).sin())
            .collect();
        let noise: Vec<f64> = (0..1000)
            .map(|i| 0.01 * ((i * 7919 % 1000) as f64 / 500.0 - 1.0))
            .collect();
        assert!(snr(&signal, &noise) > 10.0);
    }

    #[test]
    fn test_snr_equal_power_is_zero_db() {
        assert!(snr(&[1.0, -1.0], &[-1.0, 1.0]).abs() < 1e-12);
        assert!((snr(&[10.0], &[1.0]) - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_snr_without_noise_reference_is_infinite() {
        assert_eq!(snr(&[1.0, 2.0], &[]), f64::INFINITY);
        assert_eq!(snr(&[1.0, 2.0], &[0.0, 0.0]), f64::INFINITY);
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(FeatureExtractor::new(0, 1).is_err());
    }

    #[test]
    fn test_insufficient_history_is_omitted() {
        let mut fx = FeatureExtractor::new(100, 50).unwrap();
        let out = fx.compute(&banded("CH1", vec![1.0; 99]));
        assert!(out.is_empty());
        assert_eq!(fx.buffered("CH1"), 99);
    }

    #[test]
    fn test_exactly_one_window_yields_one_record() {
        let mut fx = FeatureExtractor::new(100, 50).unwrap();
        let out = fx.compute(&banded("CH1", vec![0.5; 100]));
        assert_eq!(out.len(), 1);
        let f = out["CH1"];
        assert!((f.rms - 0.5).abs() < 1e-12);
        assert_eq!(f.mad, 0.0);
        assert_eq!(f.snr, f64::INFINITY);
    }

    #[test]
    fn test_window_completed_across_chunks() {
        let mut fx = FeatureExtractor::new(100, 50).unwrap();
        assert!(fx.compute(&banded("CH1", vec![1.0; 60])).is_empty());
        let out = fx.compute(&banded("CH1", vec![1.0; 60]));
        assert!(out.contains_key("CH1"));
    }

    #[test]
    fn test_constant_amplitude_gives_exact_rms_and_zero_mad() {
        let amplitude = 0.25;
        let mut fx = FeatureExtractor::new(200, 100).unwrap();
        for _ in 0..5 {
            fx.compute(&banded("CH1", vec![amplitude; 150]));
        }
        let out = fx.compute(&banded("CH1", vec![amplitude; 150]));
        let f = out["CH1"];
        assert_eq!(f.rms, amplitude);
        assert_eq!(f.mad, 0.0);
        assert!(f.snr.abs() < 1e-12);
    }

    #[test]
    fn test_snr_uses_preceding_history_as_noise() {
        let mut fx = FeatureExtractor::new(4, 4).unwrap();
        fx.compute(&banded("CH1", vec![1.0; 4]));
        let out = fx.compute(&banded("CH1", vec![10.0; 4]));
        assert!((out["CH1"].snr - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_buffer_retains_two_windows() {
        let mut fx = FeatureExtractor::new(10, 5).unwrap();
        for _ in 0..10 {
            fx.compute(&banded("CH1", vec![1.0; 7]));
        }
        assert_eq!(fx.buffered("CH1"), 20);
    }

    #[test]
    fn test_ramp_window_and_step() {
        let ramp: Vec<f64> = (0..1000).map(f64::from).collect();
        let mut fx = FeatureExtractor::new(100, 50).unwrap();
        let out = fx.compute(&banded("CH1", ramp));
        let f = out["CH1"];
        assert!(f.rms > 0.0);
        // Last window is 900..999, mean 949.5, uniform deviations 0.5..49.5.
        assert!((f.mad - 25.0).abs() < 1e-9);
        assert!(f.snr > 0.0);
    }

    #[test]
    fn test_channels_are_buffered_independently() {
        let mut fx = FeatureExtractor::new(10, 5).unwrap();
        let mut input = BTreeMap::new();
        input.insert("A".to_string(), vec![1.0; 10]);
        input.insert("B".to_string(), vec![2.0; 5]);
        let out = fx.compute(&input);
        assert!(out.contains_key("A"));
        assert!(!out.contains_key("B"));
        assert_eq!(fx.buffered("A"), 10);
        assert_eq!(fx.buffered("B"), 5);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut fx = FeatureExtractor::new(10, 5).unwrap();
        fx.compute(&banded("CH1", vec![1.0; 10]));
        fx.reset();
        assert_eq!(fx.buffered("CH1"), 0);
        assert!(fx.compute(&banded("CH1", vec![1.0; 5])).is_empty());
    }

    #[test]
    fn test_feature_record_round_trips_values() {
        let values = FeatureValues {
            rms: 0.5,
            mad: 0.1,
            snr: 10.0,
        };
        let record = FeatureRecord::new(1.5, "CH1", values);
        assert_eq!(record.values(), values);
        assert_eq!(record.channel, "CH1");
    }
}
