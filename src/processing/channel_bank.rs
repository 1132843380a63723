//! Per-transmitter band-pass channel bank.
//!
//! Each configured transmitter gets its own Butterworth band-pass filter whose
//! delay lines live for the whole run, so consecutive chunks are filtered as one
//! continuous stream.

use crate::defaults;
use crate::dsp::{SosFilter, StatefulSos, bandpass_sections};
use crate::error::{Result, SidwatchError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One monitored transmitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Unique channel name, also used as the storage partition key.
    pub name: String,
    /// Carrier frequency in Hz.
    #[serde(rename = "freq")]
    pub center_frequency: f64,
    /// Pass-band width in Hz.
    #[serde(rename = "bw")]
    pub bandwidth: f64,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>, center_frequency: f64, bandwidth: f64) -> Self {
        Self {
            name: name.into(),
            center_frequency,
            bandwidth,
        }
    }
}

/// Derived cutoff frequencies of a channel filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandEdges {
    pub low_hz: f64,
    pub high_hz: f64,
}

impl BandEdges {
    /// Derives and validates the pass-band for `spec` at `sample_rate`.
    ///
    /// The low edge is floored at 10 Hz; the band must be non-empty and lie
    /// strictly below Nyquist.
    pub fn derive(spec: &ChannelSpec, sample_rate: u32) -> Result<Self> {
        let fail = |message: String| SidwatchError::FilterConfig {
            channel: spec.name.clone(),
            message,
        };

        if !spec.center_frequency.is_finite() || !spec.bandwidth.is_finite() {
            return Err(fail(format!(
                "frequency {} Hz and bandwidth {} Hz must be finite",
                spec.center_frequency, spec.bandwidth
            )));
        }

        let half = spec.bandwidth / 2.0;
        let low_hz = (spec.center_frequency - half).max(defaults::MIN_LOW_CUTOFF_HZ);
        let high_hz = spec.center_frequency + half;
        let nyquist = f64::from(sample_rate) / 2.0;

        if low_hz >= high_hz {
            return Err(fail(format!(
                "low cutoff {} Hz is not below high cutoff {} Hz",
                low_hz, high_hz
            )));
        }
        if high_hz >= nyquist {
            return Err(fail(format!(
                "high cutoff {} Hz is not below Nyquist {} Hz",
                high_hz, nyquist
            )));
        }

        Ok(Self { low_hz, high_hz })
    }
}

/// Checks that a channel name can be used as a `channel=<name>` directory.
pub fn validate_channel_name(name: &str) -> Result<()> {
    let invalid = |message: &str| SidwatchError::FilterConfig {
        channel: name.to_string(),
        message: message.to_string(),
    };

    if name.trim().is_empty() {
        return Err(invalid("channel name must not be empty"));
    }
    if name == "." || name == ".." {
        return Err(invalid("channel name must not be a relative path component"));
    }
    if name
        .chars()
        .any(|c| matches!(c, '/' | '\\' | '=' | '\0') || c.is_control())
    {
        return Err(invalid(
            "channel name must not contain '/', '\\', '=' or control characters",
        ));
    }
    Ok(())
}

struct BandChannel {
    spec: ChannelSpec,
    edges: BandEdges,
    filter: StatefulSos,
}

/// Bank of stateful band-pass filters, one per channel.
pub struct ChannelBank {
    channels: Vec<BandChannel>,
    sample_rate: u32,
}

impl ChannelBank {
    /// Builds the bank with the default filter order.
    pub fn new(specs: &[ChannelSpec], sample_rate: u32) -> Result<Self> {
        Self::with_order(specs, sample_rate, defaults::FILTER_ORDER)
    }

    /// Builds the bank with a custom Butterworth prototype order.
    ///
    /// Fails before any filter is created if a spec is invalid, a name is
    /// repeated, or a band does not fit below Nyquist.
    pub fn with_order(specs: &[ChannelSpec], sample_rate: u32, order: usize) -> Result<Self> {
        if order == 0 {
            return Err(SidwatchError::ConfigInvalidValue {
                key: "processing.filter_order".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let mut seen = HashSet::new();
        let mut channels = Vec::with_capacity(specs.len());
        for spec in specs {
            validate_channel_name(&spec.name)?;
            if !seen.insert(spec.name.as_str()) {
                return Err(SidwatchError::FilterConfig {
                    channel: spec.name.clone(),
                    message: "channel name is not unique".to_string(),
                });
            }

            let edges = BandEdges::derive(spec, sample_rate)?;
            let sections = bandpass_sections(
                order,
                edges.low_hz,
                edges.high_hz,
                f64::from(sample_rate),
            );
            tracing::debug!(
                channel = %spec.name,
                low_hz = edges.low_hz,
                high_hz = edges.high_hz,
                sections = sections.len(),
                "designed band-pass filter"
            );
            channels.push(BandChannel {
                spec: spec.clone(),
                edges,
                filter: StatefulSos::new(SosFilter::new(sections)),
            });
        }

        Ok(Self {
            channels,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channel specs in configuration order.
    pub fn specs(&self) -> impl Iterator<Item = &ChannelSpec> {
        self.channels.iter().map(|c| &c.spec)
    }

    /// Derived cutoffs per channel.
    pub fn band_edges(&self) -> BTreeMap<String, BandEdges> {
        self.channels
            .iter()
            .map(|c| (c.spec.name.clone(), c.edges))
            .collect()
    }

    /// The filter used for `channel`, if configured.
    pub fn filter(&self, channel: &str) -> Option<&SosFilter> {
        self.channels
            .iter()
            .find(|c| c.spec.name == channel)
            .map(|c| c.filter.filter())
    }

    /// Filters one chunk through every channel.
    ///
    /// Each output has the same length as `samples`. Delay lines advance so
    /// the next call continues the same stream.
    pub fn apply(&mut self, samples: &[f32]) -> BTreeMap<String, Vec<f64>> {
        self.channels
            .iter_mut()
            .map(|c| (c.spec.name.clone(), c.filter.process(samples)))
            .collect()
    }

    /// Returns every channel's delay lines to rest.
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.filter.reset();
        }
    }
}
