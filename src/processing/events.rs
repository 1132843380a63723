//! One-sided CUSUM change detection over the per-channel RMS stream.

use crate::defaults;
use crate::error::{Result, SidwatchError};
use crate::processing::features::FeatureValues;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Detector parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CusumConfig {
    /// Slack `k` subtracted from every increment.
    pub slack: f64,
    /// Firing threshold `h`.
    pub threshold: f64,
    /// Zero the cumulative sum after a firing chunk.
    pub reset_on_fire: bool,
}

impl CusumConfig {
    /// Standard parameters for `sensitivity` in (0, 1]: `k = 0.01`, `h = 0.2 * sensitivity`.
    pub fn from_sensitivity(sensitivity: f64) -> Result<Self> {
        if !(sensitivity > 0.0 && sensitivity <= 1.0) {
            return Err(SidwatchError::ConfigInvalidValue {
                key: "processing.sensitivity".to_string(),
                message: format!("must be in (0, 1], got {}", sensitivity),
            });
        }
        Ok(Self {
            slack: defaults::CUSUM_SLACK,
            threshold: defaults::CUSUM_THRESHOLD_SCALE * sensitivity,
            reset_on_fire: false,
        })
    }

    pub fn with_reset_on_fire(mut self, reset_on_fire: bool) -> Self {
        self.reset_on_fire = reset_on_fire;
        self
    }
}

/// Per-channel detector state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CusumState {
    /// Cumulative positive deviation, never negative.
    pub cumulative_sum: f64,
    /// Slow EMA of RMS.
    pub baseline: f64,
}

impl CusumState {
    fn seeded(rms: f64) -> Self {
        Self {
            cumulative_sum: 0.0,
            baseline: rms,
        }
    }

    /// Advances by one RMS observation and reports whether the test fired.
    ///
    /// The baseline update uses the baseline as it stood before the test.
    pub fn update(&mut self, rms: f64, config: &CusumConfig) -> bool {
        let baseline = self.baseline;
        let sum = (self.cumulative_sum + rms - baseline - config.slack).max(0.0);
        let fired = sum > config.threshold;

        self.baseline =
            (1.0 - defaults::BASELINE_ALPHA) * baseline + defaults::BASELINE_ALPHA * rms;
        self.cumulative_sum = if fired && config.reset_on_fire { 0.0 } else { sum };
        fired
    }
}

/// A candidate disturbance on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Timestamp of the chunk that fired.
    pub ts: f64,
    pub channel: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// RMS that triggered the event.
    pub value: f64,
}

impl EventRecord {
    pub fn sid_candidate(ts: f64, channel: impl Into<String>, value: f64) -> Self {
        Self {
            ts,
            channel: channel.into(),
            kind: defaults::SID_CANDIDATE.to_string(),
            value,
        }
    }
}

/// Independent CUSUM detectors keyed by channel name.
#[derive(Debug, Clone)]
pub struct EventDetector {
    config: CusumConfig,
    states: BTreeMap<String, CusumState>,
}

impl EventDetector {
    pub fn new(config: CusumConfig) -> Self {
        Self {
            config,
            states: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &CusumConfig {
        &self.config
    }

    /// Current state of `channel`, if it has seen at least one RMS value.
    pub fn state(&self, channel: &str) -> Option<&CusumState> {
        self.states.get(channel)
    }

    /// Runs one detection step for every channel present in `features`.
    ///
    /// Channels absent from `features` keep their state untouched.
    pub fn detect(
        &mut self,
        ts: f64,
        features: &BTreeMap<String, FeatureValues>,
    ) -> Vec<EventRecord> {
        let mut events = Vec::new();
        for (name, values) in features {
            let state = self
                .states
                .entry(name.clone())
                .or_insert_with(|| CusumState::seeded(values.rms));
            if state.update(values.rms, &self.config) {
                tracing::info!(
                    channel = %name,
                    rms = values.rms,
                    cusum = state.cumulative_sum,
                    "SID candidate"
                );
                events.push(EventRecord::sid_candidate(ts, name.clone(), values.rms));
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(name: &str, rms: f64) -> BTreeMap<String, FeatureValues> {
        let mut map = BTreeMap::new();
        map.insert(
            name.to_string(),
            FeatureValues {
                rms,
                mad: 0.1,
                snr: 10.0,
            },
        );
        map
    }

    fn detector(sensitivity: f64) -> EventDetector {
        EventDetector::new(CusumConfig::from_sensitivity(sensitivity).unwrap())
    }

    #[test]
    fn test_sensitivity_range() {
        assert!(CusumConfig::from_sensitivity(0.0).is_err());
        assert!(CusumConfig::from_sensitivity(-0.5).is_err());
        assert!(CusumConfig::from_sensitivity(1.01).is_err());
        assert!(CusumConfig::from_sensitivity(f64::NAN).is_err());
        let c = CusumConfig::from_sensitivity(1.0).unwrap();
        assert_eq!(c.slack, 0.01);
        assert!((c.threshold - 0.2).abs() < 1e-12);
        assert!(!c.reset_on_fire);
    }

    #[test]
    fn test_baseline_seeded_with_first_rms() {
        let mut det = detector(0.8);
        det.detect(0.0, &features("TEST", 0.42));
        let state = det.state("TEST").unwrap();
        assert!((state.baseline - 0.42).abs() < 1e-12);
        assert_eq!(state.cumulative_sum, 0.0);
    }

    #[test]
    fn test_stable_signal_never_fires() {
        let mut det = detector(0.8);
        for i in 0..50 {
            let events = det.detect(i as f64, &features("TEST", 1.0));
            assert!(events.is_empty());
            assert_eq!(det.state("TEST").unwrap().cumulative_sum, 0.0);
        }
    }

    #[test]
    fn test_large_step_fires_immediately() {
        let mut det = detector(1.0);
        for i in 0..20 {
            assert!(det.detect(i as f64, &features("TEST", 1.0)).is_empty());
        }
        let events = det.detect(20.0, &features("TEST", 2.0));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].channel, "TEST");
        assert_eq!(events[0].kind, "sid_candidate");
        assert_eq!(events[0].value, 2.0);
        assert_eq!(events[0].ts, 20.0);
    }

    #[test]
    fn test_small_step_fires_at_computed_chunk() {
        // B = 1.0, V = 1.06, h = 0.2: sums 0.05, 0.0994, 0.1482, 0.1964, 0.2440.
        let mut det = detector(1.0);
        for i in 0..10 {
            assert!(det.detect(i as f64, &features("TEST", 1.0)).is_empty());
        }
        let mut first_fire = None;
        for m in 1..=10 {
            let events = det.detect(10.0 + m as f64, &features("TEST", 1.06));
            if !events.is_empty() {
                first_fire = Some(m);
                break;
            }
        }
        assert_eq!(first_fire, Some(5));
    }

    #[test]
    fn test_baseline_update_uses_prior_baseline() {
        let mut det = detector(1.0);
        det.detect(0.0, &features("TEST", 1.0));
        det.detect(1.0, &features("TEST", 1.06));
        let state = det.state("TEST").unwrap();
        // Test used baseline 1.0; sum 0.05. Baseline then 0.99 * 1.0 + 0.01 * 1.06.
        assert!((state.cumulative_sum - 0.05).abs() < 1e-12);
        assert!((state.baseline - 1.0006).abs() < 1e-12);
    }

    #[test]
    fn test_continuous_alarm_keeps_firing() {
        let mut det = detector(1.0);
        det.detect(0.0, &features("TEST", 1.0));
        let fired: usize = (1..=5)
            .map(|i| det.detect(i as f64, &features("TEST", 2.0)).len())
            .sum();
        assert_eq!(fired, 5);
    }

    #[test]
    fn test_reset_on_fire_zeroes_sum() {
        let config = CusumConfig::from_sensitivity(1.0)
            .unwrap()
            .with_reset_on_fire(true);
        let mut det = EventDetector::new(config);
        det.detect(0.0, &features("TEST", 1.0));
        let events = det.detect(1.0, &features("TEST", 2.0));
        assert_eq!(events.len(), 1);
        assert_eq!(det.state("TEST").unwrap().cumulative_sum, 0.0);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut det = detector(1.0);
        let mut both = features("A", 1.0);
        both.extend(features("B", 1.0));
        det.detect(0.0, &both);

        let mut step = features("A", 2.0);
        step.extend(features("B", 1.0));
        let events = det.detect(1.0, &step);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].channel, "A");
        assert_eq!(det.state("B").unwrap().cumulative_sum, 0.0);
    }

    #[test]
    fn test_absent_channel_keeps_state() {
        let mut det = detector(1.0);
        det.detect(0.0, &features("A", 1.0));
        det.detect(1.0, &features("A", 1.1));
        let before = *det.state("A").unwrap();
        det.detect(2.0, &features("B", 1.0));
        assert_eq!(*det.state("A").unwrap(), before);
    }

    #[test]
    fn test_event_serializes_kind_as_type() {
        let event = EventRecord::sid_candidate(1.0, "NAA", 0.5);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "sid_candidate");
        assert_eq!(json["channel"], "NAA");
    }
}
