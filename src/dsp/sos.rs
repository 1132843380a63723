//! Second-order-section IIR filtering with persistent delay lines.
//!
//! Coefficients and state are separate values: [`SosFilter::filter`] threads
//! an explicit [`SosState`] through each call, and [`StatefulSos`] bundles the
//! two for callers that own a single stream.

use num_complex::Complex64;
use std::f64::consts::PI;

/// One second-order section, normalised so that `a[0] == 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    b: [f64; 3],
    a: [f64; 3],
}

impl Biquad {
    /// Creates a section, normalising by `a[0]`.
    pub fn new(b: [f64; 3], a: [f64; 3]) -> Self {
        let a0 = a[0];
        Self {
            b: [b[0] / a0, b[1] / a0, b[2] / a0],
            a: [1.0, a[1] / a0, a[2] / a0],
        }
    }

    pub fn b(&self) -> [f64; 3] {
        self.b
    }

    pub fn a(&self) -> [f64; 3] {
        self.a
    }

    pub(crate) fn scale_numerator(&mut self, gain: f64) {
        for c in &mut self.b {
            *c *= gain;
        }
    }

    /// Transposed direct form II step.
    #[inline]
    fn step(&self, x: f64, z: &mut [f64; 2]) -> f64 {
        let y = self.b[0] * x + z[0];
        z[0] = self.b[1] * x - self.a[1] * y + z[1];
        z[1] = self.b[2] * x - self.a[2] * y;
        y
    }
}

/// Delay-line state of a section cascade (two values per section).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SosState {
    delays: Vec<[f64; 2]>,
}

impl SosState {
    /// Zero state for `sections` sections.
    pub fn zeroed(sections: usize) -> Self {
        Self {
            delays: vec![[0.0; 2]; sections],
        }
    }

    /// True if every delay element is zero (filter at rest).
    pub fn is_at_rest(&self) -> bool {
        self.delays.iter().all(|z| z[0] == 0.0 && z[1] == 0.0)
    }
}

/// Immutable cascade of second-order sections.
#[derive(Debug, Clone, PartialEq)]
pub struct SosFilter {
    sections: Vec<Biquad>,
}

impl SosFilter {
    pub fn new(sections: Vec<Biquad>) -> Self {
        Self { sections }
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    /// A zero state matching this cascade.
    pub fn initial_state(&self) -> SosState {
        SosState::zeroed(self.sections.len())
    }

    /// Filters `input` starting from `state` and returns the output together
    /// with the state to pass into the next call.
    pub fn filter(&self, input: &[f32], mut state: SosState) -> (Vec<f64>, SosState) {
        if state.delays.len() != self.sections.len() {
            state = self.initial_state();
        }
        let output = input
            .iter()
            .map(|&x| {
                self.sections
                    .iter()
                    .zip(state.delays.iter_mut())
                    .fold(f64::from(x), |acc, (section, z)| section.step(acc, z))
            })
            .collect();
        (output, state)
    }

    /// Magnitude response at `freq_hz` for a stream sampled at `sample_rate`.
    pub fn response_at(&self, freq_hz: f64, sample_rate: f64) -> f64 {
        cascade_response(&self.sections, 2.0 * PI * freq_hz / sample_rate).norm()
    }
}

/// Complex response of a section cascade at normalised angular frequency `omega`.
pub(crate) fn cascade_response(sections: &[Biquad], omega: f64) -> Complex64 {
    let z1 = Complex64::from_polar(1.0, -omega);
    let z2 = z1 * z1;
    sections.iter().fold(Complex64::new(1.0, 0.0), |acc, s| {
        let num = s.b[0] + z1 * s.b[1] + z2 * s.b[2];
        let den = s.a[0] + z1 * s.a[1] + z2 * s.a[2];
        acc * num / den
    })
}

/// A filter together with the state it owns.
#[derive(Debug, Clone)]
pub struct StatefulSos {
    filter: SosFilter,
    state: SosState,
}

impl StatefulSos {
    pub fn new(filter: SosFilter) -> Self {
        let state = filter.initial_state();
        Self { filter, state }
    }

    pub fn filter(&self) -> &SosFilter {
        &self.filter
    }

    pub fn state(&self) -> &SosState {
        &self.state
    }

    /// Filters one block, continuing exactly where the previous block ended.
    pub fn process(&mut self, input: &[f32]) -> Vec<f64> {
        let state = std::mem::take(&mut self.state);
        let (output, next) = self.filter.filter(input, state);
        self.state = next;
        output
    }

    /// Returns the delay lines to rest.
    pub fn reset(&mut self) {
        self.state = self.filter.initial_state();
    }
}
