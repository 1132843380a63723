//! Butterworth band-pass design in second-order sections.
//!
//! Follows the classic analog-prototype route: Butterworth low-pass poles,
//! low-pass to band-pass transform, bilinear transform with pre-warped band
//! edges, then one conjugate pole pair per section. Every section gets one zero
//! at z = 1 and one at z = -1, so each numerator is `[1, 0, -1]` up to gain.

use crate::dsp::sos::{Biquad, cascade_response};
use num_complex::Complex64;
use std::f64::consts::PI;

const REAL_POLE_EPSILON: f64 = 1e-12;

/// Designs an order-`order` Butterworth band-pass filter for `[low_hz, high_hz]`
/// at `sample_rate`.
///
/// The result has `order` sections. Gain is normalised to exactly 1 at the
/// geometric centre of the (pre-warped) band. Callers validate the edges;
/// this function assumes `0 < low_hz < high_hz < sample_rate / 2`.
pub fn bandpass_sections(
    order: usize,
    low_hz: f64,
    high_hz: f64,
    sample_rate: f64,
) -> Vec<Biquad> {
    let fs2 = 2.0 * sample_rate;
    let warp = |f: f64| fs2 * (PI * f / sample_rate).tan();
    let w_low = warp(low_hz);
    let w_high = warp(high_hz);
    let bandwidth = w_high - w_low;
    let w_center = (w_low * w_high).sqrt();

    let bilinear = |s: Complex64| (fs2 + s) / (fs2 - s);

    let mut digital_poles = Vec::with_capacity(2 * order);
    for p in prototype_poles(order) {
        let scaled = p * (bandwidth / 2.0);
        let root = (scaled * scaled - w_center * w_center).sqrt();
        digital_poles.push(bilinear(scaled + root));
        digital_poles.push(bilinear(scaled - root));
    }

    let mut sections = pair_poles(&digital_poles);

    // Normalise at the digital image of the analog centre frequency.
    let omega_center = 2.0 * (w_center / fs2).atan();
    let response = cascade_response(&sections, omega_center);
    let magnitude = response.norm();
    if magnitude > 0.0 && !sections.is_empty() {
        let per_section = magnitude.recip().powf(1.0 / sections.len() as f64);
        for section in &mut sections {
            section.scale_numerator(per_section);
        }
        if response.re < 0.0 {
            sections[0].scale_numerator(-1.0);
        }
    }
    sections
}

/// Normalised analog Butterworth low-pass poles (left half-plane, unit cutoff).
fn prototype_poles(order: usize) -> Vec<Complex64> {
    let n = order as f64;
    (0..order)
        .map(|i| {
            let m = -(n - 1.0) + 2.0 * i as f64;
            -Complex64::from_polar(1.0, PI * m / (2.0 * n))
        })
        .collect()
}

/// Groups poles into sections: conjugate pairs first, then leftover real poles two by two.
fn pair_poles(poles: &[Complex64]) -> Vec<Biquad> {
    let mut sections = Vec::new();
    let mut real_poles = Vec::new();

    for pole in poles {
        if pole.im > REAL_POLE_EPSILON {
            sections.push(Biquad::new(
                [1.0, 0.0, -1.0],
                [1.0, -2.0 * pole.re, pole.norm_sqr()],
            ));
        } else if pole.im.abs() <= REAL_POLE_EPSILON {
            real_poles.push(pole.re);
        }
    }

    for pair in real_poles.chunks(2) {
        let (r1, r2) = match pair {
            [a, b] => (*a, *b),
            [a] => (*a, 0.0),
            _ => continue,
        };
        sections.push(Biquad::new([1.0, 0.0, -1.0], [1.0, -(r1 + r2), r1 * r2]));
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gain_at(sections: &[Biquad], freq: f64, fs: f64) -> f64 {
        cascade_response(sections, 2.0 * PI * freq / fs).norm()
    }

    #[test]
    fn test_prototype_poles_lie_on_unit_circle_in_left_half_plane() {
        for order in 1..=8 {
            let poles = prototype_poles(order);
            assert_eq!(poles.len(), order);
            for p in poles {
                assert!((p.norm() - 1.0).abs() < 1e-12);
                assert!(p.re < 0.0, "pole {} not in left half-plane", p);
            }
        }
    }

    #[test]
    fn test_section_count_matches_order() {
        for order in [2, 4, 6] {
            let sections = bandpass_sections(order, 40.0, 60.0, 1000.0);
            assert_eq!(sections.len(), order);
        }
    }

    #[test]
    fn test_unity_gain_at_band_center() {
        let sections = bandpass_sections(6, 40.0, 60.0, 1000.0);
        let omega = {
            let fs2 = 2000.0;
            let wl = fs2 * (PI * 40.0 / 1000.0).tan();
            let wh = fs2 * (PI * 60.0 / 1000.0).tan();
            2.0 * ((wl * wh).sqrt() / fs2).atan()
        };
        let response = cascade_response(&sections, omega);
        assert!((response.re - 1.0).abs() < 1e-9, "response {}", response);
        assert!(response.im.abs() < 1e-9, "response {}", response);
    }

    #[test]
    fn test_band_edges_are_half_power_points() {
        let sections = bandpass_sections(6, 40.0, 60.0, 1000.0);
        let half_power = 1.0 / 2f64.sqrt();
        assert!((gain_at(&sections, 40.0, 1000.0) - half_power).abs() < 1e-6);
        assert!((gain_at(&sections, 60.0, 1000.0) - half_power).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_out_of_band_frequencies() {
        let sections = bandpass_sections(6, 40.0, 60.0, 1000.0);
        assert!(gain_at(&sections, 200.0, 1000.0) < 1e-4);
        assert!(gain_at(&sections, 10.0, 1000.0) < 1e-4);
    }

    #[test]
    fn test_all_poles_inside_unit_circle_for_narrow_vlf_band() {
        let sections = bandpass_sections(6, 38280.0, 38320.0, 96000.0);
        for s in &sections {
            let a = s.a();
            // Conjugate pair radius squared is a[2].
            assert!(a[2] < 1.0 && a[2] > 0.0, "unstable section {:?}", a);
        }
        let center = gain_at(&sections, 38300.0, 96000.0);
        assert!((center - 1.0).abs() < 1e-3, "center gain {}", center);
    }
}
