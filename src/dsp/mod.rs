//! Digital filter design and filtering primitives.

pub mod butterworth;
pub mod sos;

pub use butterworth::bandpass_sections;
pub use sos::{Biquad, SosFilter, SosState, StatefulSos};
