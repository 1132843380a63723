//! Audio acquisition: sources and the chunking acquirer.

pub mod acquirer;
#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod source;
pub mod wav;

pub use acquirer::{Acquirer, AudioChunk, Clock, SystemClock};
#[cfg(feature = "cpal-audio")]
pub use capture::{CpalAudioSource, DeviceInfo, list_devices, suppress_audio_warnings};
pub use source::{AudioSource, MockAudioSource};
pub use wav::WavFileSource;
