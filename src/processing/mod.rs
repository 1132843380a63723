//! Per-channel signal processing: band isolation, rolling features, change detection.

pub mod channel_bank;
pub mod events;
pub mod features;

pub use channel_bank::{BandEdges, ChannelBank, ChannelSpec, validate_channel_name};
pub use events::{CusumConfig, CusumState, EventDetector, EventRecord};
pub use features::{ChannelBuffer, FeatureExtractor, FeatureRecord, FeatureValues, mad, rms, snr};
