//! Processing pipeline.
//!
//! Stations run either in their own threads, connected by bounded crossbeam
//! channels (staged mode), or one after another in a single loop (inline mode).

pub mod error;
pub mod orchestrator;
pub mod station;
pub mod stations;
pub mod types;

pub use error::{ErrorReporter, LogReporter, StationError};
pub use orchestrator::{Pipeline, PipelineHandle};
pub use station::{Station, StationRunner};
pub use stations::{DetectorStation, FeatureStation, FilterStation, StoreStation};
pub use types::{Frame, PipelineStats, PipelineSummary, StoredFrame};
