//! Day and channel partitioned Parquet store.

pub mod layout;
pub mod metadata;
pub mod reader;
pub mod writer;

pub use layout::{Dataset, StoreLayout, day_of};
pub use metadata::StationMetadata;
pub use reader::{DaySummary, SignalRecord, StoreReader};
pub use writer::{FrameSummary, StoreWriter};
