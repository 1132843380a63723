//! Message types passed between pipeline stations.

use crate::processing::{EventRecord, FeatureRecord, FeatureValues};
use crate::storage::FrameSummary;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// One chunk's results as they move through the stations.
///
/// The filter station creates it; the feature and detector stations fill in
/// their parts. Maps are keyed and ordered by channel name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Sequence number of the source chunk, for gap detection.
    pub seq: u64,
    /// Epoch seconds (UTC) of the source chunk.
    pub timestamp: f64,
    /// Filtered samples per channel, each as long as the chunk.
    pub banded: BTreeMap<String, Vec<f64>>,
    /// Features for channels whose window is full.
    pub features: BTreeMap<String, FeatureValues>,
    pub events: Vec<EventRecord>,
}

impl Frame {
    pub fn new(seq: u64, timestamp: f64, banded: BTreeMap<String, Vec<f64>>) -> Self {
        Self {
            seq,
            timestamp,
            banded,
            features: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    /// Features as standalone records stamped with this frame's timestamp.
    pub fn feature_records(&self) -> Vec<FeatureRecord> {
        self.features
            .iter()
            .map(|(channel, values)| FeatureRecord::new(self.timestamp, channel.clone(), *values))
            .collect()
    }
}

/// Acknowledgement emitted by the store station once a frame is persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoredFrame {
    pub seq: u64,
    pub timestamp: f64,
    pub summary: FrameSummary,
}

/// Live counters shared by the acquisition loop and the stations.
#[derive(Debug, Default)]
pub struct PipelineStats {
    chunks_acquired: AtomicU64,
    chunks_dropped: AtomicU64,
    chunks_stored: AtomicU64,
    feature_records: AtomicU64,
    events: AtomicU64,
}

impl PipelineStats {
    pub fn record_acquired(&self) {
        self.chunks_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored(&self, summary: &FrameSummary) {
        self.chunks_stored.fetch_add(1, Ordering::Relaxed);
        self.feature_records
            .fetch_add(summary.feature_rows as u64, Ordering::Relaxed);
        self.events
            .fetch_add(summary.event_rows as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineSummary {
        PipelineSummary {
            chunks_acquired: self.chunks_acquired.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            chunks_stored: self.chunks_stored.load(Ordering::Relaxed),
            feature_records: self.feature_records.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub chunks_acquired: u64,
    /// Chunks discarded by the `drop_newest` backpressure policy.
    pub chunks_dropped: u64,
    pub chunks_stored: u64,
    pub feature_records: u64,
    pub events: u64,
}
