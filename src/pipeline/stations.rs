//! The four processing stations: filter, features, detector, store.

use crate::audio::AudioChunk;
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::types::{Frame, PipelineStats, StoredFrame};
use crate::processing::{ChannelBank, EventDetector, FeatureExtractor};
use crate::storage::StoreWriter;
use std::sync::Arc;

/// Runs each chunk through the channel bank.
///
/// Also watches chunk sequence numbers: a jump means chunks were dropped
/// upstream and the filters have seen a discontinuity.
pub struct FilterStation {
    bank: ChannelBank,
    expected_seq: Option<u64>,
    missing_chunks: u64,
}

impl FilterStation {
    pub fn new(bank: ChannelBank) -> Self {
        Self {
            bank,
            expected_seq: None,
            missing_chunks: 0,
        }
    }

    pub fn bank(&self) -> &ChannelBank {
        &self.bank
    }

    /// Chunks skipped in the sequence so far.
    pub fn missing_chunks(&self) -> u64 {
        self.missing_chunks
    }
}

impl Station for FilterStation {
    type Input = AudioChunk;
    type Output = Frame;

    fn process(&mut self, chunk: AudioChunk) -> Result<Option<Frame>, StationError> {
        if let Some(expected) = self.expected_seq {
            if chunk.seq < expected {
                return Err(StationError::Recoverable(format!(
                    "chunk {} arrived after chunk {}",
                    chunk.seq,
                    expected - 1
                )));
            }
            if chunk.seq > expected {
                let missing = chunk.seq - expected;
                self.missing_chunks += missing;
                tracing::warn!(expected, received = chunk.seq, missing, "sequence gap");
            }
        }
        self.expected_seq = Some(chunk.seq + 1);

        let banded = self.bank.apply(&chunk.samples);
        tracing::debug!(seq = chunk.seq, ts = chunk.timestamp, "chunk filtered");
        Ok(Some(Frame::new(chunk.seq, chunk.timestamp, banded)))
    }

    fn name(&self) -> &'static str {
        "filter"
    }
}

pub struct FeatureStation {
    extractor: FeatureExtractor,
}

impl FeatureStation {
    pub fn new(extractor: FeatureExtractor) -> Self {
        Self { extractor }
    }
}

impl Station for FeatureStation {
    type Input = Frame;
    type Output = Frame;

    fn process(&mut self, mut frame: Frame) -> Result<Option<Frame>, StationError> {
        frame.features = self.extractor.compute(&frame.banded);
        Ok(Some(frame))
    }

    fn name(&self) -> &'static str {
        "features"
    }
}

pub struct DetectorStation {
    detector: EventDetector,
}

impl DetectorStation {
    pub fn new(detector: EventDetector) -> Self {
        Self { detector }
    }
}

impl Station for DetectorStation {
    type Input = Frame;
    type Output = Frame;

    fn process(&mut self, mut frame: Frame) -> Result<Option<Frame>, StationError> {
        frame.events = self.detector.detect(frame.timestamp, &frame.features);
        Ok(Some(frame))
    }

    fn name(&self) -> &'static str {
        "detector"
    }
}

/// Persists frames. Any storage failure is fatal to the run.
pub struct StoreStation {
    writer: StoreWriter,
    stats: Arc<PipelineStats>,
}

impl StoreStation {
    pub fn new(writer: StoreWriter, stats: Arc<PipelineStats>) -> Self {
        Self { writer, stats }
    }
}

impl Station for StoreStation {
    type Input = Frame;
    type Output = StoredFrame;

    fn process(&mut self, frame: Frame) -> Result<Option<StoredFrame>, StationError> {
        let summary = self
            .writer
            .write_frame(frame.timestamp, &frame.banded, &frame.features, &frame.events)
            .map_err(StationError::fatal)?;
        self.stats.record_stored(&summary);
        Ok(Some(StoredFrame {
            seq: frame.seq,
            timestamp: frame.timestamp,
            summary,
        }))
    }

    fn name(&self) -> &'static str {
        "store"
    }

    fn shutdown(&mut self) {
        let stats = self.stats.snapshot();
        tracing::info!(
            root = %self.writer.layout().root().display(),
            chunks = stats.chunks_stored,
            features = stats.feature_records,
            events = stats.events,
            "store closed"
        );
    }
}
