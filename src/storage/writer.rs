//! Parquet writer for the day/channel partitioned store.
//!
//! Every call appends new part files; nothing already on disk is rewritten.
//! Parts are written under a hidden temporary name and renamed into place, so
//! a reader never sees a half-written file.

use crate::error::{Result, SidwatchError};
use crate::processing::{EventRecord, FeatureValues};
use crate::storage::layout::{Dataset, METADATA_FILE, PART_EXTENSION, StoreLayout, day_of};
use crate::storage::metadata::StationMetadata;
use arrow_array::types::Float64Type;
use arrow_array::{ArrayRef, Float64Array, ListArray, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static PART_SEQUENCE: AtomicU64 = AtomicU64::new(0);

pub(crate) fn storage_error(path: &Path, err: impl std::fmt::Display) -> SidwatchError {
    SidwatchError::Storage {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

fn signal_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("ts", DataType::Float64, false),
        Field::new(
            "signal",
            DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
            false,
        ),
    ]))
}

fn feature_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("ts", DataType::Float64, false),
        Field::new("rms", DataType::Float64, false),
        Field::new("mad", DataType::Float64, false),
        Field::new("snr", DataType::Float64, false),
    ]))
}

fn event_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("ts", DataType::Float64, false),
        Field::new("channel", DataType::Utf8, false),
        Field::new("type", DataType::Utf8, false),
        Field::new("value", DataType::Float64, false),
    ]))
}

fn signal_batch(ts: f64, signal: &[f64]) -> Result<RecordBatch> {
    let list = ListArray::from_iter_primitive::<Float64Type, _, _>([Some(
        signal.iter().copied().map(Some),
    )]);
    let columns: Vec<ArrayRef> = vec![Arc::new(Float64Array::from(vec![ts])), Arc::new(list)];
    Ok(RecordBatch::try_new(signal_schema(), columns)?)
}

fn feature_batch(ts: f64, values: &FeatureValues) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Float64Array::from(vec![ts])),
        Arc::new(Float64Array::from(vec![values.rms])),
        Arc::new(Float64Array::from(vec![values.mad])),
        Arc::new(Float64Array::from(vec![values.snr])),
    ];
    Ok(RecordBatch::try_new(feature_schema(), columns)?)
}

fn event_batch(events: &[EventRecord]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Float64Array::from_iter_values(events.iter().map(|e| e.ts))),
        Arc::new(StringArray::from_iter_values(events.iter().map(|e| e.channel.as_str()))),
        Arc::new(StringArray::from_iter_values(events.iter().map(|e| e.kind.as_str()))),
        Arc::new(Float64Array::from_iter_values(events.iter().map(|e| e.value))),
    ];
    Ok(RecordBatch::try_new(event_schema(), columns)?)
}

/// Unique part file name ordered by timestamp.
fn part_file_name(ts: f64) -> String {
    let micros = (ts * 1e6).round() as i64;
    let seq = PART_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!(
        "part-{:017}-{}-{:08}.{}",
        micros,
        std::process::id(),
        seq,
        PART_EXTENSION
    )
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| storage_error(path, e))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|e| storage_error(path, e))
}

/// Moves a finished sidecar from `tmp_path` to `path`. False if a readable
/// sidecar was already there.
fn publish_sidecar(tmp_path: &Path, path: &Path) -> Result<bool> {
    match fs::hard_link(tmp_path, path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            if sidecar_is_readable(path) {
                return Ok(false);
            }
            tracing::warn!(path = %path.display(), "replacing unreadable metadata sidecar");
            fs::rename(tmp_path, path).map_err(|e| storage_error(path, e))?;
            Ok(true)
        }
        Err(e) => Err(storage_error(path, e)),
    }
}

fn sidecar_is_readable(path: &Path) -> bool {
    fs::read(path).is_ok_and(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).is_ok())
}

/// Rows written by one [`StoreWriter::write_frame`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSummary {
    pub signal_rows: usize,
    pub feature_rows: usize,
    pub event_rows: usize,
    /// True if this call created the day's metadata sidecar.
    pub metadata_written: bool,
}

/// Appends signals, features, and events to the store.
pub struct StoreWriter {
    layout: StoreLayout,
    metadata: StationMetadata,
    properties: WriterProperties,
    prepared_days: HashSet<String>,
}

impl StoreWriter {
    /// Creates the root directory if needed.
    pub fn new(root: impl Into<PathBuf>, metadata: StationMetadata) -> Result<Self> {
        let layout = StoreLayout::new(root);
        fs::create_dir_all(layout.root()).map_err(|e| storage_error(layout.root(), e))?;
        tracing::info!(root = %layout.root().display(), "store opened");
        Ok(Self {
            layout,
            metadata,
            properties: WriterProperties::builder()
                .set_compression(Compression::SNAPPY)
                .build(),
            prepared_days: HashSet::new(),
        })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn metadata(&self) -> &StationMetadata {
        &self.metadata
    }

    /// Persists one chunk's results under the UTC day of `ts`.
    ///
    /// Datasets are written one after another with no cross-dataset
    /// transaction: an I/O failure aborts the rest of this frame but keeps
    /// parts already renamed into place.
    pub fn write_frame(
        &mut self,
        ts: f64,
        banded: &BTreeMap<String, Vec<f64>>,
        features: &BTreeMap<String, FeatureValues>,
        events: &[EventRecord],
    ) -> Result<FrameSummary> {
        let day = day_of(ts)?;
        let mut summary = FrameSummary {
            metadata_written: self.prepare_day(&day)?,
            ..FrameSummary::default()
        };

        for (channel, signal) in banded {
            let dir = self.layout.part_dir(&day, Dataset::Signals, channel);
            self.write_part(&dir, ts, &signal_batch(ts, signal)?)?;
            summary.signal_rows += 1;
        }

        for (channel, values) in features {
            let dir = self.layout.part_dir(&day, Dataset::Features, channel);
            self.write_part(&dir, ts, &feature_batch(ts, values)?)?;
            summary.feature_rows += 1;
        }

        if !events.is_empty() {
            let dir = self.layout.dataset_dir(&day, Dataset::Events);
            self.write_part(&dir, ts, &event_batch(events)?)?;
            summary.event_rows = events.len();
        }

        tracing::debug!(
            day = %day,
            signals = summary.signal_rows,
            features = summary.feature_rows,
            events = summary.event_rows,
            "frame stored"
        );
        Ok(summary)
    }

    /// Creates the day directory and its sidecar on first use of `day`.
    fn prepare_day(&mut self, day: &str) -> Result<bool> {
        if self.prepared_days.contains(day) {
            return Ok(false);
        }
        let dir = self.layout.day_dir(day);
        fs::create_dir_all(&dir).map_err(|e| storage_error(&dir, e))?;
        let written = self.write_metadata_once(day)?;
        self.prepared_days.insert(day.to_string());
        Ok(written)
    }

    /// Writes `metadata.json` unless a readable one already exists.
    ///
    /// The sidecar is written to a temporary file and hard-linked into place,
    /// which fails if another writer got there first. An existing sidecar that
    /// is not valid JSON is left over from an interrupted write and replaced.
    fn write_metadata_once(&self, day: &str) -> Result<bool> {
        let path = self.layout.metadata_path(day);
        let tmp_path = self.layout.day_dir(day).join(format!(
            ".{}.{}-{}.tmp",
            METADATA_FILE,
            std::process::id(),
            PART_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        ));

        let json = serde_json::to_vec_pretty(&self.metadata)?;
        let result =
            write_synced(&tmp_path, &json).and_then(|()| publish_sidecar(&tmp_path, &path));
        if let Err(e) = fs::remove_file(&tmp_path)
            && e.kind() != ErrorKind::NotFound
        {
            tracing::warn!(
                path = %tmp_path.display(),
                error = %e,
                "failed to remove temporary sidecar"
            );
        }
        let written = result?;
        if written {
            tracing::info!(path = %path.display(), "metadata sidecar written");
        }
        Ok(written)
    }

    fn write_part(&self, dir: &Path, ts: f64, batch: &RecordBatch) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| storage_error(dir, e))?;
        let name = part_file_name(ts);
        let final_path = dir.join(&name);
        let tmp_path = dir.join(format!(".{}.tmp", name));

        let result = self.write_parquet(&tmp_path, batch).and_then(|()| {
            fs::rename(&tmp_path, &final_path).map_err(|e| storage_error(&final_path, e))
        });
        if result.is_err()
            && let Err(e) = fs::remove_file(&tmp_path)
            && e.kind() != ErrorKind::NotFound
        {
            tracing::warn!(
                path = %tmp_path.display(),
                error = %e,
                "failed to remove temporary part"
            );
        }
        result
    }

    fn write_parquet(&self, path: &Path, batch: &RecordBatch) -> Result<()> {
        let file = File::create(path).map_err(|e| storage_error(path, e))?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(self.properties.clone()))?;
        writer.write(batch)?;
        writer.close()?;
        Ok(())
    }
}
