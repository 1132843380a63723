//! Read-only access to a store written by [`StoreWriter`](super::StoreWriter).
//!
//! The channel of partitioned datasets is recovered from the `channel=<name>`
//! directory, not from the part files.

use crate::error::{Result, SidwatchError};
use crate::processing::{EventRecord, FeatureRecord, FeatureValues};
use crate::storage::layout::{
    Dataset, PART_EXTENSION, StoreLayout, is_day_name, parse_partition_dir_name,
};
use crate::storage::metadata::StationMetadata;
use crate::storage::writer::storage_error;
use arrow_array::cast::AsArray;
use arrow_array::types::Float64Type;
use arrow_array::{Array, Float64Array, RecordBatch, StringArray};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Serialize;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// One stored signal row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalRecord {
    pub ts: f64,
    pub channel: String,
    pub signal: Vec<f64>,
}

/// Row counts of one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySummary {
    pub day: String,
    pub channels: Vec<String>,
    pub signal_rows: usize,
    pub feature_rows: usize,
    pub event_rows: usize,
    pub has_metadata: bool,
}

pub struct StoreReader {
    layout: StoreLayout,
}

impl StoreReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: StoreLayout::new(root),
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Day directories, oldest first. A missing root has no days.
    pub fn days(&self) -> Result<Vec<String>> {
        let mut days: Vec<String> = list_dir(self.layout.root())?
            .into_iter()
            .filter(|(_, path)| path.is_dir())
            .map(|(name, _)| name)
            .filter(|name| is_day_name(name))
            .collect();
        days.sort();
        Ok(days)
    }

    /// Channels with a partition in `dataset` on `day`.
    ///
    /// For events, the distinct channels named in the rows.
    pub fn channels(&self, day: &str, dataset: Dataset) -> Result<Vec<String>> {
        let mut channels: Vec<String> = if dataset.is_partitioned() {
            list_dir(&self.layout.dataset_dir(day, dataset))?
                .into_iter()
                .filter(|(_, path)| path.is_dir())
                .filter_map(|(name, _)| parse_partition_dir_name(&name).map(str::to_string))
                .collect()
        } else {
            self.read_events(day)?.into_iter().map(|e| e.channel).collect()
        };
        channels.sort();
        channels.dedup();
        Ok(channels)
    }

    pub fn read_signals(&self, day: &str) -> Result<Vec<SignalRecord>> {
        let mut rows = Vec::new();
        for channel in self.channels(day, Dataset::Signals)? {
            let dir = self.layout.part_dir(day, Dataset::Signals, &channel);
            for (batch, path) in read_dir_batches(&dir)? {
                let ts = f64_column(&batch, "ts", &path)?;
                let signal = batch
                    .column_by_name("signal")
                    .and_then(|c| c.as_list_opt::<i32>())
                    .ok_or_else(|| missing_column(&path, "signal"))?;
                for i in 0..batch.num_rows() {
                    let values = signal.value(i);
                    let values = values
                        .as_primitive_opt::<Float64Type>()
                        .ok_or_else(|| missing_column(&path, "signal"))?;
                    rows.push(SignalRecord {
                        ts: ts.value(i),
                        channel: channel.clone(),
                        signal: values.values().to_vec(),
                    });
                }
            }
        }
        rows.sort_by(|a, b| a.ts.total_cmp(&b.ts).then_with(|| a.channel.cmp(&b.channel)));
        Ok(rows)
    }

    pub fn read_features(&self, day: &str) -> Result<Vec<FeatureRecord>> {
        let mut rows = Vec::new();
        for channel in self.channels(day, Dataset::Features)? {
            let dir = self.layout.part_dir(day, Dataset::Features, &channel);
            for (batch, path) in read_dir_batches(&dir)? {
                let ts = f64_column(&batch, "ts", &path)?;
                let rms = f64_column(&batch, "rms", &path)?;
                let mad = f64_column(&batch, "mad", &path)?;
                let snr = f64_column(&batch, "snr", &path)?;
                for i in 0..batch.num_rows() {
                    let values = FeatureValues {
                        rms: rms.value(i),
                        mad: mad.value(i),
                        snr: snr.value(i),
                    };
                    rows.push(FeatureRecord::new(ts.value(i), channel.clone(), values));
                }
            }
        }
        rows.sort_by(|a, b| a.ts.total_cmp(&b.ts).then_with(|| a.channel.cmp(&b.channel)));
        Ok(rows)
    }

    pub fn read_events(&self, day: &str) -> Result<Vec<EventRecord>> {
        let dir = self.layout.dataset_dir(day, Dataset::Events);
        let mut rows = Vec::new();
        for (batch, path) in read_dir_batches(&dir)? {
            let ts = f64_column(&batch, "ts", &path)?;
            let channel = string_column(&batch, "channel", &path)?;
            let kind = string_column(&batch, "type", &path)?;
            let value = f64_column(&batch, "value", &path)?;
            for i in 0..batch.num_rows() {
                rows.push(EventRecord {
                    ts: ts.value(i),
                    channel: channel.value(i).to_string(),
                    kind: kind.value(i).to_string(),
                    value: value.value(i),
                });
            }
        }
        rows.sort_by(|a, b| a.ts.total_cmp(&b.ts).then_with(|| a.channel.cmp(&b.channel)));
        Ok(rows)
    }

    /// The day's sidecar, if present.
    pub fn read_metadata(&self, day: &str) -> Result<Option<StationMetadata>> {
        let path = self.layout.metadata_path(day);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(&path, e)),
        }
    }

    pub fn summary(&self, day: &str) -> Result<DaySummary> {
        let mut channels = self.channels(day, Dataset::Signals)?;
        channels.extend(self.channels(day, Dataset::Features)?);
        channels.sort();
        channels.dedup();

        Ok(DaySummary {
            day: day.to_string(),
            channels,
            signal_rows: self.read_signals(day)?.len(),
            feature_rows: self.read_features(day)?.len(),
            event_rows: self.read_events(day)?.len(),
            has_metadata: self.layout.metadata_path(day).is_file(),
        })
    }
}

/// `(file name, path)` of every entry in `dir`; empty if `dir` does not exist.
fn list_dir(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(storage_error(dir, e)),
    };
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| storage_error(dir, e))?;
        out.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
    }
    Ok(out)
}

/// Finished part files in `dir`, in name order. Temporary parts are skipped.
fn part_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = list_dir(dir)?
        .into_iter()
        .filter(|(name, path)| {
            !name.starts_with('.')
                && path.is_file()
                && path.extension().is_some_and(|ext| ext == PART_EXTENSION)
        })
        .map(|(_, path)| path)
        .collect();
    files.sort();
    Ok(files)
}

fn read_dir_batches(dir: &Path) -> Result<Vec<(RecordBatch, PathBuf)>> {
    let mut out = Vec::new();
    for path in part_files(dir)? {
        let file = File::open(&path).map_err(|e| storage_error(&path, e))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        for batch in reader {
            out.push((batch?, path.clone()));
        }
    }
    Ok(out)
}

fn missing_column(path: &Path, column: &str) -> SidwatchError {
    storage_error(path, format!("missing or mistyped column {}", column))
}

fn f64_column<'a>(batch: &'a RecordBatch, name: &str, path: &Path) -> Result<&'a Float64Array> {
    let column = batch
        .column_by_name(name)
        .and_then(|c| c.as_primitive_opt::<Float64Type>())
        .ok_or_else(|| missing_column(path, name))?;
    if column.null_count() > 0 {
        return Err(storage_error(path, format!("column {} contains nulls", name)));
    }
    Ok(column)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str, path: &Path) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_string_opt::<i32>())
        .ok_or_else(|| missing_column(path, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::StoreWriter;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn writer(root: &Path) -> StoreWriter {
        let config = Config::default();
        let specs = config.channel_specs().unwrap();
        StoreWriter::new(root, StationMetadata::from_config(&config, specs)).unwrap()
    }

    #[test]
    fn test_missing_root_has_no_days() {
        let reader = StoreReader::new("/nonexistent/sidwatch/store");
        assert!(reader.days().unwrap().is_empty());
        assert!(reader.read_events("20240101").unwrap().is_empty());
        assert!(reader.read_metadata("20240101").unwrap().is_none());
    }

    #[test]
    fn test_days_ignore_unrelated_entries() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("20240102")).unwrap();
        fs::create_dir_all(dir.path().join("20240101")).unwrap();
        fs::create_dir_all(dir.path().join("scratch")).unwrap();
        fs::write(dir.path().join("20240103"), "not a dir").unwrap();

        let reader = StoreReader::new(dir.path());
        assert_eq!(reader.days().unwrap(), vec!["20240101", "20240102"]);
    }

    #[test]
    fn test_temporary_parts_are_ignored() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(dir.path());
        let mut banded = BTreeMap::new();
        banded.insert("CH1".to_string(), vec![1.0, 2.0]);
        w.write_frame(0.0, &banded, &BTreeMap::new(), &[]).unwrap();

        let part_dir = dir.path().join("19700101/signals/channel=CH1");
        fs::write(part_dir.join(".part-x.parquet.tmp"), b"garbage").unwrap();

        let reader = StoreReader::new(dir.path());
        assert_eq!(reader.read_signals("19700101").unwrap().len(), 1);
    }

    #[test]
    fn test_rows_are_sorted_by_timestamp() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(dir.path());
        for ts in [3.0, 1.0, 2.0] {
            let mut banded = BTreeMap::new();
            banded.insert("B".to_string(), vec![ts]);
            banded.insert("A".to_string(), vec![ts]);
            w.write_frame(ts, &banded, &BTreeMap::new(), &[]).unwrap();
        }

        let rows = StoreReader::new(dir.path()).read_signals("19700101").unwrap();
        let order: Vec<(f64, &str)> = rows.iter().map(|r| (r.ts, r.channel.as_str())).collect();
        assert_eq!(
            order,
            vec![(1.0, "A"), (1.0, "B"), (2.0, "A"), (2.0, "B"), (3.0, "A"), (3.0, "B")]
        );
    }

    #[test]
    fn test_summary_counts_rows() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(dir.path());
        let mut banded = BTreeMap::new();
        banded.insert("CH1".to_string(), vec![0.5; 4]);
        let mut features = BTreeMap::new();
        features.insert(
            "CH1".to_string(),
            FeatureValues {
                rms: 0.5,
                mad: 0.0,
                snr: f64::INFINITY,
            },
        );
        let events = vec![
            EventRecord::sid_candidate(0.0, "CH1", 0.5),
            EventRecord::sid_candidate(0.0, "CH2", 0.7),
        ];
        w.write_frame(0.0, &banded, &features, &events).unwrap();
        w.write_frame(0.25, &banded, &BTreeMap::new(), &[]).unwrap();

        let reader = StoreReader::new(dir.path());
        let summary = reader.summary("19700101").unwrap();
        assert_eq!(summary.channels, vec!["CH1"]);
        assert_eq!(summary.signal_rows, 2);
        assert_eq!(summary.feature_rows, 1);
        assert_eq!(summary.event_rows, 2);
        assert!(summary.has_metadata);
        assert_eq!(reader.channels("19700101", Dataset::Events).unwrap(), vec!["CH1", "CH2"]);

        let features = reader.read_features("19700101").unwrap();
        assert_eq!(features[0].snr, f64::INFINITY);
    }
}
