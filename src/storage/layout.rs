//! Directory layout of the partitioned store.
//!
//! ```text
//! <root>/<YYYYMMDD>/signals/channel=<name>/*.parquet
//! <root>/<YYYYMMDD>/features/channel=<name>/*.parquet
//! <root>/<YYYYMMDD>/events/*.parquet
//! <root>/<YYYYMMDD>/metadata.json
//! ```

use crate::error::{Result, SidwatchError};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

pub const METADATA_FILE: &str = "metadata.json";
pub const PARTITION_KEY: &str = "channel";
pub const PART_EXTENSION: &str = "parquet";

/// The three persisted datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
    Signals,
    Features,
    Events,
}

impl Dataset {
    pub fn dir_name(self) -> &'static str {
        match self {
            Dataset::Signals => "signals",
            Dataset::Features => "features",
            Dataset::Events => "events",
        }
    }

    /// Signals and features are split into one directory per channel.
    pub fn is_partitioned(self) -> bool {
        !matches!(self, Dataset::Events)
    }
}

/// UTC calendar day (`YYYYMMDD`) of an epoch timestamp in seconds.
pub fn day_of(ts: f64) -> Result<String> {
    let datetime = timestamp_to_datetime(ts)?;
    Ok(datetime.format("%Y%m%d").to_string())
}

fn timestamp_to_datetime(ts: f64) -> Result<DateTime<Utc>> {
    let out_of_range = || SidwatchError::Storage {
        path: String::new(),
        message: format!("timestamp {} is not a representable UTC time", ts),
    };
    if !ts.is_finite() {
        return Err(out_of_range());
    }
    let secs = ts.floor();
    let nanos = ((ts - secs) * 1e9).clamp(0.0, 999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos).ok_or_else(out_of_range)
}

/// True if `name` looks like a day directory.
pub fn is_day_name(name: &str) -> bool {
    name.len() == 8 && name.bytes().all(|b| b.is_ascii_digit())
}

/// Directory name of a channel partition (`channel=<name>`).
pub fn partition_dir_name(channel: &str) -> String {
    format!("{}={}", PARTITION_KEY, channel)
}

/// Channel name encoded in a partition directory name.
pub fn parse_partition_dir_name(name: &str) -> Option<&str> {
    name.strip_prefix(PARTITION_KEY)?.strip_prefix('=')
}

/// Resolves store paths under a root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn day_dir(&self, day: &str) -> PathBuf {
        self.root.join(day)
    }

    pub fn dataset_dir(&self, day: &str, dataset: Dataset) -> PathBuf {
        self.day_dir(day).join(dataset.dir_name())
    }

    /// Directory holding part files of `dataset` for `channel`.
    ///
    /// Unpartitioned datasets ignore `channel`.
    pub fn part_dir(&self, day: &str, dataset: Dataset, channel: &str) -> PathBuf {
        let dir = self.dataset_dir(day, dataset);
        if dataset.is_partitioned() {
            dir.join(partition_dir_name(channel))
        } else {
            dir
        }
    }

    pub fn metadata_path(&self, day: &str) -> PathBuf {
        self.day_dir(day).join(METADATA_FILE)
    }
}
