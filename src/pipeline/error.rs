//! Error types and reporting for pipeline stations.

use crate::error::SidwatchError;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Errors that can occur during station processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationError {
    /// Recoverable error that allows the station to continue processing.
    Recoverable(String),
    /// Fatal error that requires the station to shut down.
    Fatal(String),
}

impl StationError {
    pub fn fatal(error: impl fmt::Display) -> Self {
        StationError::Fatal(error.to_string())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StationError::Fatal(_))
    }
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StationError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StationError {}

/// Trait for reporting station errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a station.
    fn report(&self, station: &str, error: &StationError);
}

/// Reports station errors through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, station: &str, error: &StationError) {
        match error {
            StationError::Recoverable(msg) => tracing::warn!(station, "{}", msg),
            StationError::Fatal(msg) => tracing::error!(station, "{}", msg),
        }
    }
}

/// Holds the first error that ended a pipeline run.
///
/// Later errors are usually consequences of the first (closed channels,
/// aborted writes) and are only logged.
#[derive(Debug, Default)]
pub struct FirstFailure {
    slot: Mutex<Option<SidwatchError>>,
}

impl FirstFailure {
    pub fn record(&self, error: SidwatchError) {
        match self.slot.lock() {
            Ok(mut slot) if slot.is_none() => *slot = Some(error),
            Ok(_) => tracing::debug!(error = %error, "later pipeline error ignored"),
            Err(_) => tracing::error!(error = %error, "failure slot poisoned"),
        }
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(true)
    }

    pub fn take(&self) -> Option<SidwatchError> {
        self.slot.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Forwards to an inner reporter and keeps the first fatal error.
pub struct FailureReporter {
    inner: Arc<dyn ErrorReporter>,
    failure: Arc<FirstFailure>,
}

impl FailureReporter {
    pub fn new(inner: Arc<dyn ErrorReporter>, failure: Arc<FirstFailure>) -> Self {
        Self { inner, failure }
    }
}

impl ErrorReporter for FailureReporter {
    fn report(&self, station: &str, error: &StationError) {
        if let StationError::Fatal(message) = error {
            self.failure.record(SidwatchError::Station {
                station: station.to_string(),
                message: message.clone(),
            });
        }
        self.inner.report(station, error);
    }
}
