//! Core station abstraction and runner for the staged pipeline.

use crate::pipeline::error::{ErrorReporter, StationError};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A processing station in the pipeline.
///
/// Each station receives input, processes it, and produces output.
/// In staged mode stations run in their own threads and are connected by
/// channels; in inline mode they are called one after another.
pub trait Station: Send + 'static {
    /// The input type this station receives.
    type Input: Send + 'static;
    /// The output type this station produces.
    type Output: Send + 'static;

    /// Processes a single input item.
    ///
    /// Returns:
    /// - `Ok(Some(output))` - Successfully processed and produced output
    /// - `Ok(None)` - Successfully processed but no output
    /// - `Err(StationError)` - Processing failed
    fn process(&mut self, input: Self::Input) -> Result<Option<Self::Output>, StationError>;

    /// Returns the name of this station for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Called when the station is shutting down.
    fn shutdown(&mut self) {}
}

/// Runs a station in a dedicated thread.
///
/// The thread ends when the input channel is closed and drained, when the
/// output channel is closed, or after a fatal error. Either way its own
/// channel ends are dropped, so shutdown cascades along the pipeline.
pub struct StationRunner {
    handle: Option<JoinHandle<()>>,
    station_name: &'static str,
}

impl StationRunner {
    /// Spawns a new station in a dedicated thread.
    pub fn spawn<S: Station>(
        mut station: S,
        input_rx: Receiver<S::Input>,
        output_tx: Sender<S::Output>,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let station_name = station.name();

        let handle = thread::Builder::new()
            .name(format!("sidwatch-{}", station_name))
            .spawn(move || {
                run_station(&mut station, input_rx, output_tx, error_reporter.as_ref());
            });

        match handle {
            Ok(handle) => Self {
                handle: Some(handle),
                station_name,
            },
            Err(e) => {
                // The station and its channel ends were dropped with the closure.
                tracing::error!(
                    station = station_name,
                    error = %e,
                    "failed to spawn station thread"
                );
                Self {
                    handle: None,
                    station_name,
                }
            }
        }
    }

    /// Waits for the station thread to complete.
    pub fn join(mut self) -> Result<(), String> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| format!("Station '{}' thread panicked", self.station_name)),
            None => Err(format!("Station '{}' thread never started", self.station_name)),
        }
    }

    /// True once the station thread has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Returns the name of the station.
    pub fn name(&self) -> &'static str {
        self.station_name
    }
}

/// Main processing loop for the station.
fn run_station<S: Station>(
    station: &mut S,
    input_rx: Receiver<S::Input>,
    output_tx: Sender<S::Output>,
    error_reporter: &dyn ErrorReporter,
) {
    let station_name = station.name();

    while let Ok(input) = input_rx.recv() {
        match station.process(input) {
            Ok(Some(output)) => {
                if output_tx.send(output).is_err() {
                    tracing::debug!(station = station_name, "output channel closed");
                    break;
                }
            }
            Ok(None) => {}
            Err(error @ StationError::Recoverable(_)) => {
                error_reporter.report(station_name, &error);
            }
            Err(error @ StationError::Fatal(_)) => {
                error_reporter.report(station_name, &error);
                break;
            }
        }
    }

    station.shutdown();
}
