//! Acquisition-to-storage pipeline that runs from startup until shutdown.

use crate::audio::{Acquirer, AudioChunk, AudioSource, Clock};
use crate::config::{Backpressure, Config, PipelineMode};
use crate::error::{Result, SidwatchError};
use crate::pipeline::error::{
    ErrorReporter, FailureReporter, FirstFailure, LogReporter, StationError,
};
use crate::pipeline::station::{Station, StationRunner};
use crate::pipeline::stations::{DetectorStation, FeatureStation, FilterStation, StoreStation};
use crate::pipeline::types::{PipelineStats, PipelineSummary};
use crate::processing::{ChannelBank, CusumConfig, EventDetector, FeatureExtractor};
use crate::storage::{StationMetadata, StoreWriter};
use crossbeam_channel::{Sender, TrySendError, bounded};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// Acquirer → ChannelBank → FeatureExtractor → EventDetector → StoreWriter.
///
/// All components are built from the configuration up front, so filter and
/// storage problems are reported before any audio is read.
pub struct Pipeline {
    mode: PipelineMode,
    queue_depth: usize,
    backpressure: Backpressure,
    chunk_samples: usize,
    sample_rate: u32,
    filter: FilterStation,
    features: FeatureStation,
    detector: DetectorStation,
    store: StoreStation,
    stats: Arc<PipelineStats>,
    error_reporter: Arc<dyn ErrorReporter>,
    clock: Option<Box<dyn Clock>>,
}

impl Pipeline {
    /// Validate `config` and build every stage.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let specs = config.channel_specs()?;
        let p = &config.processing;

        let bank = ChannelBank::with_order(&specs, config.audio.sample_rate, p.filter_order)?;
        let extractor = FeatureExtractor::new(config.window_samples(), config.step_samples())?;
        let cusum =
            CusumConfig::from_sensitivity(p.sensitivity)?.with_reset_on_fire(p.reset_on_fire);
        let metadata = StationMetadata::from_config(config, specs);
        let writer = StoreWriter::new(&config.data.path, metadata)?;
        let stats = Arc::new(PipelineStats::default());

        Ok(Self {
            mode: config.pipeline.mode,
            queue_depth: config.pipeline.queue_depth,
            backpressure: config.pipeline.backpressure,
            chunk_samples: config.chunk_samples(),
            sample_rate: config.audio.sample_rate,
            filter: FilterStation::new(bank),
            features: FeatureStation::new(extractor),
            detector: DetectorStation::new(EventDetector::new(cusum)),
            store: StoreStation::new(writer, Arc::clone(&stats)),
            stats,
            error_reporter: Arc::new(LogReporter),
            clock: None,
        })
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    /// Sets the wall clock used for sources without a sample clock.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    pub fn with_mode(mut self, mode: PipelineMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    /// Open `source` and start processing in the background.
    ///
    /// Fails without spawning anything if the source cannot be started or
    /// delivers a different sample rate than the filters were designed for.
    pub fn start<S: AudioSource + 'static>(self, source: S) -> Result<PipelineHandle> {
        if source.sample_rate() != self.sample_rate {
            return Err(SidwatchError::AudioFormat {
                message: format!(
                    "source delivers {} Hz but the channel bank is designed for {} Hz",
                    source.sample_rate(),
                    self.sample_rate
                ),
            });
        }

        let mut acquirer = Acquirer::open(source, self.chunk_samples)?;
        if let Some(clock) = self.clock {
            acquirer = acquirer.with_clock(clock);
        }

        let running = Arc::new(AtomicBool::new(true));
        let failure = Arc::new(FirstFailure::default());
        let reporter: Arc<dyn ErrorReporter> = Arc::new(FailureReporter::new(
            self.error_reporter,
            Arc::clone(&failure),
        ));
        tracing::info!(
            mode = ?self.mode,
            queue_depth = self.queue_depth,
            backpressure = ?self.backpressure,
            "pipeline starting"
        );

        let (driver, runners, helpers) = match self.mode {
            PipelineMode::Inline => {
                let stages = InlineStages {
                    filter: self.filter,
                    features: self.features,
                    detector: self.detector,
                    store: self.store,
                };
                let ctx = LoopContext::new(&running, &failure, &self.stats);
                let driver = spawn_named("sidwatch-inline", move || {
                    run_inline(acquirer, stages, reporter.as_ref(), ctx)
                })?;
                (driver, Vec::new(), Vec::new())
            }
            PipelineMode::Staged => {
                let depth = self.queue_depth;
                let (chunk_tx, chunk_rx) = bounded(depth);
                let (filtered_tx, filtered_rx) = bounded(depth);
                let (featured_tx, featured_rx) = bounded(depth);
                let (detected_tx, detected_rx) = bounded(depth);
                let (stored_tx, stored_rx) = bounded(depth);

                let runners = vec![
                    StationRunner::spawn(
                        self.filter,
                        chunk_rx,
                        filtered_tx,
                        Arc::clone(&reporter),
                    ),
                    StationRunner::spawn(
                        self.features,
                        filtered_rx,
                        featured_tx,
                        Arc::clone(&reporter),
                    ),
                    StationRunner::spawn(
                        self.detector,
                        featured_rx,
                        detected_tx,
                        Arc::clone(&reporter),
                    ),
                    StationRunner::spawn(self.store, detected_rx, stored_tx, reporter),
                ];
                let drain = spawn_named("sidwatch-drain", move || {
                    for stored in stored_rx {
                        tracing::trace!(
                            seq = stored.seq,
                            ts = stored.timestamp,
                            "frame acknowledged"
                        );
                    }
                })?;

                let backpressure = self.backpressure;
                let ctx = LoopContext::new(&running, &failure, &self.stats);
                let driver = spawn_named("sidwatch-acquire", move || {
                    run_acquisition(acquirer, chunk_tx, backpressure, ctx)
                })?;
                (driver, runners, vec![drain])
            }
        };

        Ok(PipelineHandle {
            running,
            failure,
            stats: self.stats,
            driver: Some(driver),
            runners,
            helpers,
        })
    }

    /// Start and block until the source ends or a stage fails.
    pub fn run<S: AudioSource + 'static>(self, source: S) -> Result<PipelineSummary> {
        self.start(source)?.wait()
    }
}

fn spawn_named<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(SidwatchError::Io)
}

/// Shared run state handed to the acquisition or inline loop.
struct LoopContext {
    running: Arc<AtomicBool>,
    failure: Arc<FirstFailure>,
    stats: Arc<PipelineStats>,
}

impl LoopContext {
    fn new(
        running: &Arc<AtomicBool>,
        failure: &Arc<FirstFailure>,
        stats: &Arc<PipelineStats>,
    ) -> Self {
        Self {
            running: Arc::clone(running),
            failure: Arc::clone(failure),
            stats: Arc::clone(stats),
        }
    }

    /// Pull the next chunk, recording a read failure.
    fn next_chunk<S: AudioSource>(&self, acquirer: &mut Acquirer<S>) -> Option<AudioChunk> {
        if !self.running.load(Ordering::SeqCst) {
            tracing::info!("stop requested");
            return None;
        }
        match acquirer.next_chunk() {
            Ok(Some(chunk)) => {
                self.stats.record_acquired();
                Some(chunk)
            }
            Ok(None) => None,
            Err(e) => {
                self.failure.record(e);
                None
            }
        }
    }

    fn finish<S: AudioSource>(&self, acquirer: Acquirer<S>) {
        if let Err(e) = acquirer.close() {
            tracing::warn!(error = %e, "failed to stop audio source");
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Feeds chunks into the first stage queue until the source ends, a stop is
/// requested, or the stages shut down.
fn run_acquisition<S: AudioSource>(
    mut acquirer: Acquirer<S>,
    chunk_tx: Sender<AudioChunk>,
    backpressure: Backpressure,
    ctx: LoopContext,
) {
    while let Some(chunk) = ctx.next_chunk(&mut acquirer) {
        let delivered = match backpressure {
            Backpressure::Block => chunk_tx.send(chunk).is_ok(),
            Backpressure::DropNewest => match chunk_tx.try_send(chunk) {
                Ok(()) => true,
                Err(TrySendError::Full(chunk)) => {
                    ctx.stats.record_dropped();
                    tracing::warn!(seq = chunk.seq, "stage queue full, chunk dropped");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
        };
        if !delivered {
            tracing::debug!("filter stage closed, acquisition ending");
            break;
        }
    }
    ctx.finish(acquirer);
}

struct InlineStages {
    filter: FilterStation,
    features: FeatureStation,
    detector: DetectorStation,
    store: StoreStation,
}

/// Runs all four stations synchronously for each chunk.
fn run_inline<S: AudioSource>(
    mut acquirer: Acquirer<S>,
    mut stages: InlineStages,
    reporter: &dyn ErrorReporter,
    ctx: LoopContext,
) {
    while let Some(chunk) = ctx.next_chunk(&mut acquirer) {
        let ControlFlow::Continue(frame) =
            inline_step(&mut stages.filter, Some(chunk), reporter)
        else {
            break;
        };
        let ControlFlow::Continue(frame) = inline_step(&mut stages.features, frame, reporter) else {
            break;
        };
        let ControlFlow::Continue(frame) = inline_step(&mut stages.detector, frame, reporter) else {
            break;
        };
        let ControlFlow::Continue(_) = inline_step(&mut stages.store, frame, reporter) else {
            break;
        };
    }
    ctx.finish(acquirer);

    stages.filter.shutdown();
    stages.features.shutdown();
    stages.detector.shutdown();
    stages.store.shutdown();
}

/// One station call with the same error semantics as a `StationRunner`.
fn inline_step<S: Station>(
    station: &mut S,
    input: Option<S::Input>,
    reporter: &dyn ErrorReporter,
) -> ControlFlow<(), Option<S::Output>> {
    let Some(input) = input else {
        return ControlFlow::Continue(None);
    };
    match station.process(input) {
        Ok(output) => ControlFlow::Continue(output),
        Err(error @ StationError::Recoverable(_)) => {
            reporter.report(station.name(), &error);
            ControlFlow::Continue(None)
        }
        Err(error @ StationError::Fatal(_)) => {
            reporter.report(station.name(), &error);
            ControlFlow::Break(())
        }
    }
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    running: Arc<AtomicBool>,
    failure: Arc<FirstFailure>,
    stats: Arc<PipelineStats>,
    /// Acquisition thread (staged) or the inline loop.
    driver: Option<JoinHandle<()>>,
    runners: Vec<StationRunner>,
    helpers: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Current counters.
    pub fn stats(&self) -> PipelineSummary {
        self.stats.snapshot()
    }

    /// False once acquisition has ended for any reason.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// True once every pipeline thread has returned.
    pub fn is_finished(&self) -> bool {
        self.driver.as_ref().is_none_or(JoinHandle::is_finished)
            && self.runners.iter().all(StationRunner::is_finished)
            && self.helpers.iter().all(JoinHandle::is_finished)
    }

    /// Halt acquisition, let queued chunks drain, and wait for every stage.
    pub fn stop(self) -> Result<PipelineSummary> {
        self.running.store(false, Ordering::SeqCst);
        self.wait()
    }

    /// Wait until the pipeline ends on its own.
    ///
    /// Returns the final counters, or the first error that ended the run.
    pub fn wait(mut self) -> Result<PipelineSummary> {
        if let Some(driver) = self.driver.take()
            && driver.join().is_err()
        {
            self.failure
                .record(SidwatchError::Other("acquisition thread panicked".to_string()));
        }
        for runner in self.runners.drain(..) {
            if let Err(msg) = runner.join() {
                self.failure.record(SidwatchError::Other(msg));
            }
        }
        for helper in self.helpers.drain(..) {
            if helper.join().is_err() {
                tracing::error!("pipeline helper thread panicked");
            }
        }

        let summary = self.stats.snapshot();
        match self.failure.take() {
            Some(error) => Err(error),
            None => {
                tracing::info!(
                    acquired = summary.chunks_acquired,
                    dropped = summary.chunks_dropped,
                    stored = summary.chunks_stored,
                    events = summary.events,
                    "pipeline finished"
                );
                Ok(summary)
            }
        }
    }
}
