//! Scoped acquisition of fixed-size, time-stamped audio chunks.
//!
//! [`Acquirer::open`] starts the source; dropping the acquirer stops it on
//! every exit path. While open it yields a lazy, non-restartable sequence of
//! chunks, each pull blocking until a full chunk is available.

use crate::audio::source::AudioSource;
use crate::error::{Result, SidwatchError};
use chrono::Utc;

/// Minimum spacing enforced between consecutive chunk timestamps.
const MIN_TIMESTAMP_STEP: f64 = 1e-6;

/// Source of wall-clock time in epoch seconds.
pub trait Clock: Send {
    fn now(&self) -> f64;
}

impl Clock for Box<dyn Clock> {
    fn now(&self) -> f64 {
        (**self).now()
    }
}

/// UTC system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1e6
    }
}

/// A fixed-length block of first-channel samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Position in the run, starting at 0 and contiguous.
    pub seq: u64,
    /// Epoch seconds (UTC) at which the chunk was complete.
    pub timestamp: f64,
    pub samples: Vec<f32>,
}

pub struct Acquirer<S: AudioSource> {
    source: S,
    chunk_samples: usize,
    sample_rate: u32,
    clock: Box<dyn Clock>,
    next_seq: u64,
    last_timestamp: Option<f64>,
    active: bool,
    finished: bool,
}

impl<S: AudioSource> Acquirer<S> {
    /// Start `source` and prepare to read chunks of `chunk_samples`.
    ///
    /// If starting fails the source is stopped again before the error is returned.
    pub fn open(mut source: S, chunk_samples: usize) -> Result<Self> {
        if chunk_samples == 0 {
            return Err(SidwatchError::ConfigInvalidValue {
                key: "audio.chunk_ms".to_string(),
                message: "chunk must hold at least one sample".to_string(),
            });
        }
        if let Err(e) = source.start() {
            if let Err(stop_err) = source.stop() {
                tracing::warn!(error = %stop_err, "failed to release source after start failure");
            }
            return Err(e);
        }

        let sample_rate = source.sample_rate();
        tracing::info!(
            sample_rate,
            chunk_samples,
            finite = source.is_finite(),
            "acquisition started"
        );
        Ok(Self {
            source,
            chunk_samples,
            sample_rate,
            clock: Box::new(SystemClock),
            next_seq: 0,
            last_timestamp: None,
            active: true,
            finished: false,
        })
    }

    /// Replace the wall clock used for sources without a sample clock.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Chunks produced so far.
    pub fn chunks_read(&self) -> u64 {
        self.next_seq
    }

    /// Block until the next chunk is available.
    ///
    /// Returns `Ok(None)` when a finite source is exhausted. After an error or
    /// the end of the source, every further call returns `Ok(None)`.
    pub fn next_chunk(&mut self) -> Result<Option<AudioChunk>> {
        if self.finished {
            return Ok(None);
        }
        match self.source.read_exact(self.chunk_samples) {
            Ok(Some(samples)) => {
                let chunk = AudioChunk {
                    seq: self.next_seq,
                    timestamp: self.stamp(),
                    samples,
                };
                self.next_seq += 1;
                Ok(Some(chunk))
            }
            Ok(None) => {
                self.finished = true;
                tracing::info!(chunks = self.next_seq, "audio source exhausted");
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                tracing::error!(error = %e, chunks = self.next_seq, "acquisition failed");
                Err(e)
            }
        }
    }

    /// Timestamp of the chunk about to be emitted, strictly after the previous one.
    fn stamp(&mut self) -> f64 {
        let ts = match self.source.start_time() {
            Some(start) => {
                let samples_done = (self.next_seq + 1) as f64 * self.chunk_samples as f64;
                start + samples_done / f64::from(self.sample_rate)
            }
            None => self.clock.now(),
        };
        let ts = match self.last_timestamp {
            Some(last) if ts <= last => last + MIN_TIMESTAMP_STEP,
            _ => ts,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    /// Stop the source now and report any error from stopping it.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.finished = true;
        self.source.stop()?;
        tracing::info!(chunks = self.next_seq, "acquisition stopped");
        Ok(())
    }
}

impl<S: AudioSource> Iterator for Acquirer<S> {
    type Item = Result<AudioChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

impl<S: AudioSource> Drop for Acquirer<S> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "failed to stop audio source");
        }
    }
}
