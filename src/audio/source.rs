use crate::error::{Result, SidwatchError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for audio input sources.
///
/// This trait allows swapping implementations (sound card, WAV replay, mock).
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing and release the underlying handle.
    fn stop(&mut self) -> Result<()>;

    /// Block until exactly `count` samples of the first input channel are
    /// available and return them.
    ///
    /// Returns `Ok(None)` once a finite source cannot fill another block.
    fn read_exact(&mut self, count: usize) -> Result<Option<Vec<f32>>>;

    /// Sample rate delivered by `read_exact`.
    fn sample_rate(&self) -> u32;

    /// True if the source ends on its own (file replay, mock).
    fn is_finite(&self) -> bool {
        false
    }

    /// Epoch seconds of the first sample for sources with their own sample clock.
    ///
    /// `None` means chunks are stamped with wall-clock time on arrival.
    fn start_time(&self) -> Option<f64> {
        None
    }
}

impl AudioSource for Box<dyn AudioSource> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn read_exact(&mut self, count: usize) -> Result<Option<Vec<f32>>> {
        (**self).read_exact(count)
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn is_finite(&self) -> bool {
        (**self).is_finite()
    }

    fn start_time(&self) -> Option<f64> {
        (**self).start_time()
    }
}

/// Mock audio source for testing
///
/// Replays a fixed sample buffer once, then reports end of stream.
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    started: Arc<AtomicBool>,
    samples: Vec<f32>,
    position: usize,
    sample_rate: u32,
    start_time: Option<f64>,
    should_fail_start: bool,
    should_fail_stop: bool,
    fail_read_after: Option<usize>,
    reads: usize,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock audio source with one second of silence at 1 kHz
    pub fn new() -> Self {
        Self {
            started: Arc::new(AtomicBool::new(false)),
            samples: vec![0.0; 1000],
            position: 0,
            sample_rate: 1000,
            start_time: None,
            should_fail_start: false,
            should_fail_stop: false,
            fail_read_after: None,
            reads: 0,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Configure the mock to return specific samples
    pub fn with_samples(mut self, samples: Vec<f32>) -> Self {
        self.samples = samples;
        self
    }

    /// Configure the reported sample rate
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Stamp chunks from a sample clock starting at `epoch_seconds`
    pub fn with_start_time(mut self, epoch_seconds: f64) -> Self {
        self.start_time = Some(epoch_seconds);
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on stop
    pub fn with_stop_failure(mut self) -> Self {
        self.should_fail_stop = true;
        self
    }

    /// Configure the mock to fail on every read
    pub fn with_read_failure(self) -> Self {
        self.with_read_failure_after(0)
    }

    /// Configure the mock to fail once `reads` reads have succeeded
    pub fn with_read_failure_after(mut self, reads: usize) -> Self {
        self.fail_read_after = Some(reads);
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Shared started flag, still observable after the mock is moved away
    pub fn started_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.started)
    }

    fn failure(&self) -> SidwatchError {
        SidwatchError::Acquisition {
            message: self.error_message.clone(),
        }
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(self.failure())
        } else {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        if self.should_fail_stop {
            Err(self.failure())
        } else {
            Ok(())
        }
    }

    fn read_exact(&mut self, count: usize) -> Result<Option<Vec<f32>>> {
        if !self.is_started() {
            return Err(SidwatchError::Acquisition {
                message: "source not started".to_string(),
            });
        }
        if self.fail_read_after.is_some_and(|n| self.reads >= n) {
            return Err(self.failure());
        }
        self.reads += 1;

        let end = self.position + count;
        if end > self.samples.len() {
            return Ok(None);
        }
        let block = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(Some(block))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_finite(&self) -> bool {
        true
    }

    fn start_time(&self) -> Option<f64> {
        self.start_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(source: MockAudioSource) -> MockAudioSource {
        let mut source = source;
        source.start().unwrap();
        source
    }

    #[test]
    fn test_mock_audio_source_returns_configured_samples() {
        let test_samples = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let mut source = started(MockAudioSource::new().with_samples(test_samples));

        assert_eq!(source.read_exact(3).unwrap(), Some(vec![0.1, 0.2, 0.3]));
        assert_eq!(source.read_exact(3).unwrap(), Some(vec![0.4, 0.5, 0.6]));
    }

    #[test]
    fn test_mock_audio_source_ends_when_block_cannot_be_filled() {
        let mut source = started(MockAudioSource::new().with_samples(vec![1.0; 5]));

        assert!(source.read_exact(3).unwrap().is_some());
        assert_eq!(source.read_exact(3).unwrap(), None);
    }

    #[test]
    fn test_mock_audio_source_default_is_one_second_of_silence() {
        let mut source = started(MockAudioSource::new());

        assert_eq!(source.sample_rate(), 1000);
        let block = source.read_exact(1000).unwrap().unwrap();
        assert!(block.iter().all(|&s| s == 0.0));
        assert!(source.is_finite());
        assert_eq!(source.start_time(), None);
    }

    #[test]
    fn test_mock_audio_source_returns_read_error_when_configured() {
        let mut source = started(MockAudioSource::new().with_read_failure());

        match source.read_exact(10) {
            Err(SidwatchError::Acquisition { message }) => {
                assert_eq!(message, "mock audio error");
            }
            _ => panic!("Expected Acquisition error"),
        }
    }

    #[test]
    fn test_mock_audio_source_fails_after_configured_reads() {
        let mut source = started(
            MockAudioSource::new()
                .with_read_failure_after(2)
                .with_error_message("device removed"),
        );

        assert!(source.read_exact(10).is_ok());
        assert!(source.read_exact(10).is_ok());
        match source.read_exact(10) {
            Err(SidwatchError::Acquisition { message }) => assert_eq!(message, "device removed"),
            _ => panic!("Expected Acquisition error"),
        }
    }

    #[test]
    fn test_mock_audio_source_requires_start() {
        let mut source = MockAudioSource::new();
        assert!(source.read_exact(1).is_err());
    }

    #[test]
    fn test_mock_audio_source_start_stop_lifecycle() {
        let mut source = MockAudioSource::new();
        let flag = source.started_flag();

        assert!(!source.is_started());
        source.start().unwrap();
        assert!(flag.load(Ordering::SeqCst));
        source.stop().unwrap();
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_mock_audio_source_start_failure() {
        let mut source = MockAudioSource::new().with_start_failure();
        assert!(source.start().is_err());
        assert!(!source.is_started());
    }

    #[test]
    fn test_mock_audio_source_stop_failure_still_releases() {
        let mut source = started(MockAudioSource::new().with_stop_failure());
        assert!(source.stop().is_err());
        assert!(!source.is_started());
    }

    #[test]
    fn test_can_be_used_as_trait_object() {
        let mut source: Box<dyn AudioSource> =
            Box::new(MockAudioSource::new().with_sample_rate(8000).with_start_time(10.0));

        assert!(source.start().is_ok());
        assert_eq!(source.sample_rate(), 8000);
        assert_eq!(source.start_time(), Some(10.0));
        assert!(source.read_exact(100).unwrap().is_some());
        assert!(source.stop().is_ok());
    }
}
