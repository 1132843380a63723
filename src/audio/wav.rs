//! WAV file replay source.
//!
//! Replays a recorded receiver capture through the same pipeline as a live
//! device. Chunks are stamped from the file's sample clock, and the source
//! ends once the file cannot fill another chunk.

use crate::audio::source::AudioSource;
use crate::error::{Result, SidwatchError};
use std::io::{BufReader, Read};
use std::path::Path;

/// Audio source that reads from WAV file data.
///
/// Multi-channel files are reduced to their first channel. Integer samples
/// are scaled to [-1, 1).
pub struct WavFileSource {
    reader: hound::WavReader<Box<dyn Read + Send>>,
    spec: hound::WavSpec,
    total_frames: u32,
    frames_read: u32,
    start_time: f64,
    started: bool,
}

fn parse_error(e: hound::Error) -> SidwatchError {
    SidwatchError::AudioFormat {
        message: format!("Failed to parse WAV file: {}", e),
    }
}

impl WavFileSource {
    /// Open a WAV file. Timestamps start at `start_time` epoch seconds.
    pub fn open(path: &Path, start_time: f64) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| SidwatchError::Acquisition {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(Box::new(BufReader::new(file)), start_time)
    }

    /// Create from any reader (for testing/flexibility).
    pub fn from_reader(reader: Box<dyn Read + Send>, start_time: f64) -> Result<Self> {
        let reader = hound::WavReader::new(reader).map_err(parse_error)?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(SidwatchError::AudioFormat {
                message: "WAV file has no channels".to_string(),
            });
        }
        if spec.sample_format == hound::SampleFormat::Float && spec.bits_per_sample != 32 {
            return Err(SidwatchError::AudioFormat {
                message: format!("unsupported float width: {} bits", spec.bits_per_sample),
            });
        }
        Ok(Self {
            total_frames: reader.duration(),
            frames_read: 0,
            reader,
            spec,
            start_time,
            started: false,
        })
    }

    pub fn spec(&self) -> hound::WavSpec {
        self.spec
    }

    /// Frames left in the file.
    pub fn remaining_frames(&self) -> u32 {
        self.total_frames.saturating_sub(self.frames_read)
    }

    fn read_frames(&mut self, count: usize) -> Result<Vec<f32>> {
        let channels = usize::from(self.spec.channels);
        let wanted = count * channels;
        let interleaved: Vec<f32> = match self.spec.sample_format {
            hound::SampleFormat::Float => self
                .reader
                .samples::<f32>()
                .take(wanted)
                .collect::<std::result::Result<_, _>>()
                .map_err(read_error)?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (self.spec.bits_per_sample - 1)) as f32;
                self.reader
                    .samples::<i32>()
                    .take(wanted)
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(read_error)?
            }
        };
        if interleaved.len() < wanted {
            return Err(SidwatchError::Acquisition {
                message: "WAV data ended before the declared length".to_string(),
            });
        }
        self.frames_read += count as u32;
        Ok(interleaved.into_iter().step_by(channels).collect())
    }
}

fn read_error(e: hound::Error) -> SidwatchError {
    SidwatchError::Acquisition {
        message: format!("Failed to read WAV samples: {}", e),
    }
}

impl AudioSource for WavFileSource {
    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        Ok(())
    }

    fn read_exact(&mut self, count: usize) -> Result<Option<Vec<f32>>> {
        if !self.started {
            return Err(SidwatchError::Acquisition {
                message: "WAV source not started".to_string(),
            });
        }
        if (self.remaining_frames() as usize) < count {
            return Ok(None);
        }
        self.read_frames(count).map(Some)
    }

    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn is_finite(&self) -> bool {
        true
    }

    fn start_time(&self) -> Option<f64> {
        Some(self.start_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn make_float_wav_data(sample_rate: u32, samples: &[f32]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn source(data: Vec<u8>) -> WavFileSource {
        let mut source = WavFileSource::from_reader(Box::new(Cursor::new(data)), 100.0).unwrap();
        source.start().unwrap();
        source
    }

    #[test]
    fn test_int_samples_are_scaled() {
        let mut src = source(make_wav_data(96000, 1, &[0, 16384, -16384, i16::MIN]));

        assert_eq!(src.sample_rate(), 96000);
        let block = src.read_exact(4).unwrap().unwrap();
        assert_eq!(block, vec![0.0, 0.5, -0.5, -1.0]);
    }

    #[test]
    fn test_float_samples_pass_through() {
        let mut src = source(make_float_wav_data(48000, &[0.25, -0.75]));
        assert_eq!(src.read_exact(2).unwrap(), Some(vec![0.25, -0.75]));
    }

    #[test]
    fn test_stereo_takes_first_channel() {
        let mut src = source(make_wav_data(48000, 2, &[100, -1, 200, -2, 300, -3]));
        let block = src.read_exact(3).unwrap().unwrap();
        let expected: Vec<f32> = [100.0, 200.0, 300.0].iter().map(|v| v / 32768.0).collect();
        assert_eq!(block, expected);
    }

    #[test]
    fn test_reads_continue_and_end_at_short_tail() {
        let samples: Vec<i16> = (0..10).collect();
        let mut src = source(make_wav_data(8000, 1, &samples));

        assert_eq!(src.remaining_frames(), 10);
        let first = src.read_exact(4).unwrap().unwrap();
        let second = src.read_exact(4).unwrap().unwrap();
        assert_eq!(first[1], 1.0 / 32768.0);
        assert_eq!(second[0], 4.0 / 32768.0);
        assert_eq!(src.remaining_frames(), 2);
        assert_eq!(src.read_exact(4).unwrap(), None);
    }

    #[test]
    fn test_reports_sample_clock() {
        let src = source(make_wav_data(8000, 1, &[0; 8]));
        assert!(src.is_finite());
        assert_eq!(src.start_time(), Some(100.0));
    }

    #[test]
    fn test_invalid_wav_data_returns_error() {
        let result = WavFileSource::from_reader(Box::new(Cursor::new(vec![0u8, 1, 2, 3])), 0.0);
        match result {
            Err(SidwatchError::AudioFormat { message }) => {
                assert!(message.contains("Failed to parse WAV file"));
            }
            _ => panic!("Expected AudioFormat error"),
        }
    }

    #[test]
    fn test_missing_file_is_acquisition_error() {
        let result = WavFileSource::open(Path::new("/nonexistent/capture.wav"), 0.0);
        assert!(matches!(result, Err(SidwatchError::Acquisition { .. })));
    }
}
