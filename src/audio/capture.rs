//! Sound card capture using CPAL (Cross-Platform Audio Library).
//!
//! The CPAL callback forwards first-channel blocks through a bounded channel.
//! If the reader falls behind and the channel fills up, blocks are lost and the
//! next read reports an overrun instead of silently splicing the stream.

use crate::audio::source::AudioSource;
use crate::error::{Result, SidwatchError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Callback blocks buffered between the audio thread and the reader.
const BLOCK_QUEUE_DEPTH: usize = 256;

/// A read that sees no audio for this long fails.
const STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Suppress noisy JACK/ALSA error messages that occur during audio backend probing.
///
/// # Safety
/// This modifies environment variables which is safe when called before spawning threads.
pub fn suppress_audio_warnings() {
    // SAFETY: Called at startup before any threads are spawned
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Device name patterns to filter out (outputs and surround sub-devices).
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

/// Check if a device name should be filtered out.
fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

/// An input device as shown by `sidwatch devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    /// Highest sample rate any supported config offers.
    pub max_sample_rate: Option<u32>,
}

impl DeviceInfo {
    /// Highest transmitter frequency this device can monitor.
    pub fn nyquist_hz(&self) -> Option<u32> {
        self.max_sample_rate.map(|rate| rate / 2)
    }
}

/// List available audio input devices.
///
/// Filters out obviously unusable devices (surround channels, HDMI, etc.).
///
/// # Errors
/// Returns `SidwatchError::Acquisition` if device enumeration fails.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());
        let devices = host
            .input_devices()
            .map_err(|e| SidwatchError::Acquisition {
                message: format!("Failed to enumerate input devices: {}", e),
            })?;

        let mut infos = Vec::new();
        for device in devices {
            let Ok(name) = device.name() else {
                continue;
            };
            if should_filter_device(&name) {
                continue;
            }
            let max_sample_rate = device
                .supported_input_configs()
                .ok()
                .and_then(|configs| configs.map(|c| c.max_sample_rate().0).max());
            infos.push(DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                max_sample_rate,
            });
        }
        Ok(infos)
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: The stream is only touched from the thread that owns the
/// `CpalAudioSource`; it is created in `start` and dropped in `stop`.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// State shared with the CPAL callbacks.
#[derive(Default)]
struct CallbackState {
    dropped_blocks: AtomicU64,
    stream_error: Mutex<Option<String>>,
}

/// Real audio capture implementation using CPAL.
///
/// Captures at exactly the configured sample rate; the device must support it
/// natively or through the sound server. No resampling is done, since the
/// channel filters depend on the true rate.
pub struct CpalAudioSource {
    device: cpal::Device,
    device_name: String,
    sample_rate: u32,
    channels: u16,
    stream: Option<SendableStream>,
    receiver: Option<Receiver<Vec<f32>>>,
    pending: Vec<f32>,
    state: Arc<CallbackState>,
}

impl CpalAudioSource {
    /// Open a capture device.
    ///
    /// # Arguments
    /// * `device_name` - Optional device name. If None, uses the default input device.
    /// * `sample_rate` - Capture rate in Hz
    /// * `channels` - Interleaved channels requested; only the first is used
    ///
    /// # Errors
    /// Returns `AudioDeviceNotFound` if no matching device exists.
    pub fn new(device_name: Option<&str>, sample_rate: u32, channels: u16) -> Result<Self> {
        let device = with_suppressed_stderr(|| {
            let host = cpal::default_host();

            if let Some(name) = device_name {
                let devices = host
                    .input_devices()
                    .map_err(|e| SidwatchError::Acquisition {
                        message: format!("Failed to enumerate devices: {}", e),
                    })?;

                let mut found_device = None;
                for dev in devices {
                    if let Ok(dev_name) = dev.name()
                        && dev_name == name
                    {
                        found_device = Some(dev);
                        break;
                    }
                }

                found_device.ok_or_else(|| SidwatchError::AudioDeviceNotFound {
                    device: name.to_string(),
                })
            } else {
                host.default_input_device()
                    .ok_or_else(|| SidwatchError::AudioDeviceNotFound {
                        device: "default".to_string(),
                    })
            }
        })?;

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        Ok(Self {
            device,
            device_name,
            sample_rate,
            channels: channels.max(1),
            stream: None,
            receiver: None,
            pending: Vec::new(),
            state: Arc::new(CallbackState::default()),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Build the input stream, trying f32 samples first and i16 second.
    fn build_stream(&self, sender: Sender<Vec<f32>>) -> Result<cpal::Stream> {
        let config = cpal::StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let channels = usize::from(self.channels);

        let error_state = Arc::clone(&self.state);
        let err_callback = move |err: cpal::StreamError| {
            tracing::error!(error = %err, "audio stream error");
            if let Ok(mut slot) = error_state.stream_error.lock()
                && slot.is_none()
            {
                *slot = Some(err.to_string());
            }
        };

        let f32_state = Arc::clone(&self.state);
        let f32_sender = sender.clone();
        let f32_result = self.device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let block: Vec<f32> = data.iter().step_by(channels).copied().collect();
                forward_block(&f32_sender, &f32_state, block);
            },
            err_callback.clone(),
            None,
        );
        let f32_error = match f32_result {
            Ok(stream) => return Ok(stream),
            Err(e) => e,
        };

        let i16_state = Arc::clone(&self.state);
        self.device
            .build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let block: Vec<f32> = data
                        .iter()
                        .step_by(channels)
                        .map(|&s| f32::from(s) / 32768.0)
                        .collect();
                    forward_block(&sender, &i16_state, block);
                },
                err_callback,
                None,
            )
            .map_err(|e| SidwatchError::AudioFormat {
                message: format!(
                    "{} Hz x {} channel(s) not supported by {} (f32: {}; i16: {})",
                    self.sample_rate, self.channels, self.device_name, f32_error, e
                ),
            })
    }

    fn check_stream_health(&self) -> Result<()> {
        if let Ok(slot) = self.state.stream_error.lock()
            && let Some(message) = slot.as_ref()
        {
            return Err(SidwatchError::Acquisition {
                message: message.clone(),
            });
        }
        let dropped = self.state.dropped_blocks.load(Ordering::Relaxed);
        if dropped > 0 {
            return Err(SidwatchError::AudioOverrun {
                dropped_blocks: dropped,
            });
        }
        Ok(())
    }
}

/// Hand a block to the reader, counting it as lost if the queue is full.
fn forward_block(sender: &Sender<Vec<f32>>, state: &CallbackState, block: Vec<f32>) {
    match sender.try_send(block) {
        Ok(()) | Err(TrySendError::Disconnected(_)) => {}
        Err(TrySendError::Full(_)) => {
            state.dropped_blocks.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let (sender, receiver) = crossbeam_channel::bounded(BLOCK_QUEUE_DEPTH);
        self.state = Arc::new(CallbackState::default());
        self.pending.clear();

        let stream = with_suppressed_stderr(|| self.build_stream(sender))?;
        stream.play().map_err(|e| SidwatchError::Acquisition {
            message: format!("Failed to start audio stream: {}", e),
        })?;

        tracing::info!(
            device = %self.device_name,
            sample_rate = self.sample_rate,
            channels = self.channels,
            "capture stream running"
        );
        self.stream = Some(SendableStream(stream));
        self.receiver = Some(receiver);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.receiver = None;
        if let Some(sendable_stream) = self.stream.take() {
            sendable_stream
                .0
                .pause()
                .map_err(|e| SidwatchError::Acquisition {
                    message: format!("Failed to stop audio stream: {}", e),
                })?;
        }
        Ok(())
    }

    fn read_exact(&mut self, count: usize) -> Result<Option<Vec<f32>>> {
        while self.pending.len() < count {
            self.check_stream_health()?;
            let receiver = self.receiver.as_ref().ok_or_else(|| SidwatchError::Acquisition {
                message: "capture stream not started".to_string(),
            })?;
            match receiver.recv_timeout(STALL_TIMEOUT) {
                Ok(block) => self.pending.extend(block),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(SidwatchError::Acquisition {
                        message: format!(
                            "no audio from {} for {}s",
                            self.device_name,
                            STALL_TIMEOUT.as_secs()
                        ),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SidwatchError::Acquisition {
                        message: format!("capture stream of {} closed", self.device_name),
                    });
                }
            }
        }
        self.check_stream_health()?;

        let rest = self.pending.split_off(count);
        Ok(Some(std::mem::replace(&mut self.pending, rest)))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
