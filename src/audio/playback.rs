//! Speaker output using CPAL.
//!
//! Writes land in a shared queue that the device callback drains. Clearing
//! the queue is how a barge-in silences the assistant mid-sentence.

use crate::audio::capture::{DeviceKind, SendableStream, find_device};
use crate::audio::recorder::AudioSink;
use crate::audio::wav::resample;
use crate::error::{LeadlineError, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Speaker sink.
///
/// Accepts mono PCM16 at `sample_rate` and converts to the device's native
/// rate and channel count on write.
pub struct CpalAudioSink {
    stream: Mutex<Option<SendableStream>>,
    queue: Arc<Mutex<VecDeque<i16>>>,
    sample_rate: u32,
    device_rate: u32,
    closed: AtomicBool,
}

impl CpalAudioSink {
    /// Open an output device and start its stream. `None` picks the best default.
    pub fn open(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_device(DeviceKind::Output, device_name)?;
        let config = device
            .default_output_config()
            .map_err(|e| LeadlineError::AudioPlayback {
                message: format!("Failed to query default output config: {}", e),
            })?;

        let device_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let stream_config: cpal::StreamConfig = config.clone().into();
        let queue = Arc::new(Mutex::new(VecDeque::new()));

        let err_callback = |err| {
            tracing::warn!("Audio output stream error: {}", err);
        };

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                let queue = Arc::clone(&queue);
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        fill_frames(&queue, data, channels, |s| s as f32 / i16::MAX as f32);
                    },
                    err_callback,
                    None,
                )
            }
            cpal::SampleFormat::I16 => {
                let queue = Arc::clone(&queue);
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        fill_frames(&queue, data, channels, |s| s);
                    },
                    err_callback,
                    None,
                )
            }
            fmt => {
                return Err(LeadlineError::AudioPlayback {
                    message: format!("Unsupported output sample format: {:?}", fmt),
                });
            }
        }
        .map_err(|e| LeadlineError::AudioPlayback {
            message: format!("Failed to build output stream: {}", e),
        })?;

        stream.play().map_err(|e| LeadlineError::AudioPlayback {
            message: format!("Failed to start output stream: {}", e),
        })?;

        tracing::debug!(device_rate, channels, "Output stream started");

        Ok(Self {
            stream: Mutex::new(Some(SendableStream(stream))),
            queue,
            sample_rate,
            device_rate,
            closed: AtomicBool::new(false),
        })
    }
}

/// Copy queued mono samples into interleaved device frames, padding with silence.
fn fill_frames<T: Copy + Default>(
    queue: &Mutex<VecDeque<i16>>,
    data: &mut [T],
    channels: usize,
    convert: impl Fn(i16) -> T,
) {
    let channels = channels.max(1);
    let Ok(mut queue) = queue.lock() else {
        data.fill(T::default());
        return;
    };
    for frame in data.chunks_mut(channels) {
        let value = queue.pop_front().map(&convert).unwrap_or_default();
        frame.fill(value);
    }
}

impl AudioSink for CpalAudioSink {
    fn write(&self, samples: &[i16]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LeadlineError::AudioPlayback {
                message: "output device is closed".to_string(),
            });
        }
        let converted = resample(samples, self.sample_rate, self.device_rate);
        let mut queue = self.queue.lock().map_err(|e| LeadlineError::AudioPlayback {
            message: format!("Failed to lock output queue: {}", e),
        })?;
        queue.extend(converted);
        Ok(())
    }

    fn clear(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }

    fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.clear();
        let mut stream = self.stream.lock().map_err(|e| LeadlineError::AudioPlayback {
            message: format!("Failed to lock output stream: {}", e),
        })?;
        if let Some(stream) = stream.take() {
            stream.0.pause().map_err(|e| LeadlineError::AudioPlayback {
                message: format!("Failed to stop output stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
