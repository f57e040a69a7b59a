//! Real audio capture using CPAL (Cross-Platform Audio Library).

use crate::audio::recorder::AudioSource;
use crate::audio::wav::resample;
use crate::defaults;
use crate::error::{LeadlineError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// CPAL probing makes ALSA/JACK print harmless but alarming messages.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
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

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never a telephone-style mic or speaker.
const FILTERED_PATTERNS: &[&str] = &["surround", "front:", "rear:", "center:", "side:", "S/PDIF"];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Direction of a device lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
}

fn enumerate(host: &cpal::Host, kind: DeviceKind) -> Result<Vec<cpal::Device>> {
    let devices = match kind {
        DeviceKind::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
        DeviceKind::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
    };
    devices.map_err(|e| LeadlineError::AudioCapture {
        message: format!("Failed to enumerate {:?} devices: {}", kind, e),
    })
}

/// List usable device names, marking preferred ones with "\[recommended\]".
pub fn list_devices(kind: DeviceKind) -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| enumerate(&cpal::default_host(), kind))?;

    let mut device_names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if should_filter_device(&name) {
                continue;
            }
            if is_preferred_device(&name) {
                device_names.push(format!("{} [recommended]", name));
            } else {
                device_names.push(name);
            }
        }
    }

    Ok(device_names)
}

/// Find a device by exact name, or the best default (PipeWire/Pulse first).
pub(crate) fn find_device(kind: DeviceKind, name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = enumerate(&host, kind)?;

        if let Some(name) = name {
            return devices
                .into_iter()
                .find(|dev| dev.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| LeadlineError::AudioDeviceNotFound {
                    device: name.to_string(),
                });
        }

        if let Some(device) = devices
            .into_iter()
            .find(|dev| dev.name().map(|n| is_preferred_device(&n)).unwrap_or(false))
        {
            return Ok(device);
        }

        let fallback = match kind {
            DeviceKind::Input => host.default_input_device(),
            DeviceKind::Output => host.default_output_device(),
        };
        fallback.ok_or_else(|| LeadlineError::AudioDeviceNotFound {
            device: "default".to_string(),
        })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: The stream is only touched through the owning Mutex and never
/// from the audio callback itself.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}

/// Samples handed over by the device callback.
#[derive(Clone, Default)]
struct CaptureBuffer {
    samples: Arc<Mutex<Vec<i16>>>,
    callbacks: Arc<AtomicU64>,
}

impl CaptureBuffer {
    fn push(&self, samples: &[i16]) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut buf) = self.samples.lock() {
            buf.extend_from_slice(samples);
        }
    }

    fn take(&self) -> Result<Vec<i16>> {
        let mut buf = self.samples.lock().map_err(|e| LeadlineError::AudioCapture {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;
        Ok(std::mem::take(&mut *buf))
    }

    fn reset(&self) {
        self.callbacks.store(0, Ordering::Relaxed);
        if let Ok(mut buf) = self.samples.lock() {
            buf.clear();
        }
    }

    fn has_fired(&self) -> bool {
        self.callbacks.load(Ordering::Relaxed) > 0
    }
}

/// Software conversion from a device format to 16 kHz mono.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Conversion {
    channels: usize,
    source_rate: u32,
    target_rate: u32,
}

impl Conversion {
    fn none(rate: u32) -> Self {
        Self {
            channels: 1,
            source_rate: rate,
            target_rate: rate,
        }
    }

    /// Mix interleaved audio to mono and resample to the target rate.
    fn apply(&self, samples: &[i16]) -> Vec<i16> {
        let mono: Vec<i16> = if self.channels <= 1 {
            samples.to_vec()
        } else {
            samples
                .chunks_exact(self.channels)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                    (sum / self.channels as i32) as i16
                })
                .collect()
        };
        resample(&mono, self.source_rate, self.target_rate)
    }
}

/// Microphone capture.
///
/// Delivers 16-bit PCM at 16 kHz mono. Asks the device for that format
/// directly (i16, then f32) and otherwise captures at its native config,
/// mixing and resampling in software.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Mutex<Option<SendableStream>>,
    buffer: CaptureBuffer,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// Open an input device. `None` picks the best default.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let device = find_device(DeviceKind::Input, device_name)?;
        Ok(Self {
            device,
            stream: Mutex::new(None),
            buffer: CaptureBuffer::default(),
            sample_rate: defaults::SAMPLE_RATE,
        })
    }

    fn open_stream(
        &self,
        config: &cpal::StreamConfig,
        format: cpal::SampleFormat,
        conversion: Conversion,
    ) -> Result<cpal::Stream> {
        let on_error = |err: cpal::StreamError| {
            tracing::warn!("Audio input stream error: {}", err);
        };
        let buffer = self.buffer.clone();
        let stream = match format {
            cpal::SampleFormat::I16 => self.device.build_input_stream(
                config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    buffer.push(&conversion.apply(data));
                },
                on_error,
                None,
            ),
            cpal::SampleFormat::F32 => self.device.build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let pcm: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                    buffer.push(&conversion.apply(&pcm));
                },
                on_error,
                None,
            ),
            other => {
                return Err(LeadlineError::AudioCapture {
                    message: format!(
                        "Unsupported input sample format: {:?}. Pick another device with --device.",
                        other
                    ),
                });
            }
        };
        stream.map_err(|e| LeadlineError::AudioCapture {
            message: format!("Failed to build {:?} input stream: {}", format, e),
        })
    }

    fn stream_slot(&self) -> Result<std::sync::MutexGuard<'_, Option<SendableStream>>> {
        self.stream.lock().map_err(|e| LeadlineError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })
    }

    /// 16 kHz mono straight from the device, if it accepts that.
    fn open_direct(&self) -> Option<cpal::Stream> {
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let conversion = Conversion::none(self.sample_rate);
        [cpal::SampleFormat::I16, cpal::SampleFormat::F32]
            .into_iter()
            .find_map(|format| self.open_stream(&config, format, conversion).ok())
    }

    /// The device's own config, converted in software.
    fn open_native(&self) -> Result<cpal::Stream> {
        let native = self
            .device
            .default_input_config()
            .map_err(|e| LeadlineError::AudioCapture {
                message: format!("Failed to query default input config: {}", e),
            })?;
        let conversion = Conversion {
            channels: usize::from(native.channels()),
            source_rate: native.sample_rate().0,
            target_rate: self.sample_rate,
        };
        tracing::info!(
            channels = conversion.channels,
            rate = conversion.source_rate,
            format = ?native.sample_format(),
            "Using native input format, converting in software"
        );
        let config: cpal::StreamConfig = native.clone().into();
        self.open_stream(&config, native.sample_format(), conversion)
    }
}

fn play(stream: &cpal::Stream) -> Result<()> {
    stream.play().map_err(|e| LeadlineError::AudioCapture {
        message: format!("Failed to start audio stream: {}", e),
    })
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.stream_slot()?.is_some() {
            return Ok(());
        }

        let stream = match self.open_direct() {
            Some(stream) => {
                play(&stream)?;
                // Some PipeWire-ALSA setups accept the config but never call back.
                std::thread::sleep(std::time::Duration::from_millis(200));
                if self.buffer.has_fired() {
                    stream
                } else {
                    drop(stream);
                    self.buffer.reset();
                    let native = self.open_native()?;
                    play(&native)?;
                    native
                }
            }
            None => {
                let native = self.open_native()?;
                play(&native)?;
                native
            }
        };

        *self.stream_slot()? = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream_slot()?.take() {
            stream.0.pause().map_err(|e| LeadlineError::AudioCapture {
                message: format!("Failed to stop audio stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        self.buffer.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("Digital Output S/PDIF"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("USB Headset"));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("pulse"));
        assert!(!is_preferred_device("hw:0,0"));
    }

    #[test]
    fn test_conversion_stereo_48k() {
        let stereo: Vec<i16> = (0..960).flat_map(|_| [100i16, 300]).collect();
        let conversion = Conversion {
            channels: 2,
            source_rate: 48000,
            target_rate: 16000,
        };
        let converted = conversion.apply(&stereo);
        assert_eq!(converted.len(), 320);
        assert!(converted.iter().all(|&s| s == 200));
    }

    #[test]
    fn test_conversion_none_is_identity() {
        let samples = vec![1i16, -2, 3];
        assert_eq!(Conversion::none(16000).apply(&samples), samples);
    }

    #[test]
    fn test_capture_buffer_take_drains() {
        let buffer = CaptureBuffer::default();
        assert!(!buffer.has_fired());
        buffer.push(&[1, 2]);
        buffer.push(&[3]);
        assert!(buffer.has_fired());
        assert_eq!(buffer.take().unwrap(), vec![1, 2, 3]);
        assert!(buffer.take().unwrap().is_empty());
        buffer.reset();
        assert!(!buffer.has_fired());
    }

    #[test]
    fn test_f32_to_i16_clamps() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(-2.0), -i16::MAX);
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_list_input_devices_returns_at_least_one_device() {
        let devices = list_devices(DeviceKind::Input).unwrap();
        assert!(!devices.is_empty(), "Expected at least one audio device");
    }
}
