//! Audio devices, framing and voice activity detection.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod frame;
#[cfg(feature = "cpal-audio")]
pub mod playback;
pub mod recorder;
pub mod vad;
pub mod wav;
