//! Text-to-speech synthesis.

#[cfg(feature = "http")]
pub mod http;
pub mod synthesizer;

#[cfg(feature = "http")]
pub use http::{HttpSynthesizer, PcmDecoder};
pub use synthesizer::{MockSynthesizer, SpeechStream, Synthesizer, ToneSynthesizer};
