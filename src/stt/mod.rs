//! Speech-to-text.

pub mod transcriber;
pub mod whisper;

pub use transcriber::{MockTranscriber, Transcriber, TranscriptionService};
pub use whisper::{WhisperConfig, WhisperTranscriber};
