//! Default configuration constants for leadline.
//!
//! Shared by the config layer, the engine and the tests so the same numbers
//! are used everywhere.

/// Default audio sample rate in Hz.
///
/// 16kHz is what both the speech recognizer and the detector expect.
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per detector window (32ms at 16kHz).
pub const CHUNK_SIZE: usize = 512;

/// Speech probability at or above which a window counts as speech.
pub const VAD_THRESHOLD: f32 = 0.35;

/// Contiguous speech required before a turn is considered started.
pub const MIN_SPEECH_MS: u32 = 250;

/// Contiguous silence required before a turn is considered finished.
pub const MIN_SILENCE_MS: u32 = 200;

/// RMS level mapped to speech probability 1.0 by the energy classifier.
///
/// Normal close-talk speech sits around 0.05-0.1 RMS; anything at or above this
/// saturates the probability.
pub const ENERGY_FULL_SCALE_RMS: f32 = 0.08;

/// Caller silence before a single "are you still there" reminder.
pub const REMINDER_AFTER_SECS: u64 = 12;

/// Caller silence after which the call is ended.
pub const MAX_SILENCE_SECS: u64 = 40;

/// Turns of history included in the reasoning context.
pub const CONTEXT_TURNS: usize = 3;

/// Lead score bonus once budget and location are both known.
pub const QUALIFIED_BONUS: u8 = 10;

/// Lead score bonus once a site visit is scheduled.
pub const SITE_VISIT_BONUS: u8 = 30;

/// Upper bound of the lead score.
pub const MAX_LEAD_SCORE: u8 = 100;

/// Consecutive device read failures tolerated before capture gives up.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Sleep between polls of a live capture device.
pub const CAPTURE_POLL_MS: u64 = 10;

/// Upper bound on waiting for the farewell to finish playing.
pub const FAREWELL_TIMEOUT_SECS: u64 = 15;

/// Default speech recognition model name.
pub const DEFAULT_MODEL: &str = "small.en";

/// Default transcription language.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Default reasoning model.
pub const REASONING_MODEL: &str = "gemini-2.5-flash";

/// Environment variable holding the reasoning API key.
pub const REASONING_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Base URL of the reasoning API.
pub const REASONING_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Sampling temperature for turn reasoning.
pub const REASONING_TEMPERATURE: f32 = 0.2;

/// Sampling temperature for minutes generation.
pub const MINUTES_TEMPERATURE: f32 = 0.4;

/// OpenAI-compatible speech endpoint.
pub const TTS_ENDPOINT: &str = "https://api.openai.com/v1/audio/speech";

/// Default synthesis model.
pub const TTS_MODEL: &str = "tts-1";

/// Default synthesis voice.
pub const TTS_VOICE: &str = "alloy";

/// Environment variable holding the synthesis API key.
pub const TTS_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Directory receiving minutes and analytics files.
pub const OUTPUT_DIR: &str = "mom";

/// Spoken when the call starts.
pub const GREETING: &str =
    "Hello, thank you for calling our chakka real estate team. How may I assist you today?";

/// Spoken once per idle window.
pub const REMINDER: &str = "Are you still there? Could you please respond?";

/// Spoken when the call ends.
pub const FAREWELL: &str =
    "Thank you for contacting our chakka real estate team. Have a wonderful day.";

/// Response used when the reasoning service fails.
pub const REASONING_FALLBACK: &str =
    "I'm sorry, I am facing a temporary issue. Could you please repeat that?";

/// Response used when the reasoning service answers with an empty reply.
pub const EMPTY_RESPONSE_FALLBACK: &str = "Could you please clarify that?";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_is_32ms_at_sample_rate() {
        assert_eq!(CHUNK_SIZE as u32 * 1000 / SAMPLE_RATE, 32);
    }

    #[test]
    fn reminder_precedes_timeout() {
        assert!(REMINDER_AFTER_SECS < MAX_SILENCE_SECS);
    }

    #[test]
    fn bonuses_fit_in_score_range() {
        assert!(u16::from(QUALIFIED_BONUS) + u16::from(SITE_VISIT_BONUS) <= MAX_LEAD_SCORE as u16);
    }
}
