//! leadline - Full-duplex voice assistant for real-estate sales calls
//!
//! Listens to the caller, detects turn boundaries, lets the caller barge in
//! over synthesized speech and keeps the per-call lead record.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod dialogue;
pub mod engine;
pub mod error;
pub mod knowledge;
pub mod llm;
#[cfg(feature = "cli")]
pub mod logging;
pub mod playback;
pub mod session;
pub mod stt;
pub mod tts;
pub mod turn;

// Core traits (source -> turn -> dialogue -> sink)
pub use audio::recorder::{AudioSink, AudioSource};
pub use llm::{MinutesGenerator, Reasoner};
pub use session::SessionPersister;
pub use stt::Transcriber;
pub use tts::Synthesizer;

// Call engine
pub use dialogue::{CallOutcome, DialogueOrchestrator, EndReason};
pub use engine::{CallEngine, EngineConfig, RunningCall, Services};

// Error handling
pub use error::{LeadlineError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.0.1+abc1234"` when git hash is available, `"0.0.1"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_has_package_version_and_optional_hash() {
        let version = version_string();
        let (base, hash) = match version.split_once('+') {
            Some((base, hash)) => (base, Some(hash)),
            None => (version.as_str(), None),
        };
        assert_eq!(base, env!("CARGO_PKG_VERSION"));
        match option_env!("GIT_HASH").filter(|h| !h.is_empty()) {
            Some(expected) => assert_eq!(hash, Some(expected)),
            None => assert!(hash.is_none()),
        }
    }
}
