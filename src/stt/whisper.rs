//! Caller transcription with whisper.cpp.
//!
//! Requires the `whisper` feature (and cmake at build time). Without it,
//! [`WhisperTranscriber`] still validates the model path but every
//! transcription fails with a clear message.

use crate::defaults;
use crate::error::{LeadlineError, Result};
use crate::stt::transcriber::Transcriber;
use std::path::PathBuf;

#[cfg(feature = "whisper")]
use std::sync::{Mutex, Once};
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// ggml model file, see `Config::model_path`
    pub model_path: PathBuf,
    /// Caller language, "en" or "hi"
    pub language: String,
    /// Decoder threads; whisper.cpp picks when unset
    pub threads: Option<usize>,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(format!("models/ggml-{}.bin", defaults::DEFAULT_MODEL)),
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            threads: None,
        }
    }
}

fn model_name_from_path(config: &WhisperConfig) -> String {
    config
        .model_path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.trim_start_matches("ggml-").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn ensure_model_exists(config: &WhisperConfig) -> Result<()> {
    if config.model_path.exists() {
        Ok(())
    } else {
        Err(LeadlineError::TranscriptionModelNotFound {
            path: config.model_path.to_string_lossy().to_string(),
        })
    }
}

/// Whisper rejects input shorter than one second.
const MIN_INPUT_SAMPLES: usize = defaults::SAMPLE_RATE as usize;

/// Normalize to [-1.0, 1.0] and pad short utterances with trailing silence.
pub fn prepare_audio(samples: &[i16]) -> Vec<f32> {
    let mut audio: Vec<f32> = samples
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect();
    if audio.len() < MIN_INPUT_SAMPLES {
        audio.resize(MIN_INPUT_SAMPLES, 0.0);
    }
    audio
}

/// Drop non-speech annotations such as `[BLANK_AUDIO]` or `(music)` and
/// collapse whitespace.
pub fn clean_transcript(raw: &str) -> String {
    let mut spoken = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for c in raw.chars() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => spoken.push(c),
            _ => {}
        }
    }
    spoken.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One loaded model shared by the call. Utterances decode one at a time.
#[cfg(feature = "whisper")]
pub struct WhisperTranscriber {
    context: Mutex<WhisperContext>,
    config: WhisperConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl std::fmt::Debug for WhisperTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperTranscriber")
            .field("config", &self.config)
            .field("model_name", &self.model_name)
            .finish_non_exhaustive()
    }
}

/// Whisper transcriber placeholder for builds without the `whisper` feature.
#[cfg(not(feature = "whisper"))]
#[derive(Debug)]
pub struct WhisperTranscriber {
    config: WhisperConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl WhisperTranscriber {
    /// Load the model named in `config`.
    ///
    /// Fails with `TranscriptionModelNotFound` when the file is missing, so a
    /// call never starts without speech recognition.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        ensure_model_exists(&config)?;
        let model_name = model_name_from_path(&config);

        let path = config.model_path.to_str().ok_or_else(|| {
            LeadlineError::TranscriptionInferenceFailed {
                message: format!("Model path is not UTF-8: {}", config.model_path.display()),
            }
        })?;
        let context = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(inference_error("Failed to load Whisper model"))?;

        tracing::info!(model = %model_name, "Whisper model loaded");

        Ok(Self {
            context: Mutex::new(context),
            config,
            model_name,
        })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

#[cfg(not(feature = "whisper"))]
impl WhisperTranscriber {
    pub fn new(config: WhisperConfig) -> Result<Self> {
        ensure_model_exists(&config)?;
        let model_name = model_name_from_path(&config);
        Ok(Self { config, model_name })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

#[cfg(feature = "whisper")]
fn inference_error<E: std::fmt::Display>(what: &'static str) -> impl FnOnce(E) -> LeadlineError {
    move |e| LeadlineError::TranscriptionInferenceFailed {
        message: format!("{}: {}", what, e),
    }
}

#[cfg(feature = "whisper")]
impl WhisperTranscriber {
    /// Greedy decoding of one utterance, with nothing printed and no carried context.
    fn decode_params(&self) -> FullParams<'_, '_> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(&self.config.language));
        if let Some(threads) = self.config.threads {
            params.set_n_threads(i32::try_from(threads).unwrap_or(i32::MAX));
        }
        params.set_no_context(true);
        params.set_single_segment(true);
        params.set_suppress_blank(true);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params
    }
}

#[cfg(feature = "whisper")]
impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, audio: &[i16]) -> Result<String> {
        let audio = prepare_audio(audio);
        let context = self
            .context
            .lock()
            .map_err(inference_error("Whisper context poisoned"))?;
        let mut state = context
            .create_state()
            .map_err(inference_error("Failed to create Whisper state"))?;
        state
            .full(self.decode_params(), &audio)
            .map_err(inference_error("Whisper inference failed"))?;

        let raw: String = state.as_iter().map(|segment| segment.to_string()).collect();
        Ok(clean_transcript(&raw))
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[cfg(not(feature = "whisper"))]
impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, _audio: &[i16]) -> Result<String> {
        Err(LeadlineError::TranscriptionInferenceFailed {
            message: "Whisper feature not enabled. Rebuild with --features whisper".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_whisper_config_default() {
        let config = WhisperConfig::default();
        assert_eq!(config.model_path, PathBuf::from("models/ggml-small.en.bin"));
        assert_eq!(config.language, "en");
        assert_eq!(config.threads, None);
    }

    #[test]
    fn test_missing_model_is_reported() {
        let config = WhisperConfig {
            model_path: Path::new("/nonexistent/ggml-small.en.bin").to_path_buf(),
            ..WhisperConfig::default()
        };
        match WhisperTranscriber::new(config) {
            Err(LeadlineError::TranscriptionModelNotFound { path }) => {
                assert!(path.contains("ggml-small.en.bin"));
            }
            other => panic!("Expected TranscriptionModelNotFound, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_model_name_strips_ggml_prefix() {
        let config = WhisperConfig {
            model_path: PathBuf::from("/models/ggml-base.en.bin"),
            ..WhisperConfig::default()
        };
        assert_eq!(model_name_from_path(&config), "base.en");
    }

    #[test]
    fn test_prepare_audio_pads_short_utterances() {
        let audio = prepare_audio(&[0, i16::MIN, 16384]);
        assert_eq!(&audio[..3], &[0.0, -1.0, 0.5]);
        assert_eq!(audio.len(), 16000);
        assert!(audio[3..].iter().all(|&s| s == 0.0));

        assert_eq!(prepare_audio(&[100; 20000]).len(), 20000);
    }

    #[test]
    fn test_clean_transcript_drops_annotations() {
        assert_eq!(clean_transcript(" [BLANK_AUDIO] "), "");
        assert_eq!(clean_transcript("(music) I want a 2BHK"), "I want a 2BHK");
        assert_eq!(clean_transcript("  Budget is   80 lakhs. "), "Budget is 80 lakhs.");
    }
}
