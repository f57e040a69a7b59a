use crate::audio::vad::VadConfig;
use crate::defaults;
use crate::dialogue::idle::IdleConfig;
use crate::error::{LeadlineError, Result};
use crate::session::ScoringRules;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub vad: VadSection,
    pub call: CallConfig,
    pub scoring: ScoringConfig,
    pub stt: SttConfig,
    pub reasoning: ReasoningConfig,
    pub tts: TtsConfig,
}

/// Audio device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: u32,
    pub chunk_size: usize,
}

/// Voice activity detection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadSection {
    pub threshold: f32,
    pub min_speech_ms: u32,
    pub min_silence_ms: u32,
}

/// Call lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CallConfig {
    pub reminder_after_secs: u64,
    pub max_silence_secs: u64,
    pub context_turns: usize,
    pub output_dir: PathBuf,
}

/// Lead scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    pub qualified_bonus: u8,
    pub site_visit_bonus: u8,
}

/// Speech-to-text configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SttConfig {
    /// Model name (e.g. "small.en") or path to a ggml model file
    pub model: String,
    pub language: String,
}

/// Reasoning service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReasoningConfig {
    pub model: String,
    pub endpoint: String,
    pub api_key_env: String,
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub api_key_env: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            output_device: None,
            sample_rate: defaults::SAMPLE_RATE,
            chunk_size: defaults::CHUNK_SIZE,
        }
    }
}

impl Default for VadSection {
    fn default() -> Self {
        Self {
            threshold: defaults::VAD_THRESHOLD,
            min_speech_ms: defaults::MIN_SPEECH_MS,
            min_silence_ms: defaults::MIN_SILENCE_MS,
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            reminder_after_secs: defaults::REMINDER_AFTER_SECS,
            max_silence_secs: defaults::MAX_SILENCE_SECS,
            context_turns: defaults::CONTEXT_TURNS,
            output_dir: PathBuf::from(defaults::OUTPUT_DIR),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            qualified_bonus: defaults::QUALIFIED_BONUS,
            site_visit_bonus: defaults::SITE_VISIT_BONUS,
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: defaults::DEFAULT_MODEL.to_string(),
            language: defaults::DEFAULT_LANGUAGE.to_string(),
        }
    }
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            model: defaults::REASONING_MODEL.to_string(),
            endpoint: defaults::REASONING_ENDPOINT.to_string(),
            api_key_env: defaults::REASONING_API_KEY_ENV.to_string(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::TTS_ENDPOINT.to_string(),
            model: defaults::TTS_MODEL.to_string(),
            voice: defaults::TTS_VOICE.to_string(),
            api_key_env: defaults::TTS_API_KEY_ENV.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(LeadlineError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - LEADLINE_MODEL → stt.model
    /// - LEADLINE_LANGUAGE → stt.language
    /// - LEADLINE_AUDIO_DEVICE → audio.device
    /// - LEADLINE_OUTPUT_DEVICE → audio.output_device
    /// - LEADLINE_REASONING_MODEL → reasoning.model
    /// - LEADLINE_OUTPUT_DIR → call.output_dir
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(model) = std::env::var("LEADLINE_MODEL")
            && !model.is_empty()
        {
            self.stt.model = model;
        }

        if let Ok(language) = std::env::var("LEADLINE_LANGUAGE")
            && !language.is_empty()
        {
            self.stt.language = language;
        }

        if let Ok(device) = std::env::var("LEADLINE_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        if let Ok(device) = std::env::var("LEADLINE_OUTPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.output_device = Some(device);
        }

        if let Ok(model) = std::env::var("LEADLINE_REASONING_MODEL")
            && !model.is_empty()
        {
            self.reasoning.model = model;
        }

        if let Ok(dir) = std::env::var("LEADLINE_OUTPUT_DIR")
            && !dir.is_empty()
        {
            self.call.output_dir = PathBuf::from(dir);
        }

        self
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if self.audio.chunk_size == 0 {
            return Err(invalid("audio.chunk_size", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.vad.threshold) {
            return Err(invalid("vad.threshold", "must be between 0.0 and 1.0"));
        }
        if self.call.max_silence_secs == 0 {
            return Err(invalid("call.max_silence_secs", "must be positive"));
        }
        if self.call.reminder_after_secs >= self.call.max_silence_secs {
            return Err(invalid(
                "call.reminder_after_secs",
                "must be shorter than call.max_silence_secs",
            ));
        }
        if u16::from(self.scoring.qualified_bonus) + u16::from(self.scoring.site_visit_bonus)
            > u16::from(defaults::MAX_LEAD_SCORE)
        {
            return Err(invalid(
                "scoring",
                "bonuses must not add up to more than the maximum lead score",
            ));
        }
        Ok(())
    }

    /// Detector settings derived from `[audio]` and `[vad]`.
    pub fn vad_config(&self) -> VadConfig {
        VadConfig {
            threshold: self.vad.threshold,
            min_speech_ms: self.vad.min_speech_ms,
            min_silence_ms: self.vad.min_silence_ms,
            sample_rate: self.audio.sample_rate,
        }
    }

    /// Idle reminder and timeout settings.
    pub fn idle_config(&self) -> IdleConfig {
        IdleConfig {
            reminder_after: Duration::from_secs(self.call.reminder_after_secs),
            max_silence: Duration::from_secs(self.call.max_silence_secs),
        }
    }

    /// Lead scoring increments.
    pub fn scoring_rules(&self) -> ScoringRules {
        ScoringRules {
            qualified_bonus: self.scoring.qualified_bonus,
            site_visit_bonus: self.scoring.site_visit_bonus,
        }
    }

    /// Resolve `stt.model` to a model file.
    ///
    /// An existing path is used as is; a bare name maps to
    /// `<data dir>/leadline/models/ggml-<name>.bin`.
    pub fn model_path(&self) -> PathBuf {
        let candidate = PathBuf::from(&self.stt.model);
        if candidate.exists() {
            return candidate;
        }
        models_dir().join(format!("ggml-{}.bin", self.stt.model))
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/leadline/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("leadline")
            .join("config.toml")
    }
}

/// Directory holding downloaded speech models.
pub fn models_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("leadline")
        .join("models")
}

fn invalid(key: &str, message: &str) -> LeadlineError {
    LeadlineError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
