//! Fixtures shared by the engine tests.

#![allow(dead_code)]

use leadline::Result;
use leadline::audio::recorder::{AudioSource, ScriptedAudioSource};
use leadline::engine::{EngineConfig, Services};
use leadline::llm::{ScriptedReasoner, TemplateMinutes};
use leadline::session::SessionPersister;
use leadline::stt::MockTranscriber;
use leadline::tts::MockSynthesizer;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub const CHUNK: usize = 512;
pub const LOUD: i16 = 8000;

/// Append one short caller utterance: loud chunks, then enough silence to end it.
pub fn speech(source: ScriptedAudioSource) -> ScriptedAudioSource {
    source.then_level(LOUD, 6, CHUNK).then_silence(10, CHUNK)
}

/// Short debounce windows so a handful of chunks makes an utterance.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.vad.min_speech_ms = 64;
    config.vad.min_silence_ms = 64;
    config.poll_interval = Duration::from_millis(1);
    config.dialogue.farewell_timeout = Duration::from_millis(500);
    config
}

pub fn services(
    transcriber: MockTranscriber,
    reasoner: ScriptedReasoner,
    synthesizer: Arc<MockSynthesizer>,
    persister: Arc<dyn SessionPersister>,
) -> Services {
    Services {
        transcriber: Arc::new(transcriber),
        reasoner: Arc::new(reasoner),
        synthesizer,
        minutes: Arc::new(TemplateMinutes),
        persister,
    }
}

/// How many times `text` was sent to the synthesizer.
pub fn spoken(synth: &MockSynthesizer, text: &str) -> usize {
    synth.texts().iter().filter(|t| t.as_str() == text).count()
}

/// Poll `check` until it holds; fails the test after five seconds.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Live-looking source that stays silent until `gate` opens, then replays
/// its script.
///
/// Reads return nothing while closed, like an idle microphone. Once open the
/// source ends with its script unless it was made endless.
pub struct GatedSource {
    inner: ScriptedAudioSource,
    gate: Box<dyn Fn() -> bool + Send + Sync>,
    open: bool,
    endless: bool,
}

impl GatedSource {
    pub fn new(inner: ScriptedAudioSource, gate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            inner,
            gate: Box::new(gate),
            open: false,
            endless: false,
        }
    }

    pub fn flag(inner: ScriptedAudioSource, flag: Arc<AtomicBool>) -> Self {
        Self::new(inner, move || flag.load(Ordering::SeqCst))
    }

    /// Keep reading empty after the script instead of ending.
    pub fn endless(mut self) -> Self {
        self.endless = true;
        self
    }
}

impl AudioSource for GatedSource {
    fn start(&mut self) -> Result<()> {
        self.inner.start()
    }

    fn stop(&mut self) -> Result<()> {
        self.inner.stop()
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if !self.open {
            if !(self.gate)() {
                return Ok(Vec::new());
            }
            self.open = true;
        }
        self.inner.read_samples()
    }

    fn is_finite(&self) -> bool {
        self.open && !self.endless
    }
}
