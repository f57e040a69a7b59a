//! Voice Activity Detection (VAD) module.
//!
//! A [`SpeechClassifier`] scores each fixed-size window with a speech
//! probability; [`VoiceActivityDetector`] debounces those scores by cumulative
//! sample counts and reports edges as explicit [`SpeechEvent`]s.

use crate::defaults;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same time, so a test (or an offline simulation driven by
/// audio position) can advance the clock seen by every component at once.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Scores one audio window with a speech probability in `[0, 1]`.
pub trait SpeechClassifier: Send {
    fn speech_probability(&mut self, samples: &[i16]) -> f32;
}

/// Energy-based classifier: RMS level scaled linearly into a probability.
#[derive(Debug, Clone, Copy)]
pub struct EnergyClassifier {
    full_scale_rms: f32,
}

impl EnergyClassifier {
    /// `full_scale_rms` is the RMS level that maps to probability 1.0.
    pub fn new(full_scale_rms: f32) -> Self {
        Self {
            full_scale_rms: full_scale_rms.max(f32::EPSILON),
        }
    }
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self::new(defaults::ENERGY_FULL_SCALE_RMS)
    }
}

impl SpeechClassifier for EnergyClassifier {
    fn speech_probability(&mut self, samples: &[i16]) -> f32 {
        (calculate_rms(samples) / self.full_scale_rms).clamp(0.0, 1.0)
    }
}

/// Configuration for Voice Activity Detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// Probability at or above which a window counts as speech.
    pub threshold: f32,
    /// Contiguous speech needed before `SpeechStarted` (milliseconds).
    pub min_speech_ms: u32,
    /// Contiguous silence needed before `SpeechEnded` (milliseconds).
    pub min_silence_ms: u32,
    pub sample_rate: u32,
}

impl VadConfig {
    pub fn min_speech_samples(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.min_speech_ms) / 1000
    }

    pub fn min_silence_samples(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.min_silence_ms) / 1000
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::VAD_THRESHOLD,
            min_speech_ms: defaults::MIN_SPEECH_MS,
            min_silence_ms: defaults::MIN_SILENCE_MS,
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

/// Debounce state, in samples since the detector was created or reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VadState {
    pub triggered: bool,
    /// First sample of the pending speech run (not yet triggered).
    pub speech_start_sample: Option<u64>,
    /// First sample of the pending silence run (triggered).
    pub silence_start_sample: Option<u64>,
    pub current_sample: u64,
}

/// Edge reported for one processed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechEvent {
    /// No transition; check [`VoiceActivityDetector::is_triggered`] for the level.
    Continuing,
    SpeechStarted,
    SpeechEnded,
}

/// Voice Activity Detector state machine.
pub struct VoiceActivityDetector<S: SpeechClassifier = EnergyClassifier> {
    config: VadConfig,
    classifier: S,
    state: VadState,
    min_speech_samples: u64,
    min_silence_samples: u64,
}

impl VoiceActivityDetector<EnergyClassifier> {
    /// Creates a detector using the energy classifier.
    pub fn new(config: VadConfig) -> Self {
        Self::with_classifier(config, EnergyClassifier::default())
    }
}

impl<S: SpeechClassifier> VoiceActivityDetector<S> {
    pub fn with_classifier(config: VadConfig, classifier: S) -> Self {
        Self {
            min_speech_samples: config.min_speech_samples(),
            min_silence_samples: config.min_silence_samples(),
            config,
            classifier,
            state: VadState::default(),
        }
    }

    /// Classifies one window and advances the debounce state.
    pub fn process(&mut self, chunk: &[i16]) -> SpeechEvent {
        let probability = self.classifier.speech_probability(chunk);
        self.process_probability(probability, chunk.len())
    }

    /// Advances the debounce state with an already computed probability for
    /// a window of `len` samples.
    pub fn process_probability(&mut self, probability: f32, len: usize) -> SpeechEvent {
        let chunk_start = self.state.current_sample;
        self.state.current_sample += len as u64;
        let now = self.state.current_sample;
        let is_speech = probability >= self.config.threshold;

        if self.state.triggered {
            if is_speech {
                self.state.silence_start_sample = None;
                return SpeechEvent::Continuing;
            }
            let start = *self.state.silence_start_sample.get_or_insert(chunk_start);
            if now - start >= self.min_silence_samples {
                self.state.triggered = false;
                self.state.silence_start_sample = None;
                self.state.speech_start_sample = None;
                return SpeechEvent::SpeechEnded;
            }
        } else {
            if !is_speech {
                self.state.speech_start_sample = None;
                return SpeechEvent::Continuing;
            }
            let start = *self.state.speech_start_sample.get_or_insert(chunk_start);
            if now - start >= self.min_speech_samples {
                self.state.triggered = true;
                self.state.speech_start_sample = None;
                self.state.silence_start_sample = None;
                return SpeechEvent::SpeechStarted;
            }
        }
        SpeechEvent::Continuing
    }

    /// Whether the detector is currently inside a speech segment.
    pub fn is_triggered(&self) -> bool {
        self.state.triggered
    }

    pub fn state(&self) -> &VadState {
        &self.state
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Returns to the initial state. Only called on an explicit restart.
    pub fn reset(&mut self) {
        self.state = VadState::default();
    }
}

/// Calculates the root mean square (RMS) of audio samples.
///
/// Returns a value from 0.0 to 1.0, normalized by i16::MAX.
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: usize = 512;

    /// Classifier that replays a fixed probability per call.
    struct Scripted(Vec<f32>);

    impl SpeechClassifier for Scripted {
        fn speech_probability(&mut self, _samples: &[i16]) -> f32 {
            if self.0.is_empty() { 0.0 } else { self.0.remove(0) }
        }
    }

    fn detector() -> VoiceActivityDetector {
        VoiceActivityDetector::new(VadConfig::default())
    }

    fn feed(vad: &mut VoiceActivityDetector, probability: f32, chunks: usize) -> Vec<SpeechEvent> {
        (0..chunks)
            .map(|_| vad.process_probability(probability, CHUNK))
            .collect()
    }

    fn count(events: &[SpeechEvent], wanted: SpeechEvent) -> usize {
        events.iter().filter(|&&e| e == wanted).count()
    }

    #[test]
    fn test_min_samples_from_config() {
        let config = VadConfig::default();
        assert_eq!(config.min_speech_samples(), 4000);
        assert_eq!(config.min_silence_samples(), 3200);
    }

    #[test]
    fn test_speech_started_after_min_speech_samples() {
        let mut vad = detector();
        // 4000 samples need 8 chunks of 512 (4096); 7 chunks is 3584
        let events = feed(&mut vad, 0.9, 7);
        assert!(events.iter().all(|&e| e == SpeechEvent::Continuing));
        assert!(!vad.is_triggered());

        assert_eq!(vad.process_probability(0.9, CHUNK), SpeechEvent::SpeechStarted);
        assert!(vad.is_triggered());
    }

    #[test]
    fn test_speech_ended_after_min_silence_samples() {
        let mut vad = detector();
        feed(&mut vad, 0.9, 8);

        // 3200 samples of silence need 7 chunks (3584)
        let events = feed(&mut vad, 0.0, 6);
        assert_eq!(count(&events, SpeechEvent::SpeechEnded), 0);
        assert_eq!(vad.process_probability(0.0, CHUNK), SpeechEvent::SpeechEnded);
        assert!(!vad.is_triggered());
    }

    #[test]
    fn test_short_burst_never_triggers() {
        let mut vad = detector();
        let mut events = Vec::new();
        for _ in 0..10 {
            events.extend(feed(&mut vad, 0.9, 5));
            events.extend(feed(&mut vad, 0.0, 1));
        }
        assert_eq!(count(&events, SpeechEvent::SpeechStarted), 0);
        assert_eq!(vad.state().speech_start_sample, None);
    }

    #[test]
    fn test_short_pause_does_not_end_speech() {
        let mut vad = detector();
        feed(&mut vad, 0.9, 8);

        let mut events = Vec::new();
        for _ in 0..5 {
            events.extend(feed(&mut vad, 0.0, 4));
            events.extend(feed(&mut vad, 0.9, 1));
        }
        assert_eq!(count(&events, SpeechEvent::SpeechEnded), 0);
        assert!(vad.is_triggered());
    }

    #[test]
    fn test_each_edge_fires_once_per_transition() {
        let mut vad = detector();
        let mut events = Vec::new();
        for _ in 0..3 {
            events.extend(feed(&mut vad, 0.9, 30));
            events.extend(feed(&mut vad, 0.0, 30));
        }
        assert_eq!(count(&events, SpeechEvent::SpeechStarted), 3);
        assert_eq!(count(&events, SpeechEvent::SpeechEnded), 3);

        // Edges alternate, starting with a start
        let edges: Vec<_> = events
            .into_iter()
            .filter(|&e| e != SpeechEvent::Continuing)
            .collect();
        for pair in edges.chunks(2) {
            assert_eq!(pair, [SpeechEvent::SpeechStarted, SpeechEvent::SpeechEnded]);
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let config = VadConfig {
            min_speech_ms: 0,
            ..VadConfig::default()
        };
        let mut vad = VoiceActivityDetector::new(config);
        assert_eq!(
            vad.process_probability(config.threshold, CHUNK),
            SpeechEvent::SpeechStarted
        );
    }

    #[test]
    fn test_sample_counter_is_cumulative() {
        let mut vad = detector();
        feed(&mut vad, 0.0, 3);
        feed(&mut vad, 0.9, 2);
        assert_eq!(vad.state().current_sample, 5 * CHUNK as u64);
        assert_eq!(vad.state().speech_start_sample, Some(3 * CHUNK as u64));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut vad = detector();
        feed(&mut vad, 0.9, 10);
        assert!(vad.is_triggered());

        vad.reset();
        assert_eq!(*vad.state(), VadState::default());
    }

    #[test]
    fn test_process_uses_classifier() {
        let config = VadConfig {
            min_speech_ms: 0,
            min_silence_ms: 0,
            ..VadConfig::default()
        };
        let mut vad = VoiceActivityDetector::with_classifier(config, Scripted(vec![0.1, 0.8, 0.2]));
        let chunk = vec![0i16; CHUNK];
        assert_eq!(vad.process(&chunk), SpeechEvent::Continuing);
        assert_eq!(vad.process(&chunk), SpeechEvent::SpeechStarted);
        assert_eq!(vad.process(&chunk), SpeechEvent::SpeechEnded);
    }

    #[test]
    fn test_energy_classifier_scales_rms() {
        let mut classifier = EnergyClassifier::default();
        assert_eq!(classifier.speech_probability(&[0i16; CHUNK]), 0.0);
        assert_eq!(classifier.speech_probability(&[i16::MAX; CHUNK]), 1.0);

        let loud_enough = vec![(0.04 * i16::MAX as f32) as i16; CHUNK];
        let p = classifier.speech_probability(&loud_enough);
        assert!(p > VadConfig::default().threshold, "p = {}", p);

        let hum = vec![(0.01 * i16::MAX as f32) as i16; CHUNK];
        let p = classifier.speech_probability(&hum);
        assert!(p < VadConfig::default().threshold, "p = {}", p);
    }

    #[test]
    fn test_calculate_rms() {
        assert_eq!(calculate_rms(&[]), 0.0);
        assert_eq!(calculate_rms(&[0i16; 100]), 0.0);
        let rms = calculate_rms(&[i16::MAX; 100]);
        assert!((rms - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let start = clock.now();
        other.advance(Duration::from_secs(5));
        assert_eq!(clock.now() - start, Duration::from_secs(5));
    }
}
