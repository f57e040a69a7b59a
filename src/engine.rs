//! Wires capture, dialogue and playback together for one call.
//!
//! ```text
//! AudioSource ─▶ capture thread: FrameSplitter → TurnController → IdlePolicy
//!                      │ utterances / control           │ cancel (barge-in)
//!                      ▼                                ▼
//!              DialogueOrchestrator task ──Play──▶ playback task ─▶ AudioSink
//! ```

use crate::audio::frame::FrameSplitter;
use crate::audio::recorder::{AudioSink, AudioSource, MemorySink};
use crate::audio::vad::{Clock, ManualClock, SystemClock, VadConfig, VoiceActivityDetector};
use crate::config::Config;
use crate::defaults;
use crate::dialogue::{
    CallOutcome, CallPhase, ControlEvent, DialogueOrchestrator, EndReason, IdleConfig,
    IdleDecision, IdlePolicy, OrchestratorConfig,
};
use crate::error::{LeadlineError, Result};
use crate::llm::{MinutesGenerator, Reasoner};
use crate::playback::{PlaybackHandle, UtteranceKind, spawn_playback};
use crate::session::{ScoringRules, SessionPersister, SessionStore, new_call_id};
use crate::stt::Transcriber;
use crate::tts::Synthesizer;
use crate::turn::{TurnAction, TurnController, Utterance};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc, watch};

/// Service handles for one call, constructed by the caller and injected.
#[derive(Clone)]
pub struct Services {
    pub transcriber: Arc<dyn Transcriber>,
    pub reasoner: Arc<dyn Reasoner>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub minutes: Arc<dyn MinutesGenerator>,
    pub persister: Arc<dyn SessionPersister>,
}

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub vad: VadConfig,
    pub idle: IdleConfig,
    pub scoring: ScoringRules,
    pub sample_rate: u32,
    pub chunk_size: usize,
    pub dialogue: OrchestratorConfig,
    /// Sleep between reads of a live source.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            vad: config.vad_config(),
            idle: config.idle_config(),
            scoring: config.scoring_rules(),
            sample_rate: config.audio.sample_rate,
            chunk_size: config.audio.chunk_size,
            dialogue: OrchestratorConfig {
                context_turns: config.call.context_turns,
                ..OrchestratorConfig::default()
            },
            poll_interval: Duration::from_millis(defaults::CAPTURE_POLL_MS),
        }
    }
}

/// Longest wall-clock wait for synthesized audio to reach a simulated speaker.
const OUTPUT_SETTLE_LIMIT: Duration = Duration::from_secs(2);

/// Time driven by audio position instead of the wall clock.
///
/// Every captured chunk advances the clock by its duration and, when a
/// speaker is attached, plays the same stretch of queued output. Input and
/// output stay in step no matter how fast the source is read.
#[derive(Clone)]
pub struct SimulatedTime {
    clock: ManualClock,
    speaker: Option<Arc<MemorySink>>,
}

impl SimulatedTime {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            speaker: None,
        }
    }

    /// Drain `speaker` in step with capture.
    pub fn with_speaker(mut self, speaker: Arc<MemorySink>) -> Self {
        self.speaker = Some(speaker);
        self
    }

    fn advance(&self, samples: usize, sample_rate: u32) {
        let rate = u64::from(sample_rate.max(1));
        self.clock
            .advance(Duration::from_micros(samples as u64 * 1_000_000 / rate));
        if let Some(speaker) = &self.speaker {
            let played = samples as u64 * u64::from(speaker.sample_rate()) / rate;
            speaker.consume(played as usize);
        }
    }

    /// Hold capture while the assistant is speaking but nothing has reached
    /// the speaker yet, so input never runs ahead of synthesis.
    fn wait_for_output(&self, playback: &PlaybackHandle, call_active: &AtomicBool) {
        let Some(speaker) = &self.speaker else {
            return;
        };
        let deadline = Instant::now() + OUTPUT_SETTLE_LIMIT;
        while playback.is_speaking()
            && speaker.pending() == 0
            && call_active.load(Ordering::SeqCst)
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Input is over; let the speaker play out on its own.
    fn finish(&self) {
        if let Some(speaker) = &self.speaker {
            speaker.play_through();
        }
    }
}

/// Statistics reported by the capture thread when it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub chunks: u64,
    pub utterances: u64,
    pub barge_ins: u64,
    pub read_errors: u64,
}

/// Runs calls.
pub struct CallEngine {
    config: EngineConfig,
    services: Services,
    clock: Arc<dyn Clock>,
    simulation: Option<SimulatedTime>,
}

impl CallEngine {
    pub fn new(config: EngineConfig, services: Services) -> Self {
        Self {
            config,
            services,
            clock: Arc::new(SystemClock),
            simulation: None,
        }
    }

    /// Drive every timer from audio position.
    pub fn with_simulated_time(mut self, time: SimulatedTime) -> Self {
        self.clock = Arc::new(time.clock.clone());
        self.simulation = Some(time);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a call: open the source, greet, and begin listening.
    ///
    /// # Errors
    /// Fails before anything is spoken if the source cannot be started.
    pub async fn start(
        &self,
        mut source: Box<dyn AudioSource>,
        sink: Arc<dyn AudioSink>,
    ) -> Result<RunningCall> {
        source.start()?;

        let speaking = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (playback, playback_task) = spawn_playback(
            Arc::clone(&self.services.synthesizer),
            sink,
            speaking,
            events_tx,
        );

        let call_id = new_call_id();
        let store = SessionStore::with_clock(&call_id, self.config.scoring, Arc::clone(&self.clock));
        let orchestrator = DialogueOrchestrator::new(
            store,
            playback.clone(),
            Arc::clone(&self.services.transcriber),
            Arc::clone(&self.services.reasoner),
            Arc::clone(&self.services.minutes),
            Arc::clone(&self.services.persister),
        )
        .with_config(self.config.dialogue);

        let (utterance_tx, utterance_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = bounded(1);
        let call_active = orchestrator.call_active();
        let phase = orchestrator.subscribe_phase();
        let store = orchestrator.store();

        tracing::info!(%call_id, "Call started");
        orchestrator.greet().await;

        let capture = CaptureLoop {
            source,
            splitter: FrameSplitter::new(self.config.chunk_size, self.config.sample_rate),
            turn: TurnController::new(
                VoiceActivityDetector::new(self.config.vad),
                playback.clone(),
            ),
            idle: IdlePolicy::new(self.config.idle, Arc::clone(&self.clock)),
            playback: playback.clone(),
            call_active: Arc::clone(&call_active),
            utterances: utterance_tx,
            control: control_tx.clone(),
            simulation: self.simulation.clone(),
            chunk_size: self.config.chunk_size,
            sample_rate: self.config.sample_rate,
            poll_interval: self.config.poll_interval,
            report: CaptureReport::default(),
        };
        let capture_thread = thread::Builder::new()
            .name("leadline-capture".to_string())
            .spawn(move || capture.run(report_tx));
        let capture_thread = match capture_thread {
            Ok(handle) => handle,
            Err(e) => {
                playback.shutdown();
                return Err(LeadlineError::AudioCapture {
                    message: format!("Failed to spawn capture thread: {}", e),
                });
            }
        };

        let dialogue =
            tokio::spawn(async move { orchestrator.run(utterance_rx, control_rx, events_rx).await });

        Ok(RunningCall {
            call_id,
            control: control_tx,
            phase,
            store,
            call_active,
            dialogue,
            playback_task,
            capture_thread: Some(capture_thread),
            report_rx,
        })
    }

    /// Start a call and wait for it to end.
    pub async fn run(
        &self,
        source: Box<dyn AudioSource>,
        sink: Arc<dyn AudioSink>,
    ) -> Result<CallOutcome> {
        self.start(source, sink).await?.wait().await
    }
}

/// Handle to a call in progress.
pub struct RunningCall {
    call_id: String,
    control: mpsc::UnboundedSender<ControlEvent>,
    phase: watch::Receiver<CallPhase>,
    store: Arc<Mutex<SessionStore>>,
    call_active: Arc<AtomicBool>,
    dialogue: tokio::task::JoinHandle<CallOutcome>,
    playback_task: tokio::task::JoinHandle<()>,
    capture_thread: Option<JoinHandle<()>>,
    report_rx: Receiver<CaptureReport>,
}

impl RunningCall {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn is_active(&self) -> bool {
        self.call_active.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> watch::Receiver<CallPhase> {
        self.phase.clone()
    }

    /// Live session state, for observers.
    pub fn store(&self) -> Arc<Mutex<SessionStore>> {
        Arc::clone(&self.store)
    }

    /// Ask the call to end. Safe to call more than once.
    pub fn hangup(&self) {
        self.hangup_handle().hangup();
    }

    /// A handle that can end the call from another task.
    pub fn hangup_handle(&self) -> HangupHandle {
        HangupHandle {
            control: self.control.clone(),
        }
    }

    /// Wait for the call to end and every thread to stop.
    pub async fn wait(mut self) -> Result<CallOutcome> {
        let outcome = (&mut self.dialogue)
            .await
            .map_err(|e| LeadlineError::Other(format!("Dialogue task failed: {}", e)))?;

        if let Err(e) = (&mut self.playback_task).await {
            tracing::warn!("Playback task failed: {}", e);
        }

        if let Some(handle) = self.capture_thread.take() {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(panic_info)) => {
                    let msg = panic_info
                        .downcast_ref::<&str>()
                        .copied()
                        .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                        .unwrap_or("unknown panic");
                    tracing::error!("Capture thread panicked: {}", msg);
                }
                Err(e) => tracing::warn!("Failed to join capture thread: {}", e),
            }
        }

        if let Ok(report) = self.report_rx.try_recv() {
            tracing::info!(
                chunks = report.chunks,
                utterances = report.utterances,
                barge_ins = report.barge_ins,
                read_errors = report.read_errors,
                "Capture finished"
            );
        }
        Ok(outcome)
    }
}

/// Ends a call from outside the engine.
#[derive(Clone)]
pub struct HangupHandle {
    control: mpsc::UnboundedSender<ControlEvent>,
}

impl HangupHandle {
    pub fn hangup(&self) {
        if self
            .control
            .send(ControlEvent::Terminate(EndReason::Hangup))
            .is_err()
        {
            tracing::debug!("Call already finished");
        }
    }
}

/// Everything the capture thread owns.
struct CaptureLoop {
    source: Box<dyn AudioSource>,
    splitter: FrameSplitter,
    turn: TurnController<PlaybackHandle>,
    idle: IdlePolicy<Arc<dyn Clock>>,
    playback: PlaybackHandle,
    call_active: Arc<AtomicBool>,
    utterances: mpsc::UnboundedSender<Utterance>,
    control: mpsc::UnboundedSender<ControlEvent>,
    simulation: Option<SimulatedTime>,
    chunk_size: usize,
    sample_rate: u32,
    poll_interval: Duration,
    report: CaptureReport,
}

impl CaptureLoop {
    /// Read until the call ends, the source runs out, or the device gives up.
    ///
    /// Running out of input just closes the utterance channel; the
    /// orchestrator finishes what is queued before ending the call.
    fn run(mut self, report_tx: Sender<CaptureReport>) {
        let mut consecutive_errors: u32 = 0;

        while self.call_active.load(Ordering::SeqCst) {
            match self.source.read_samples() {
                Ok(samples) if samples.is_empty() => {
                    if self.source.is_finite() {
                        if let Some(tail) = self.splitter.flush() {
                            self.process(&tail.samples);
                        }
                        tracing::info!("Audio source ended");
                        break;
                    }
                    self.poll_idle();
                    thread::sleep(self.poll_interval);
                }
                Ok(samples) => {
                    consecutive_errors = 0;
                    for chunk in self.splitter.push(&samples) {
                        self.process(&chunk.samples);
                    }
                    if !self.source.is_finite() {
                        thread::sleep(self.poll_interval);
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    self.report.read_errors += 1;
                    if consecutive_errors >= defaults::MAX_CONSECUTIVE_ERRORS {
                        tracing::error!(
                            "Audio capture failed {} times in a row: {}",
                            consecutive_errors,
                            e
                        );
                        self.request(ControlEvent::Terminate(EndReason::CaptureFailed));
                        break;
                    }
                    tracing::warn!("Audio read failed, treating as silence: {}", e);
                    let silence = vec![0; self.chunk_size];
                    self.process(&silence);
                    thread::sleep(self.poll_interval);
                }
            }
        }

        if let Err(e) = self.source.stop() {
            tracing::warn!("Failed to stop audio capture: {}", e);
        }
        if let Some(simulation) = &self.simulation {
            simulation.finish();
        }
        self.report.barge_ins = self.turn.barge_ins();
        if report_tx.try_send(self.report).is_err() {
            tracing::debug!("Capture report dropped");
        }
    }

    fn process(&mut self, samples: &[i16]) {
        if let Some(simulation) = &self.simulation {
            simulation.wait_for_output(&self.playback, &self.call_active);
            simulation.advance(samples.len(), self.sample_rate);
        }
        self.report.chunks += 1;

        let step = self.turn.process(samples);
        if step.user_active {
            self.idle.user_activity();
        }
        if let TurnAction::Utterance(utterance) = step.action {
            self.report.utterances += 1;
            if self.utterances.send(utterance).is_err() {
                tracing::debug!("Dialogue gone, dropping utterance");
            }
        }
        self.poll_idle();
    }

    fn poll_idle(&mut self) {
        if matches!(self.playback.current_kind(), Some(kind) if kind != UtteranceKind::Reminder) {
            self.idle.assistant_activity();
        }
        match self.idle.poll(self.playback.is_speaking()) {
            IdleDecision::None => {}
            IdleDecision::Remind => self.request(ControlEvent::Remind),
            IdleDecision::Timeout => self.request(ControlEvent::Terminate(EndReason::Inactivity)),
        }
    }

    fn request(&self, event: ControlEvent) {
        if self.control.send(event).is_err() {
            tracing::debug!(?event, "Dialogue gone, dropping request");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_time_advances_by_audio_duration() {
        let clock = ManualClock::new();
        let speaker = Arc::new(MemorySink::buffered(16000));
        speaker.write(&[1; 1000]).unwrap();
        let time = SimulatedTime::new(clock.clone()).with_speaker(Arc::clone(&speaker));

        let before = clock.now();
        time.advance(512, 16000);
        assert_eq!(clock.now() - before, Duration::from_millis(32));
        assert_eq!(speaker.pending(), 1000 - 512);
        assert_eq!(speaker.played().len(), 512);
    }

    #[test]
    fn test_simulated_speaker_rate_conversion() {
        let speaker = Arc::new(MemorySink::buffered(24000));
        speaker.write(&[1; 2000]).unwrap();
        let time = SimulatedTime::new(ManualClock::new()).with_speaker(Arc::clone(&speaker));
        time.advance(160, 16000);
        assert_eq!(speaker.played().len(), 240);
    }

    #[test]
    fn test_simulated_speaker_plays_out_after_input_ends() {
        let speaker = Arc::new(MemorySink::buffered(16000));
        speaker.write(&[1; 300]).unwrap();
        let time = SimulatedTime::new(ManualClock::new()).with_speaker(Arc::clone(&speaker));
        time.finish();
        speaker.write(&[1; 100]).unwrap();
        assert_eq!(speaker.pending(), 0);
        assert_eq!(speaker.played().len(), 400);
    }

    #[test]
    fn test_engine_config_follows_file_config() {
        let mut config = Config::default();
        config.call.context_turns = 5;
        config.audio.chunk_size = 256;
        let engine = EngineConfig::from_config(&config);
        assert_eq!(engine.dialogue.context_turns, 5);
        assert_eq!(engine.chunk_size, 256);
        assert_eq!(engine.idle.reminder_after, Duration::from_secs(12));
    }
}
