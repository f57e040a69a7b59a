//! Call lifecycle: greeting, turn handling, reminders and termination.

use crate::defaults;
use crate::llm::{
    MinutesGenerator, Reasoner, ReasoningRequest, minutes_or_template, reason_or_fallback,
};
use crate::playback::{PlaybackEvent, PlaybackHandle, PlaybackOutcome, UtteranceKind};
use crate::session::export::PersistedCall;
use crate::session::{CallSession, CallStage, SessionPersister, SessionStore, TurnMetadata};
use crate::stt::{Transcriber, TranscriptionService};
use crate::turn::Utterance;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};

/// Log target for conversation lines.
pub const TRANSCRIPT_TARGET: &str = "leadline::transcript";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Greeting,
    Listening,
    Processing,
    Speaking,
    Ended,
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The caller stayed silent past the hard timeout.
    Inactivity,
    /// The conversation reached its natural end.
    Completed,
    /// Ended from outside, e.g. Ctrl+C.
    Hangup,
    /// A finite audio source ran out.
    SourceEnded,
    /// The input device kept failing.
    CaptureFailed,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EndReason::Inactivity => "inactivity",
            EndReason::Completed => "completed",
            EndReason::Hangup => "hangup",
            EndReason::SourceEnded => "source ended",
            EndReason::CaptureFailed => "capture failed",
        };
        f.write_str(label)
    }
}

/// Requests from the capture loop (or the outside world) to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Remind,
    Terminate(EndReason),
}

/// Summary of a finished call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub call_id: String,
    pub reason: EndReason,
    pub lead_score: u8,
    pub call_stage: CallStage,
    pub turns: usize,
    /// `None` when persisting failed.
    pub persisted: Option<PersistedCall>,
}

impl CallOutcome {
    fn new(reason: EndReason, session: &CallSession, persisted: Option<PersistedCall>) -> Self {
        Self {
            call_id: session.call_id.clone(),
            reason,
            lead_score: session.business_state.lead_score,
            call_stage: session.call_stage,
            turns: session.turns.len(),
            persisted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Turns of history handed to reasoning.
    pub context_turns: usize,
    /// Upper bound on waiting for the farewell.
    pub farewell_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            context_turns: defaults::CONTEXT_TURNS,
            farewell_timeout: Duration::from_secs(defaults::FAREWELL_TIMEOUT_SECS),
        }
    }
}

/// Drives one call from greeting to persisted minutes.
///
/// The orchestrator is the only writer of the [`SessionStore`]. Utterances are
/// handled one at a time in arrival order; capture and barge-in keep running on
/// their own thread meanwhile.
pub struct DialogueOrchestrator {
    store: Arc<Mutex<SessionStore>>,
    transcription: TranscriptionService,
    reasoner: Arc<dyn Reasoner>,
    minutes: Arc<dyn MinutesGenerator>,
    persister: Arc<dyn SessionPersister>,
    playback: PlaybackHandle,
    call_active: Arc<AtomicBool>,
    phase: watch::Sender<CallPhase>,
    config: OrchestratorConfig,
}

impl DialogueOrchestrator {
    pub fn new(
        store: SessionStore,
        playback: PlaybackHandle,
        transcriber: Arc<dyn Transcriber>,
        reasoner: Arc<dyn Reasoner>,
        minutes: Arc<dyn MinutesGenerator>,
        persister: Arc<dyn SessionPersister>,
    ) -> Self {
        let (phase, _) = watch::channel(CallPhase::Greeting);
        Self {
            store: Arc::new(Mutex::new(store)),
            transcription: TranscriptionService::new(transcriber),
            reasoner,
            minutes,
            persister,
            playback,
            call_active: Arc::new(AtomicBool::new(true)),
            phase,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> Arc<Mutex<SessionStore>> {
        Arc::clone(&self.store)
    }

    /// Cleared exactly once, when termination starts.
    pub fn call_active(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.call_active)
    }

    pub fn is_active(&self) -> bool {
        self.call_active.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> CallPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<CallPhase> {
        self.phase.subscribe()
    }

    /// Speak the greeting and log it as the first assistant turn.
    pub async fn greet(&self) {
        self.set_phase(CallPhase::Greeting);
        self.playback.play(defaults::GREETING, UtteranceKind::Greeting);
        tracing::info!(target: TRANSCRIPT_TARGET, "Assistant: {}", defaults::GREETING);

        let mut store = self.store.lock().await;
        store.add_assistant_turn(
            defaults::GREETING,
            TurnMetadata::with_intent("greeting", "neutral"),
        );
        store.update_summary();
    }

    /// Run the call until it terminates.
    ///
    /// The greeting must already have been issued with [`Self::greet`].
    pub async fn run(
        &self,
        mut utterances: mpsc::UnboundedReceiver<Utterance>,
        mut control: mpsc::UnboundedReceiver<ControlEvent>,
        mut events: mpsc::UnboundedReceiver<PlaybackEvent>,
    ) -> CallOutcome {
        let mut events_open = true;
        let reason = loop {
            tokio::select! {
                biased;
                event = control.recv() => match event {
                    Some(ControlEvent::Terminate(reason)) => break reason,
                    Some(ControlEvent::Remind) => self.remind(),
                    None => break EndReason::Hangup,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => self.on_playback_event(event).await,
                    None => events_open = false,
                },
                utterance = utterances.recv() => match utterance {
                    Some(utterance) => {
                        if let Some(reason) = self.handle_utterance(utterance).await {
                            break reason;
                        }
                    }
                    None => break EndReason::SourceEnded,
                },
            }
        };

        match self.terminate(reason).await {
            Some(outcome) => outcome,
            None => {
                let store = self.store.lock().await;
                CallOutcome::new(reason, store.session(), None)
            }
        }
    }

    fn remind(&self) {
        if !self.is_active() || self.playback.is_speaking() {
            tracing::debug!("Reminder skipped");
            return;
        }
        self.playback.play(defaults::REMINDER, UtteranceKind::Reminder);
        tracing::info!(target: TRANSCRIPT_TARGET, "Assistant: {}", defaults::REMINDER);
    }

    /// Process one caller utterance. Returns a reason when the call should end.
    pub async fn handle_utterance(&self, utterance: Utterance) -> Option<EndReason> {
        if !self.is_active() {
            return None;
        }
        self.set_phase(CallPhase::Processing);

        let text = self.transcription.transcribe(utterance.samples).await;
        if text.trim().chars().count() <= 1 {
            tracing::debug!(sequence = utterance.sequence, "Discarding empty transcript");
            self.settle_phase();
            return None;
        }
        tracing::info!(target: TRANSCRIPT_TARGET, "User: {}", text);

        let request = {
            let mut store = self.store.lock().await;
            store.add_user_turn(&text);
            ReasoningRequest {
                user_text: text,
                context: store.context_for_prompt(self.config.context_turns),
                entities: store.entities().clone(),
            }
        };

        let output = reason_or_fallback(self.reasoner.as_ref(), &request).await;
        tracing::info!(
            intent = %output.intent,
            sentiment = %output.sentiment,
            lead_stage = ?output.lead_stage,
            end_call = output.end_call,
            "Turn reasoned"
        );

        {
            let mut store = self.store.lock().await;
            store.add_assistant_turn(&output.response, output.metadata());
            store.set_lead_stage(output.lead_stage);
            store.update_summary();
            if let Some(stage) = CallStage::implied_by(output.lead_stage, output.end_call)
                && store.advance_stage(stage)
            {
                tracing::info!(?stage, "Call stage advanced");
            }
        }

        tracing::info!(target: TRANSCRIPT_TARGET, "Assistant: {}", output.response);
        if output.end_call {
            self.set_phase(CallPhase::Speaking);
            let played = tokio::time::timeout(
                self.config.farewell_timeout,
                self.playback
                    .play_and_wait(&output.response, UtteranceKind::Response),
            )
            .await;
            if played.is_err() {
                tracing::warn!("Closing response did not finish in time");
            }
            return Some(EndReason::Completed);
        }

        self.set_phase(CallPhase::Speaking);
        self.playback.play(&output.response, UtteranceKind::Response);
        None
    }

    async fn on_playback_event(&self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Started { kind, .. } => {
                if kind != UtteranceKind::Greeting {
                    self.set_phase(CallPhase::Speaking);
                }
            }
            PlaybackEvent::Interrupted { text, kind } => {
                tracing::info!(?kind, "Assistant utterance interrupted");
                self.store.lock().await.record_interruption(&text);
                self.settle_phase();
            }
            PlaybackEvent::Failed { kind, message, .. } => {
                tracing::warn!(?kind, "Utterance could not be played: {}", message);
                self.settle_phase();
            }
            PlaybackEvent::Finished { .. } => self.settle_phase(),
        }
    }

    /// End the call. Only the first call does anything.
    ///
    /// Speaks the farewell, releases the output device, closes the session,
    /// then writes minutes and analytics. Capture stops on its own once the
    /// active flag drops.
    pub async fn terminate(&self, reason: EndReason) -> Option<CallOutcome> {
        if !self.call_active.swap(false, Ordering::SeqCst) {
            tracing::debug!(%reason, "Call already terminated");
            return None;
        }
        tracing::info!(%reason, "Ending call");
        self.set_phase(CallPhase::Ended);

        tracing::info!(target: TRANSCRIPT_TARGET, "Assistant: {}", defaults::FAREWELL);
        match tokio::time::timeout(
            self.config.farewell_timeout,
            self.playback
                .play_and_wait(defaults::FAREWELL, UtteranceKind::Farewell),
        )
        .await
        {
            Ok(PlaybackOutcome::Finished) => {}
            Ok(outcome) => tracing::warn!(?outcome, "Farewell not fully played"),
            Err(_) => {
                tracing::warn!("Farewell did not finish in time");
                self.playback.cancel();
            }
        }
        self.playback.shutdown();
        if let Err(e) = self.playback.close_output() {
            tracing::warn!("Failed to close audio output: {}", e);
        }

        let (export, transcript) = {
            let mut store = self.store.lock().await;
            store.complete();
            (store.export(), store.full_transcript())
        };
        let session = &export.session;

        let minutes = minutes_or_template(self.minutes.as_ref(), session, &transcript).await;
        let persisted = match self.persister.persist(&export, &minutes).await {
            Ok(persisted) => Some(persisted),
            Err(e) => {
                tracing::error!(call_id = %session.call_id, "Failed to persist call: {}", e);
                None
            }
        };

        tracing::info!(
            call_id = %session.call_id,
            lead_score = session.business_state.lead_score,
            turns = session.turns.len(),
            "Call ended"
        );
        Some(CallOutcome::new(reason, session, persisted))
    }

    fn set_phase(&self, next: CallPhase) {
        self.phase.send_if_modified(|phase| {
            if *phase == CallPhase::Ended || *phase == next {
                return false;
            }
            tracing::debug!(from = ?*phase, to = ?next, "Call phase");
            *phase = next;
            true
        });
    }

    /// Back to listening unless something is still playing.
    fn settle_phase(&self) {
        if self.playback.is_speaking() {
            return;
        }
        if matches!(
            self.phase(),
            CallPhase::Greeting | CallPhase::Speaking | CallPhase::Processing
        ) {
            self.set_phase(CallPhase::Listening);
        }
    }
}
