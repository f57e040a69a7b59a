//! The single speech playback task of a call.
//!
//! One tokio task owns synthesis and the output device. It is driven by
//! [`PlaybackCommand`]s and reports what happened through [`PlaybackEvent`]s.
//! At most one utterance is authoritative at a time: a new response preempts
//! the current one, a reminder is rejected while anything is playing, and a
//! cancel discards everything queued on the device.

use crate::audio::recorder::AudioSink;
use crate::audio::wav::resample;
use crate::defaults;
use crate::tts::{SpeechStream, Synthesizer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const DRAIN_POLL: Duration = Duration::from_millis(defaults::CAPTURE_POLL_MS);

/// Why the assistant is speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceKind {
    Greeting,
    Response,
    Reminder,
    Farewell,
}

/// How one utterance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Every sample reached the device and drained.
    Finished,
    /// Cut off by a cancel or by a newer utterance.
    Interrupted,
    /// Not played because something else was playing.
    Rejected,
    /// Synthesis failed.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Cancelling,
}

impl UtteranceKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(UtteranceKind::Greeting),
            2 => Some(UtteranceKind::Response),
            3 => Some(UtteranceKind::Reminder),
            4 => Some(UtteranceKind::Farewell),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            UtteranceKind::Greeting => 1,
            UtteranceKind::Response => 2,
            UtteranceKind::Reminder => 3,
            UtteranceKind::Farewell => 4,
        }
    }
}

impl PlaybackState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackState::Playing,
            2 => PlaybackState::Cancelling,
            _ => PlaybackState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PlaybackState::Idle => 0,
            PlaybackState::Playing => 1,
            PlaybackState::Cancelling => 2,
        }
    }
}

#[derive(Debug)]
pub enum PlaybackCommand {
    Play {
        text: String,
        kind: UtteranceKind,
        done: Option<oneshot::Sender<PlaybackOutcome>>,
    },
    Cancel,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started { text: String, kind: UtteranceKind },
    Finished { text: String, kind: UtteranceKind },
    Interrupted { text: String, kind: UtteranceKind },
    Failed { text: String, kind: UtteranceKind, message: String },
}

struct Shared {
    speaking: Arc<AtomicBool>,
    epoch: AtomicU64,
    state: AtomicU8,
    kind: AtomicU8,
}

/// Cloneable control side of the playback task.
#[derive(Clone)]
pub struct PlaybackHandle {
    commands: mpsc::UnboundedSender<PlaybackCommand>,
    shared: Arc<Shared>,
    sink: Arc<dyn AudioSink>,
}

impl PlaybackHandle {
    /// Queue an utterance without waiting for it.
    ///
    /// Anything but a reminder marks the assistant as speaking right away,
    /// before the task picks the command up.
    pub fn play(&self, text: &str, kind: UtteranceKind) {
        self.request(text, kind, None);
    }

    /// Queue an utterance and wait until it ends.
    pub async fn play_and_wait(&self, text: &str, kind: UtteranceKind) -> PlaybackOutcome {
        let (done, outcome) = oneshot::channel();
        self.request(text, kind, Some(done));
        // A closed channel means the task is gone; nothing was played.
        outcome.await.unwrap_or(PlaybackOutcome::Failed)
    }

    /// Stop the current utterance immediately.
    ///
    /// Safe to call from the capture thread. Queued device audio is dropped
    /// right here; the task stops writing before its next chunk.
    pub fn cancel(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.sink.clear();
        self.send(PlaybackCommand::Cancel);
    }

    pub fn shutdown(&self) {
        self.send(PlaybackCommand::Shutdown);
    }

    /// Release the output device.
    pub fn close_output(&self) -> crate::error::Result<()> {
        self.sink.close()
    }

    /// Whether the assistant is speaking. Covers synthesis latency too.
    pub fn is_speaking(&self) -> bool {
        self.shared.speaking.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Kind of the utterance currently on the device, if any.
    pub fn current_kind(&self) -> Option<UtteranceKind> {
        UtteranceKind::from_u8(self.shared.kind.load(Ordering::SeqCst))
    }

    fn request(
        &self,
        text: &str,
        kind: UtteranceKind,
        done: Option<oneshot::Sender<PlaybackOutcome>>,
    ) {
        if kind != UtteranceKind::Reminder {
            self.shared.speaking.store(true, Ordering::SeqCst);
        }
        let sent = self.send(PlaybackCommand::Play {
            text: text.to_string(),
            kind,
            done,
        });
        if !sent && kind != UtteranceKind::Reminder {
            self.shared.speaking.store(false, Ordering::SeqCst);
        }
    }

    fn send(&self, command: PlaybackCommand) -> bool {
        let sent = self.commands.send(command).is_ok();
        if !sent {
            tracing::debug!("Playback task already stopped");
        }
        sent
    }
}

struct Active {
    text: String,
    kind: UtteranceKind,
    epoch: u64,
    stream: SpeechStream,
    stream_done: bool,
    done: Option<oneshot::Sender<PlaybackOutcome>>,
}

enum Step {
    Chunk(Vec<i16>),
    StreamFailed(String),
    StreamEnded,
    Drained,
    Draining,
}

async fn step(active: &mut Option<Active>, sink: &dyn AudioSink) -> Step {
    let Some(active) = active.as_mut() else {
        return std::future::pending().await;
    };
    if active.stream_done {
        if sink.pending() == 0 {
            return Step::Drained;
        }
        tokio::time::sleep(DRAIN_POLL).await;
        return Step::Draining;
    }
    match active.stream.next().await {
        Some(Ok(chunk)) => Step::Chunk(chunk),
        Some(Err(e)) => Step::StreamFailed(e.to_string()),
        None => Step::StreamEnded,
    }
}

struct PlaybackTask {
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

/// Start the playback task.
///
/// `speaking` is the call-wide "assistant is speaking" flag. The task clears
/// it whenever an utterance ends.
pub fn spawn_playback(
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn AudioSink>,
    speaking: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
) -> (PlaybackHandle, JoinHandle<()>) {
    let (commands, receiver) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        speaking,
        epoch: AtomicU64::new(0),
        state: AtomicU8::new(PlaybackState::Idle.as_u8()),
        kind: AtomicU8::new(0),
    });
    let handle = PlaybackHandle {
        commands,
        shared: Arc::clone(&shared),
        sink: Arc::clone(&sink),
    };
    let task = PlaybackTask {
        synthesizer,
        sink,
        shared,
        events,
    };
    (handle, tokio::spawn(task.run(receiver)))
}

impl PlaybackTask {
    async fn run(self, mut commands: mpsc::UnboundedReceiver<PlaybackCommand>) {
        let sink = Arc::clone(&self.sink);
        let mut current: Option<Active> = None;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(PlaybackCommand::Shutdown) => {
                        if let Some(active) = current.take() {
                            sink.clear();
                            self.end(active, PlaybackOutcome::Interrupted);
                        }
                        break;
                    }
                    Some(PlaybackCommand::Cancel) => {
                        if let Some(active) = current.take() {
                            self.set_state(PlaybackState::Cancelling);
                            sink.clear();
                            self.end(active, PlaybackOutcome::Interrupted);
                        }
                    }
                    Some(PlaybackCommand::Play { text, kind, done }) => {
                        if kind == UtteranceKind::Reminder && current.is_some() {
                            tracing::debug!("Reminder rejected while speaking");
                            reply(done, PlaybackOutcome::Rejected);
                            continue;
                        }
                        if let Some(active) = current.take() {
                            sink.clear();
                            self.end(active, PlaybackOutcome::Interrupted);
                        }
                        current = self.start(text, kind, done).await;
                    }
                },
                progress = step(&mut current, sink.as_ref()) => match progress {
                    Step::Chunk(samples) => {
                        let Some(active) = current.as_mut() else { continue };
                        if active.epoch != self.shared.epoch.load(Ordering::SeqCst) {
                            if let Some(active) = current.take() {
                                self.set_state(PlaybackState::Cancelling);
                                sink.clear();
                                self.end(active, PlaybackOutcome::Interrupted);
                            }
                            continue;
                        }
                        let samples = resample(&samples, active.stream.sample_rate(), sink.sample_rate());
                        if let Err(e) = sink.write(&samples) {
                            tracing::warn!("Audio output write failed: {}", e);
                            if let Some(active) = current.take() {
                                self.fail(active, e.to_string());
                            }
                        }
                    }
                    Step::StreamFailed(message) => {
                        tracing::warn!("Speech stream failed: {}", message);
                        if let Some(active) = current.as_mut() {
                            // Play out what already reached the device
                            active.stream_done = true;
                        }
                    }
                    Step::StreamEnded => {
                        if let Some(active) = current.as_mut() {
                            active.stream_done = true;
                        }
                    }
                    Step::Drained => {
                        if let Some(active) = current.take() {
                            self.end(active, PlaybackOutcome::Finished);
                        }
                    }
                    Step::Draining => {}
                },
            }
        }

        tracing::debug!("Playback task stopped");
    }

    async fn start(
        &self,
        text: String,
        kind: UtteranceKind,
        done: Option<oneshot::Sender<PlaybackOutcome>>,
    ) -> Option<Active> {
        let epoch = self.shared.epoch.load(Ordering::SeqCst);
        self.shared.speaking.store(true, Ordering::SeqCst);
        self.set_state(PlaybackState::Playing);

        match self.synthesizer.synthesize(&text).await {
            Ok(stream) => {
                tracing::debug!(?kind, chars = text.len(), "Playback started");
                self.shared.kind.store(kind.as_u8(), Ordering::SeqCst);
                self.emit(PlaybackEvent::Started {
                    text: text.clone(),
                    kind,
                });
                Some(Active {
                    text,
                    kind,
                    epoch,
                    stream,
                    stream_done: false,
                    done,
                })
            }
            Err(e) => {
                tracing::warn!(synthesizer = self.synthesizer.name(), "Synthesis failed: {}", e);
                self.idle();
                self.emit(PlaybackEvent::Failed {
                    text,
                    kind,
                    message: e.to_string(),
                });
                reply(done, PlaybackOutcome::Failed);
                None
            }
        }
    }

    fn end(&self, active: Active, outcome: PlaybackOutcome) {
        let Active {
            text, kind, done, ..
        } = active;
        self.idle();
        tracing::debug!(?kind, ?outcome, "Playback ended");
        let event = match outcome {
            PlaybackOutcome::Interrupted => PlaybackEvent::Interrupted { text, kind },
            _ => PlaybackEvent::Finished { text, kind },
        };
        self.emit(event);
        reply(done, outcome);
    }

    fn fail(&self, active: Active, message: String) {
        let Active {
            text, kind, done, ..
        } = active;
        self.sink.clear();
        self.idle();
        self.emit(PlaybackEvent::Failed {
            text,
            kind,
            message,
        });
        reply(done, PlaybackOutcome::Failed);
    }

    fn idle(&self) {
        self.shared.speaking.store(false, Ordering::SeqCst);
        self.shared.kind.store(0, Ordering::SeqCst);
        self.set_state(PlaybackState::Idle);
    }

    fn set_state(&self, state: PlaybackState) {
        self.shared.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn emit(&self, event: PlaybackEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Playback event receiver dropped");
        }
    }
}

fn reply(done: Option<oneshot::Sender<PlaybackOutcome>>, outcome: PlaybackOutcome) {
    if let Some(done) = done
        && done.send(outcome).is_err()
    {
        tracing::debug!("Playback waiter went away");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::recorder::MemorySink;
    use crate::tts::MockSynthesizer;

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        handle: PlaybackHandle,
        events: mpsc::UnboundedReceiver<PlaybackEvent>,
        sink: Arc<MemorySink>,
        synth: Arc<MockSynthesizer>,
    }

    fn harness(sink: MemorySink, synth: MockSynthesizer) -> Harness {
        let sink = Arc::new(sink);
        let synth = Arc::new(synth);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (handle, _task) = spawn_playback(
            synth.clone(),
            sink.clone(),
            Arc::new(AtomicBool::new(false)),
            events_tx,
        );
        Harness {
            handle,
            events,
            sink,
            synth,
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<PlaybackEvent>) -> PlaybackEvent {
        tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for playback event")
            .expect("event channel closed")
    }

    async fn wait_for_pending(sink: &MemorySink) {
        tokio::time::timeout(WAIT, async {
            while sink.pending() == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("sink never received audio");
    }

    #[tokio::test]
    async fn test_play_to_completion() {
        let mut h = harness(MemorySink::instant(16000), MockSynthesizer::new(16000).with_chunks(3, 100));

        let outcome = h.handle.play_and_wait("Hello there", UtteranceKind::Greeting).await;

        assert_eq!(outcome, PlaybackOutcome::Finished);
        assert_eq!(h.sink.played().len(), 300);
        assert!(!h.handle.is_speaking());
        assert_eq!(h.handle.state(), PlaybackState::Idle);
        assert_eq!(
            next_event(&mut h.events).await,
            PlaybackEvent::Started {
                text: "Hello there".to_string(),
                kind: UtteranceKind::Greeting
            }
        );
        assert!(matches!(next_event(&mut h.events).await, PlaybackEvent::Finished { .. }));
    }

    #[tokio::test]
    async fn test_cancel_discards_queued_audio() {
        let mut h = harness(MemorySink::buffered(16000), MockSynthesizer::new(16000).with_chunks(4, 160));

        h.handle.play("A long answer about villas", UtteranceKind::Response);
        assert!(matches!(next_event(&mut h.events).await, PlaybackEvent::Started { .. }));
        wait_for_pending(&h.sink).await;
        assert!(h.handle.is_speaking());
        assert_eq!(h.handle.current_kind(), Some(UtteranceKind::Response));

        h.handle.cancel();

        assert_eq!(
            next_event(&mut h.events).await,
            PlaybackEvent::Interrupted {
                text: "A long answer about villas".to_string(),
                kind: UtteranceKind::Response
            }
        );
        assert_eq!(h.sink.pending(), 0);
        assert!(h.sink.discarded() > 0);
        assert!(h.sink.played().is_empty());
        assert!(!h.handle.is_speaking());
        assert_eq!(h.handle.current_kind(), None);
    }

    #[tokio::test]
    async fn test_reminder_rejected_while_speaking() {
        let mut h = harness(MemorySink::buffered(16000), MockSynthesizer::new(16000));

        h.handle.play("Let me explain the loan options", UtteranceKind::Response);
        assert!(matches!(next_event(&mut h.events).await, PlaybackEvent::Started { .. }));

        let outcome = h.handle.play_and_wait("Are you still there?", UtteranceKind::Reminder).await;

        assert_eq!(outcome, PlaybackOutcome::Rejected);
        assert!(h.handle.is_speaking());
        assert_eq!(h.synth.texts(), vec!["Let me explain the loan options"]);
    }

    #[tokio::test]
    async fn test_response_preempts_current_playback() {
        let mut h = harness(MemorySink::buffered(16000), MockSynthesizer::new(16000));

        h.handle.play("first", UtteranceKind::Response);
        assert!(matches!(next_event(&mut h.events).await, PlaybackEvent::Started { .. }));
        h.handle.play("second", UtteranceKind::Response);

        assert_eq!(
            next_event(&mut h.events).await,
            PlaybackEvent::Interrupted {
                text: "first".to_string(),
                kind: UtteranceKind::Response
            }
        );
        assert_eq!(
            next_event(&mut h.events).await,
            PlaybackEvent::Started {
                text: "second".to_string(),
                kind: UtteranceKind::Response
            }
        );
        assert!(h.handle.is_speaking());
    }

    #[tokio::test]
    async fn test_playback_waits_for_device_to_drain() {
        let mut h = harness(MemorySink::buffered(16000), MockSynthesizer::new(16000).with_chunks(2, 50));

        h.handle.play("Okay", UtteranceKind::Response);
        assert!(matches!(next_event(&mut h.events).await, PlaybackEvent::Started { .. }));
        tokio::time::timeout(WAIT, async {
            while h.sink.pending() < 100 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert!(h.handle.is_speaking());

        h.sink.consume(100);

        assert!(matches!(next_event(&mut h.events).await, PlaybackEvent::Finished { .. }));
        assert!(!h.handle.is_speaking());
        assert_eq!(h.sink.played().len(), 100);
    }

    #[tokio::test]
    async fn test_synthesis_failure_is_reported() {
        let mut h = harness(MemorySink::instant(16000), MockSynthesizer::new(16000).with_failure());

        let outcome = h.handle.play_and_wait("Hello", UtteranceKind::Greeting).await;

        assert_eq!(outcome, PlaybackOutcome::Failed);
        assert!(!h.handle.is_speaking());
        assert!(matches!(next_event(&mut h.events).await, PlaybackEvent::Failed { .. }));
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_harmless() {
        let h = harness(MemorySink::instant(16000), MockSynthesizer::new(16000));
        h.handle.cancel();
        let outcome = h.handle.play_and_wait("Still works", UtteranceKind::Response).await;
        assert_eq!(outcome, PlaybackOutcome::Finished);
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let h = harness(MemorySink::instant(16000), MockSynthesizer::new(16000));
        h.handle.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            h.handle.play_and_wait("late", UtteranceKind::Response).await,
            PlaybackOutcome::Failed
        );
        assert!(!h.handle.is_speaking());
    }

    #[tokio::test]
    async fn test_play_marks_speaking_immediately() {
        let h = harness(MemorySink::buffered(16000), MockSynthesizer::new(16000));
        h.handle.play("Hello", UtteranceKind::Greeting);
        assert!(h.handle.is_speaking());

        let reminder = harness(MemorySink::buffered(16000), MockSynthesizer::new(16000));
        reminder.handle.play("Are you there?", UtteranceKind::Reminder);
        assert!(!reminder.handle.is_speaking());
    }
}
