use crate::audio::vad::{EnergyClassifier, SpeechClassifier, SpeechEvent, VoiceActivityDetector};
use crate::playback::PlaybackHandle;

/// Something that can stop the assistant's speech from the capture thread.
pub trait SpeechCanceller: Send + Sync {
    fn is_speaking(&self) -> bool;

    /// Stop speaking now. Must not block.
    fn cancel(&self);
}

impl SpeechCanceller for PlaybackHandle {
    fn is_speaking(&self) -> bool {
        PlaybackHandle::is_speaking(self)
    }

    fn cancel(&self) {
        PlaybackHandle::cancel(self)
    }
}

/// A completed caller utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    /// Position among the utterances of this call, starting at 0.
    pub sequence: u64,
    pub samples: Vec<i16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAction {
    None,
    /// The caller started talking over the assistant; playback was cancelled.
    BargeIn,
    Utterance(Utterance),
}

/// Result of feeding one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnStep {
    pub event: SpeechEvent,
    /// The caller is mid-utterance (the chunk was buffered).
    pub user_active: bool,
    pub action: TurnAction,
}

/// Turns VAD edges into utterances and barge-ins.
///
/// Audio is buffered only while the detector is triggered, starting with the
/// chunk that triggers it. The chunk that ends an utterance is not part of it.
pub struct TurnController<C: SpeechCanceller, S: SpeechClassifier = EnergyClassifier> {
    vad: VoiceActivityDetector<S>,
    canceller: C,
    buffer: Vec<i16>,
    next_sequence: u64,
    barge_ins: u64,
}

impl<C: SpeechCanceller, S: SpeechClassifier> TurnController<C, S> {
    pub fn new(vad: VoiceActivityDetector<S>, canceller: C) -> Self {
        Self {
            vad,
            canceller,
            buffer: Vec::new(),
            next_sequence: 0,
            barge_ins: 0,
        }
    }

    pub fn process(&mut self, samples: &[i16]) -> TurnStep {
        let event = self.vad.process(samples);
        let user_active = self.vad.is_triggered();
        if user_active {
            self.buffer.extend_from_slice(samples);
        }

        let action = match event {
            SpeechEvent::SpeechStarted if self.canceller.is_speaking() => {
                self.canceller.cancel();
                self.barge_ins += 1;
                tracing::info!("Barge-in: caller interrupted playback");
                TurnAction::BargeIn
            }
            SpeechEvent::SpeechEnded if !self.buffer.is_empty() => {
                let samples = std::mem::take(&mut self.buffer);
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                tracing::debug!(sequence, samples = samples.len(), "Utterance complete");
                TurnAction::Utterance(Utterance { sequence, samples })
            }
            _ => TurnAction::None,
        };

        TurnStep {
            event,
            user_active,
            action,
        }
    }

    /// Samples of the utterance in progress.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn barge_ins(&self) -> u64 {
        self.barge_ins
    }
}
