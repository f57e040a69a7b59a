use crate::error::{LeadlineError, Result};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait AudioSource: Send + Sync {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Read whatever samples arrived since the last call.
    ///
    /// # Returns
    /// Vector of 16-bit PCM audio samples (possibly empty), or an error
    fn read_samples(&mut self) -> Result<Vec<i16>>;

    /// Whether the source ends on its own (e.g. a file). An empty read from a
    /// finite source means end of input.
    fn is_finite(&self) -> bool {
        false
    }
}

/// Trait for audio output devices.
///
/// Shared between the playback task (which writes) and the capture thread
/// (which clears on barge-in), so every method takes `&self`.
pub trait AudioSink: Send + Sync {
    /// Queue samples for output.
    fn write(&self, samples: &[i16]) -> Result<()>;

    /// Drop every queued sample that has not been played yet.
    fn clear(&self);

    /// Number of queued samples not yet played.
    fn pending(&self) -> usize;

    /// Release the device. Later writes are rejected.
    fn close(&self) -> Result<()>;

    /// Sample rate the sink expects.
    fn sample_rate(&self) -> u32;
}

/// Finite source replaying a prepared list of reads, then ending.
///
/// Each entry is either a block of samples or a read failure.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAudioSource {
    reads: VecDeque<std::result::Result<Vec<i16>, String>>,
    stopped: bool,
}

impl ScriptedAudioSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunks` reads of a constant amplitude.
    pub fn then_level(mut self, amplitude: i16, chunks: usize, chunk_size: usize) -> Self {
        for _ in 0..chunks {
            self.reads.push_back(Ok(vec![amplitude; chunk_size]));
        }
        self
    }

    /// Append `chunks` reads of silence.
    pub fn then_silence(self, chunks: usize, chunk_size: usize) -> Self {
        self.then_level(0, chunks, chunk_size)
    }

    /// Append one failing read.
    pub fn then_failure(mut self, message: &str) -> Self {
        self.reads.push_back(Err(message.to_string()));
        self
    }

    /// Number of reads left.
    pub fn remaining(&self) -> usize {
        self.reads.len()
    }
}

impl AudioSource for ScriptedAudioSource {
    fn start(&mut self) -> Result<()> {
        self.stopped = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stopped = true;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.stopped {
            return Ok(Vec::new());
        }
        match self.reads.pop_front() {
            Some(Ok(samples)) => Ok(samples),
            Some(Err(message)) => Err(LeadlineError::AudioCapture { message }),
            None => Ok(Vec::new()),
        }
    }

    fn is_finite(&self) -> bool {
        true
    }
}

/// In-memory audio sink.
///
/// In instant mode every write is played immediately. In buffered mode
/// writes queue up until [`MemorySink::consume`] plays them, which lets tests
/// observe what a barge-in discards.
#[derive(Debug)]
pub struct MemorySink {
    sample_rate: u32,
    buffered: AtomicBool,
    queue: Mutex<VecDeque<i16>>,
    played: Mutex<Vec<i16>>,
    writes: AtomicUsize,
    clears: AtomicUsize,
    discarded: AtomicUsize,
    closed: AtomicBool,
}

impl MemorySink {
    /// Sink that plays writes immediately.
    pub fn instant(sample_rate: u32) -> Self {
        Self::build(sample_rate, false)
    }

    /// Sink that holds writes until consumed.
    pub fn buffered(sample_rate: u32) -> Self {
        Self::build(sample_rate, true)
    }

    fn build(sample_rate: u32, buffered: bool) -> Self {
        Self {
            sample_rate,
            buffered: AtomicBool::new(buffered),
            queue: Mutex::new(VecDeque::new()),
            played: Mutex::new(Vec::new()),
            writes: AtomicUsize::new(0),
            clears: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Play up to `count` queued samples; returns how many were played.
    pub fn consume(&self, count: usize) -> usize {
        let Ok(mut queue) = self.queue.lock() else {
            return 0;
        };
        let take = count.min(queue.len());
        let drained: Vec<i16> = queue.drain(..take).collect();
        drop(queue);
        if let Ok(mut played) = self.played.lock() {
            played.extend(drained);
        }
        take
    }

    /// Switch to instant mode, playing everything still queued.
    pub fn play_through(&self) {
        self.buffered.store(false, Ordering::SeqCst);
        self.consume(usize::MAX);
    }

    /// Every sample that reached the "speaker".
    pub fn played(&self) -> Vec<i16> {
        self.played.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    /// Samples dropped by `clear()`.
    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl AudioSink for MemorySink {
    fn write(&self, samples: &[i16]) -> Result<()> {
        if self.is_closed() {
            return Err(LeadlineError::AudioPlayback {
                message: "sink is closed".to_string(),
            });
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.buffered.load(Ordering::SeqCst) {
            let mut queue = self.queue.lock().map_err(|e| LeadlineError::AudioPlayback {
                message: format!("Failed to lock sink queue: {}", e),
            })?;
            queue.extend(samples.iter().copied());
        } else {
            let mut played = self.played.lock().map_err(|e| LeadlineError::AudioPlayback {
                message: format!("Failed to lock sink output: {}", e),
            })?;
            played.extend_from_slice(samples);
        }
        Ok(())
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut queue) = self.queue.lock() {
            self.discarded.fetch_add(queue.len(), Ordering::SeqCst);
            queue.clear();
        }
    }

    fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.clear();
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
