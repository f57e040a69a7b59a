use crate::error::{LeadlineError, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Chunks buffered between a producer and playback.
pub const STREAM_CAPACITY: usize = 8;

/// Ordered stream of PCM16 mono chunks for one utterance.
///
/// Dropping the stream cancels synthesis: the producer task is aborted.
#[derive(Debug)]
pub struct SpeechStream {
    sample_rate: u32,
    receiver: mpsc::Receiver<Result<Vec<i16>>>,
    producer: Option<JoinHandle<()>>,
}

impl SpeechStream {
    /// Stream fed through the returned sender.
    pub fn channel(sample_rate: u32) -> (mpsc::Sender<Result<Vec<i16>>>, Self) {
        let (sender, receiver) = mpsc::channel(STREAM_CAPACITY);
        (
            sender,
            Self {
                sample_rate,
                receiver,
                producer: None,
            },
        )
    }

    /// Stream of chunks that are already available.
    pub fn from_chunks(sample_rate: u32, chunks: Vec<Vec<i16>>) -> Self {
        let (sender, receiver) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            if sender.try_send(Ok(chunk)).is_err() {
                break;
            }
        }
        Self {
            sample_rate,
            receiver,
            producer: None,
        }
    }

    /// Attach the task producing this stream so it is aborted on drop.
    pub fn with_producer(mut self, producer: JoinHandle<()>) -> Self {
        self.producer = Some(producer);
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Next chunk, or `None` once the utterance is complete.
    pub async fn next(&mut self) -> Option<Result<Vec<i16>>> {
        self.receiver.recv().await
    }
}

impl Drop for SpeechStream {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

/// Trait for text-to-speech synthesis.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Start synthesizing `text`. Audio arrives through the returned stream.
    async fn synthesize(&self, text: &str) -> Result<SpeechStream>;

    fn name(&self) -> &str;
}

/// Offline synthesizer that renders a soft tone for each utterance.
///
/// The tone lasts in proportion to the text, so playback timing, barge-in
/// and reminders behave as they would with real speech.
#[derive(Debug, Clone)]
pub struct ToneSynthesizer {
    sample_rate: u32,
    ms_per_char: u32,
    chunk_ms: u32,
}

impl ToneSynthesizer {
    const FREQUENCY_HZ: f32 = 220.0;
    const AMPLITUDE: f32 = 0.15;

    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ms_per_char: 60,
            chunk_ms: 20,
        }
    }

    pub fn with_ms_per_char(mut self, ms: u32) -> Self {
        self.ms_per_char = ms;
        self
    }

    /// Total samples rendered for `text`.
    pub fn samples_for(&self, text: &str) -> usize {
        let chars = text.chars().count() as u64;
        (chars * self.ms_per_char as u64 * self.sample_rate as u64 / 1000) as usize
    }

    fn render(&self, text: &str) -> Vec<Vec<i16>> {
        let total = self.samples_for(text);
        let chunk_len = (self.sample_rate * self.chunk_ms / 1000).max(1) as usize;
        let step = 2.0 * std::f32::consts::PI * Self::FREQUENCY_HZ / self.sample_rate as f32;
        let samples: Vec<i16> = (0..total)
            .map(|n| ((n as f32 * step).sin() * Self::AMPLITUDE * i16::MAX as f32) as i16)
            .collect();
        samples.chunks(chunk_len).map(|c| c.to_vec()).collect()
    }
}

#[async_trait]
impl Synthesizer for ToneSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SpeechStream> {
        let chunks = self.render(text);
        let (sender, stream) = SpeechStream::channel(self.sample_rate);
        let producer = tokio::spawn(async move {
            for chunk in chunks {
                if sender.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        });
        Ok(stream.with_producer(producer))
    }

    fn name(&self) -> &str {
        "tone"
    }
}

/// Mock synthesizer for testing
#[derive(Debug)]
pub struct MockSynthesizer {
    sample_rate: u32,
    chunks: usize,
    chunk_len: usize,
    should_fail: bool,
    texts: Mutex<Vec<String>>,
}

impl MockSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            chunks: 4,
            chunk_len: 160,
            should_fail: false,
            texts: Mutex::new(Vec::new()),
        }
    }

    /// Every utterance renders as `chunks` chunks of `chunk_len` samples
    pub fn with_chunks(mut self, chunks: usize, chunk_len: usize) -> Self {
        self.chunks = chunks;
        self.chunk_len = chunk_len;
        self
    }

    /// Configure the mock to fail on synthesize
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Every text passed in, in call order
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SpeechStream> {
        if let Ok(mut texts) = self.texts.lock() {
            texts.push(text.to_string());
        }
        if self.should_fail {
            return Err(LeadlineError::Synthesis {
                message: "mock synthesis failure".to_string(),
            });
        }
        let chunks = (0..self.chunks)
            .map(|_| vec![1000i16; self.chunk_len])
            .collect();
        Ok(SpeechStream::from_chunks(self.sample_rate, chunks))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
