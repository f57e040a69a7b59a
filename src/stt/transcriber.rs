use crate::error::{LeadlineError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Speech-to-text for one finished caller utterance.
///
/// Blocking. [`TranscriptionService`] moves calls onto the blocking pool.
pub trait Transcriber: Send + Sync {
    /// Text for `audio`, 16 kHz mono PCM16.
    fn transcribe(&self, audio: &[i16]) -> Result<String>;

    fn model_name(&self) -> &str;

    /// False when the backend cannot decode (missing feature, failed load).
    fn is_ready(&self) -> bool;
}

impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    fn transcribe(&self, audio: &[i16]) -> Result<String> {
        (**self).transcribe(audio)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

/// Async boundary around a blocking [`Transcriber`].
///
/// Failures never reach the dialogue: an error or a panic inside the engine
/// becomes an empty transcript, which the orchestrator drops as noise.
#[derive(Clone)]
pub struct TranscriptionService {
    inner: Arc<dyn Transcriber>,
}

impl TranscriptionService {
    pub fn new(inner: Arc<dyn Transcriber>) -> Self {
        Self { inner }
    }

    pub fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    pub async fn transcribe(&self, samples: Vec<i16>) -> String {
        let transcriber = Arc::clone(&self.inner);
        let started = std::time::Instant::now();
        let result =
            tokio::task::spawn_blocking(move || transcriber.transcribe(&samples)).await;

        match result {
            Ok(Ok(text)) => {
                tracing::debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    chars = text.len(),
                    "Transcribed utterance"
                );
                text.trim().to_string()
            }
            Ok(Err(e)) => {
                tracing::warn!("Transcription failed: {}", e);
                String::new()
            }
            Err(e) => {
                tracing::warn!("Transcription task aborted: {}", e);
                String::new()
            }
        }
    }
}

/// Canned transcripts for tests and scripted simulations.
#[derive(Debug)]
pub struct MockTranscriber {
    model_name: String,
    response: String,
    queued: Mutex<VecDeque<String>>,
    should_fail: bool,
    should_panic: bool,
    calls: Mutex<Vec<usize>>,
}

impl MockTranscriber {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: "mock transcription".to_string(),
            queued: Mutex::new(VecDeque::new()),
            should_fail: false,
            should_panic: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Transcript returned once the queue is empty.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Responses returned in order, one per call, before falling back to
    /// the fixed response
    pub fn with_responses(self, responses: &[&str]) -> Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.extend(responses.iter().map(|r| r.to_string()));
        }
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Panic inside `transcribe`, as a crashing backend would.
    pub fn with_panic(mut self) -> Self {
        self.should_panic = true;
        self
    }

    /// Length of every utterance passed in, in call order
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&self, audio: &[i16]) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(audio.len());
        }
        if self.should_panic {
            panic!("mock transcriber panic");
        }
        if self.should_fail {
            return Err(LeadlineError::Transcription {
                message: "mock transcription failure".to_string(),
            });
        }
        let next = self.queued.lock().ok().and_then(|mut q| q.pop_front());
        Ok(next.unwrap_or_else(|| self.response.clone()))
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        !self.should_fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_transcriber_returns_queued_responses_in_order() {
        let transcriber = MockTranscriber::new("test-model")
            .with_response("fallback")
            .with_responses(&["first", "second"]);
        assert_eq!(transcriber.transcribe(&[0; 10]).unwrap(), "first");
        assert_eq!(transcriber.transcribe(&[0; 20]).unwrap(), "second");
        assert_eq!(transcriber.transcribe(&[0; 30]).unwrap(), "fallback");
        assert_eq!(transcriber.calls(), vec![10, 20, 30]);
    }

    #[test]
    fn test_mock_transcriber_returns_error_when_configured() {
        let transcriber = MockTranscriber::new("test-model").with_failure();
        assert!(matches!(
            transcriber.transcribe(&[0; 1000]),
            Err(LeadlineError::Transcription { .. })
        ));
        assert!(!transcriber.is_ready());
    }

    #[test]
    fn test_arc_transcriber_delegates() {
        let transcriber = Arc::new(MockTranscriber::new("shared").with_response("ok"));
        assert_eq!(transcriber.model_name(), "shared");
        assert_eq!(Transcriber::transcribe(&transcriber, &[0; 4]).unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_service_trims_text() {
        let service = TranscriptionService::new(Arc::new(
            MockTranscriber::new("m").with_response("  I want a 2BHK  "),
        ));
        assert_eq!(service.transcribe(vec![0; 512]).await, "I want a 2BHK");
    }

    #[tokio::test]
    async fn test_service_maps_failure_to_empty() {
        let service = TranscriptionService::new(Arc::new(MockTranscriber::new("m").with_failure()));
        assert_eq!(service.transcribe(vec![0; 512]).await, "");
    }

    #[tokio::test]
    async fn test_service_maps_panic_to_empty() {
        let service = TranscriptionService::new(Arc::new(MockTranscriber::new("m").with_panic()));
        assert_eq!(service.transcribe(vec![0; 512]).await, "");
    }
}
