//! Streaming synthesis against an OpenAI-compatible `/audio/speech` endpoint.

use crate::config::TtsConfig;
use crate::error::{LeadlineError, Result};
use crate::tts::synthesizer::{SpeechStream, Synthesizer};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use std::time::Duration;

/// Raw `pcm` responses are 24 kHz 16-bit little-endian mono.
pub const PCM_SAMPLE_RATE: u32 = 24_000;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
}

/// Splits a little-endian PCM16 byte stream into fixed-size sample chunks.
///
/// Network reads can split a sample across two byte chunks; the odd byte is
/// carried over to the next push.
#[derive(Debug)]
pub struct PcmDecoder {
    chunk_samples: usize,
    carry: Option<u8>,
    pending: Vec<i16>,
}

impl PcmDecoder {
    pub fn new(chunk_samples: usize) -> Self {
        let chunk_samples = chunk_samples.max(1);
        Self {
            chunk_samples,
            carry: None,
            pending: Vec::with_capacity(chunk_samples),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<i16>> {
        let mut input = bytes;
        if let Some(low) = self.carry.take() {
            match input.split_first() {
                Some((&high, rest)) => {
                    self.pending.push(i16::from_le_bytes([low, high]));
                    input = rest;
                }
                None => {
                    self.carry = Some(low);
                    return Vec::new();
                }
            }
        }

        let mut pairs = input.chunks_exact(2);
        for pair in &mut pairs {
            self.pending.push(i16::from_le_bytes([pair[0], pair[1]]));
        }
        if let [odd] = pairs.remainder() {
            self.carry = Some(*odd);
        }

        let mut ready = Vec::new();
        while self.pending.len() >= self.chunk_samples {
            let rest = self.pending.split_off(self.chunk_samples);
            ready.push(std::mem::replace(&mut self.pending, rest));
        }
        ready
    }

    /// Whatever is left once the body ends. A dangling odd byte is dropped.
    pub fn finish(&mut self) -> Option<Vec<i16>> {
        self.carry = None;
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

pub struct HttpSynthesizer {
    http: reqwest::Client,
    config: TtsConfig,
    api_key: String,
}

impl std::fmt::Debug for HttpSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSynthesizer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HttpSynthesizer {
    /// # Errors
    /// Returns `LeadlineError::MissingApiKey` when the configured key variable is unset.
    pub fn from_config(config: &TtsConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| LeadlineError::MissingApiKey {
                var: config.api_key_env.clone(),
            })?;
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| LeadlineError::Synthesis {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            http,
            config: config.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SpeechStream> {
        let body = SpeechRequest {
            model: &self.config.model,
            input: text,
            voice: &self.config.voice,
            response_format: "pcm",
        };

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LeadlineError::Synthesis {
                message: format!("Request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LeadlineError::Synthesis {
                message: format!("API error ({}): {}", status, detail),
            });
        }

        let (sender, stream) = SpeechStream::channel(PCM_SAMPLE_RATE);
        let producer = tokio::spawn(async move {
            // ~20 ms per chunk
            let mut decoder = PcmDecoder::new((PCM_SAMPLE_RATE / 50) as usize);
            let mut body = response.bytes_stream();
            while let Some(item) = body.next().await {
                match item {
                    Ok(bytes) => {
                        for chunk in decoder.push(&bytes) {
                            if sender.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let error = LeadlineError::Synthesis {
                            message: format!("Audio stream interrupted: {}", e),
                        };
                        if sender.send(Err(error)).await.is_err() {
                            tracing::debug!("Speech stream closed before error was delivered");
                        }
                        return;
                    }
                }
            }
            if let Some(tail) = decoder.finish()
                && sender.send(Ok(tail)).await.is_err()
            {
                tracing::debug!("Speech stream closed before final chunk");
            }
        });

        Ok(stream.with_producer(producer))
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_decoder_emits_full_chunks() {
        let mut decoder = PcmDecoder::new(2);
        let chunks = decoder.push(&le_bytes(&[1, -2, 300, 4, 5]));
        assert_eq!(chunks, vec![vec![1, -2], vec![300, 4]]);
        assert_eq!(decoder.finish(), Some(vec![5]));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_joins_split_sample() {
        let mut decoder = PcmDecoder::new(4);
        let bytes = le_bytes(&[1000, -1000]);
        assert!(decoder.push(&bytes[..1]).is_empty());
        assert!(decoder.push(&[]).is_empty());
        assert!(decoder.push(&bytes[1..3]).is_empty());
        assert!(decoder.push(&bytes[3..]).is_empty());
        assert_eq!(decoder.finish(), Some(vec![1000, -1000]));
    }

    #[test]
    fn test_request_body_asks_for_raw_pcm() {
        let body = SpeechRequest {
            model: "tts-1",
            input: "Hello",
            voice: "alloy",
            response_format: "pcm",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["response_format"], "pcm");
        assert_eq!(json["input"], "Hello");
    }

    #[test]
    fn test_missing_api_key() {
        let config = TtsConfig {
            api_key_env: "LEADLINE_TEST_TTS_KEY_THAT_IS_NEVER_SET".to_string(),
            ..TtsConfig::default()
        };
        assert!(matches!(
            HttpSynthesizer::from_config(&config),
            Err(LeadlineError::MissingApiKey { .. })
        ));
    }
}
