//! Gemini `generateContent` client for reasoning and minutes.

use crate::config::ReasoningConfig;
use crate::defaults;
use crate::error::{LeadlineError, Result};
use crate::llm::minutes::MinutesGenerator;
use crate::llm::prompt;
use crate::llm::reasoner::{Reasoner, ReasoningRequest};
use crate::session::CallSession;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CandidatePart {
    text: String,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .map(|c| c.content.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Shared HTTP client for one Gemini model.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    /// Build a client, reading the API key from the configured variable.
    ///
    /// # Errors
    /// Returns `LeadlineError::MissingApiKey` when the variable is unset or empty.
    pub fn from_config(config: &ReasoningConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| LeadlineError::MissingApiKey {
                var: config.api_key_env.clone(),
            })?;
        Self::new(&config.endpoint, &config.model, api_key)
    }

    pub fn new(endpoint: &str, model: &str, api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LeadlineError::Reasoning {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    /// Send one prompt and return the concatenated candidate text.
    pub async fn generate(&self, prompt: &str, temperature: f32) -> Result<String> {
        let body = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: prompt }],
            }],
            generation_config: GenerationConfig { temperature },
        };

        let response = self
            .http
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LeadlineError::Reasoning {
                message: format!("Request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LeadlineError::Reasoning {
                message: format!("API error ({}): {}", status, detail),
            });
        }

        let parsed: GenerateResponse =
            response.json().await.map_err(|e| LeadlineError::Reasoning {
                message: format!("Invalid response body: {}", e),
            })?;
        let text = parsed.text();
        if text.trim().is_empty() {
            return Err(LeadlineError::Reasoning {
                message: "empty completion".to_string(),
            });
        }
        Ok(text)
    }
}

/// Reasoner backed by Gemini.
#[derive(Debug, Clone)]
pub struct GeminiReasoner {
    client: GeminiClient,
    temperature: f32,
}

impl GeminiReasoner {
    pub fn new(client: GeminiClient) -> Self {
        Self {
            client,
            temperature: defaults::REASONING_TEMPERATURE,
        }
    }
}

#[async_trait]
impl Reasoner for GeminiReasoner {
    async fn reason(&self, request: &ReasoningRequest) -> Result<String> {
        let prompt = prompt::reasoning_prompt(request);
        let started = std::time::Instant::now();
        let text = self.client.generate(&prompt, self.temperature).await?;
        tracing::debug!(
            model = self.client.model(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Reasoning completed"
        );
        Ok(text)
    }

    fn name(&self) -> &str {
        self.client.model()
    }
}

/// Minutes of meeting written by Gemini.
#[derive(Debug, Clone)]
pub struct GeminiMinutes {
    client: GeminiClient,
    temperature: f32,
}

impl GeminiMinutes {
    pub fn new(client: GeminiClient) -> Self {
        Self {
            client,
            temperature: defaults::MINUTES_TEMPERATURE,
        }
    }
}

#[async_trait]
impl MinutesGenerator for GeminiMinutes {
    async fn generate(&self, session: &CallSession, transcript: &str) -> Result<String> {
        let prompt = prompt::minutes_prompt(session, transcript);
        self.client
            .generate(&prompt, self.temperature)
            .await
            .map(|text| text.trim().to_string())
            .map_err(|e| LeadlineError::Minutes {
                message: e.to_string(),
            })
    }

    fn name(&self) -> &str {
        self.client.model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: "hello" }],
            }],
            generation_config: GenerationConfig { temperature: 0.2 },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(json["contents"][0]["role"], "user");
        assert!(json["generationConfig"]["temperature"].as_f64().unwrap() > 0.19);
    }

    #[test]
    fn test_response_text_joins_parts() {
        let parsed: GenerateResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "{\"intent\":"}, {"text": " \"inquiry\"}"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.text(), r#"{"intent": "inquiry"}"#);

        let empty: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.text(), "");
    }

    #[test]
    fn test_url_strips_trailing_slash() {
        let client = GeminiClient::new(
            "https://example.invalid/v1beta/",
            "gemini-2.5-flash",
            "key".to_string(),
        )
        .unwrap();
        assert_eq!(
            client.url(),
            "https://example.invalid/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn test_missing_api_key() {
        let config = ReasoningConfig {
            api_key_env: "LEADLINE_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..ReasoningConfig::default()
        };
        match GeminiClient::from_config(&config) {
            Err(LeadlineError::MissingApiKey { var }) => {
                assert_eq!(var, "LEADLINE_TEST_KEY_THAT_IS_NEVER_SET");
            }
            other => panic!("Expected MissingApiKey, got {:?}", other),
        }
    }
}
