//! Text-generation gateway.
//!
//! A single async trait wraps the hosted generation service. The service is
//! treated as unreliable: callers get raw text back and run it through the
//! extractor before trusting anything in it. Generation calls are never
//! retried automatically — a repeated call is not guaranteed to produce a
//! better result, so retry policy belongs to the application layer.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when calling the generation service.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// An HTTP-level error (connection failure, DNS, TLS, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The API returned a non-success status with a message.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The API indicated rate limiting (HTTP 429).
    #[error("rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// Failed to parse the API response envelope.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for GenerateError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerateError::Timeout
        } else {
            GenerateError::Http(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Core data types
// ---------------------------------------------------------------------------

/// Parameters for one generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationParams {
    pub fn new(model: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            temperature,
            max_tokens,
        }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash-exp".to_string(),
            temperature: 0.3,
            max_tokens: 512,
        }
    }
}

/// Raw output of a generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub text: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub finish_reason: String,
}

// ---------------------------------------------------------------------------
// TextGenerator trait
// ---------------------------------------------------------------------------

/// Async trait for text-generation backends.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Send a prompt and return the raw generated text. The text may be
    /// empty, truncated, or non-JSON — callers must not assume structure.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GenerationOutput, GenerateError>;
}

// ---------------------------------------------------------------------------
// GeminiGenerator
// ---------------------------------------------------------------------------

/// Generator backed by the Google generative-language REST API.
pub struct GeminiGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiGenerator {
    /// Create a generator against the public endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Override the base URL (useful for testing with a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the JSON request body for a generateContent call.
    pub fn build_request_body(prompt: &str, params: &GenerationParams) -> serde_json::Value {
        serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": params.temperature,
                "maxOutputTokens": params.max_tokens,
            },
        })
    }
}

/// Deserialize helpers for the generateContent response.
#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
    #[serde(rename = "modelVersion")]
    model_version: Option<String>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GenerationOutput, GenerateError> {
        let body = Self::build_request_body(prompt, params);
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, params.model, self.api_key
        );

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();

        if status == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(GenerateError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GenerateError::Api {
                status,
                message: text,
            });
        }

        let api_resp: GeminiResponse = resp
            .json()
            .await
            .map_err(|e| GenerateError::Parse(e.to_string()))?;

        let candidate = api_resp
            .candidates
            .first()
            .ok_or_else(|| GenerateError::Parse("no candidates in response".into()))?;

        let text = candidate
            .content
            .as_ref()
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let usage = api_resp.usage_metadata.as_ref();

        Ok(GenerationOutput {
            text,
            model: api_resp
                .model_version
                .unwrap_or_else(|| params.model.clone()),
            input_tokens: usage.map(|u| u.prompt_token_count).unwrap_or(0),
            output_tokens: usage.map(|u| u.candidates_token_count).unwrap_or(0),
            finish_reason: candidate
                .finish_reason
                .clone()
                .unwrap_or_else(|| "unknown".into()),
        })
    }
}

// ---------------------------------------------------------------------------
// MockGenerator
// ---------------------------------------------------------------------------

/// A mock generator for testing.
///
/// Each call to `generate` pops the next queued response; an empty queue
/// yields a default response. Prompts are captured for assertions.
pub struct MockGenerator {
    responses: Mutex<VecDeque<Result<GenerationOutput, GenerateError>>>,
    captured: Mutex<Vec<(String, GenerationParams)>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            captured: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response with the given text.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        let output = GenerationOutput {
            text: text.into(),
            model: "mock-model".to_string(),
            input_tokens: 10,
            output_tokens: 5,
            finish_reason: "stop".to_string(),
        };
        self.responses.lock().unwrap().push_back(Ok(output));
        self
    }

    /// Queue an error response.
    pub fn with_error(self, error: GenerateError) -> Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    /// Prompts and params captured so far, in call order.
    pub fn captured(&self) -> Vec<(String, GenerationParams)> {
        self.captured.lock().unwrap().clone()
    }

    /// Number of generate calls made.
    pub fn call_count(&self) -> usize {
        self.captured.lock().unwrap().len()
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GenerationOutput, GenerateError> {
        self.captured
            .lock()
            .unwrap()
            .push((prompt.to_string(), params.clone()));

        let mut queue = self.responses.lock().unwrap();
        match queue.pop_front() {
            Some(resp) => resp,
            None => Ok(GenerationOutput {
                text: "{}".to_string(),
                model: params.model.clone(),
                input_tokens: 10,
                output_tokens: 5,
                finish_reason: "stop".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// UsageTracker
// ---------------------------------------------------------------------------

/// Cumulative token usage across generation requests.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_requests: u64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage from a [`GenerationOutput`].
    pub fn record(&mut self, output: &GenerationOutput) {
        self.total_input_tokens += output.input_tokens;
        self.total_output_tokens += output.output_tokens;
        self.total_requests += 1;
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_input_tokens + self.total_output_tokens
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
