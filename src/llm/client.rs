//! LLM client trait and the Anthropic provider implementation.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::types::{CompletionRequest, CompletionResponse, StopReason, TokenUsage};

/// Callback invoked with each streamed text chunk.
pub type TokenCallback<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// LLM client trait for making completions.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Complete a prompt.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Complete a prompt, forwarding text chunks to `on_token` as they
    /// arrive. The returned response is identical to what `complete` would
    /// produce. The default implementation completes non-streamed and emits
    /// the whole content as a single chunk.
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        on_token: TokenCallback<'_>,
    ) -> Result<CompletionResponse> {
        let response = self.complete(request).await?;
        on_token(&response.content);
        Ok(response)
    }
}

/// Configuration for LLM clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key
    pub api_key: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// Default model
    pub default_model: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Max transport retries on transient failure (429 / 5xx)
    pub max_retries: u32,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            default_model: None,
            timeout_secs: 120,
            max_retries: 3,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

fn build_http_client(timeout_secs: u64) -> Client {
    let timeout = Duration::from_secs(timeout_secs);

    // Some sandboxed macOS environments can panic during proxy auto-detection
    // in reqwest's default client builder. Fall back to no-proxy in that case.
    match catch_unwind(AssertUnwindSafe(|| {
        Client::builder().timeout(timeout).build()
    })) {
        Ok(Ok(client)) => client,
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client"),
    }
}

const RETRY_BASE_DELAY_MS: u64 = 200;

fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(RETRY_BASE_DELAY_MS * 2u64.pow(attempt))
}

/// Anthropic Claude client.
pub struct AnthropicClient {
    config: ClientConfig,
    http: Client,
}

impl AnthropicClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";
    const DEFAULT_MODEL: &'static str = "claude-sonnet-4-20250514";

    pub fn new(config: ClientConfig) -> Self {
        let http = build_http_client(config.timeout_secs);
        Self { config, http }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
    }

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> AnthropicRequest {
        let model = request
            .model
            .clone()
            .or_else(|| self.config.default_model.clone())
            .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string());

        let messages = request
            .messages
            .iter()
            .map(|m| AnthropicMessage {
                role: match m.role {
                    super::types::ChatRole::User => "user".to_string(),
                    super::types::ChatRole::Assistant => "assistant".to_string(),
                    // System content is carried on the request, not as a message.
                    super::types::ChatRole::System => "user".to_string(),
                },
                content: m.content.clone(),
            })
            .collect();

        AnthropicRequest {
            model,
            messages,
            max_tokens: request.max_tokens.unwrap_or(4096),
            system: request.system.clone(),
            temperature: request.temperature,
            stop_sequences: request.stop.clone(),
            stream: if stream { Some(true) } else { None },
        }
    }

    async fn send(&self, api_request: &AnthropicRequest) -> Result<reqwest::Response> {
        let url = format!("{}/v1/messages", self.base_url());

        let mut attempt = 0u32;
        loop {
            let result = self
                .http
                .post(&url)
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", Self::API_VERSION)
                .header("content-type", "application/json")
                .json(api_request)
                .send()
                .await;

            let retryable = match &result {
                Ok(response) => {
                    let status = response.status();
                    status.as_u16() == 429 || status.is_server_error()
                }
                Err(e) => e.is_timeout() || e.is_connect(),
            };

            if retryable && attempt < self.config.max_retries {
                let delay = retry_delay(attempt);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying LLM request");
                sleep(delay).await;
                attempt += 1;
                continue;
            }

            return result.map_err(|e| Error::llm(format!("HTTP request failed: {}", e), true));
        }
    }

    async fn decode_error(&self, response: reqwest::Response) -> Error {
        let status = response.status();
        let retryable = status.as_u16() == 429 || status.is_server_error();
        let body = response.text().await.unwrap_or_default();

        if let Ok(error) = serde_json::from_str::<AnthropicError>(&body) {
            return Error::llm(
                format!(
                    "Anthropic API error ({}): {}",
                    error.error.error_type, error.error.message
                ),
                retryable,
            );
        }
        Error::llm(format!("Anthropic API error ({}): {}", status, body), retryable)
    }
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<AnthropicContent>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

// Streaming event payloads (the subset we consume).
#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    message: Option<StreamMessageStart>,
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamMessageStart {
    id: String,
    model: String,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
}

fn parse_stop_reason(raw: &str) -> StopReason {
    match raw {
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        "tool_use" => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

fn usage_from(api: AnthropicUsage) -> TokenUsage {
    TokenUsage {
        input_tokens: api.input_tokens,
        output_tokens: api.output_tokens,
        cache_read_tokens: api.cache_read_input_tokens,
        cache_creation_tokens: api.cache_creation_input_tokens,
    }
}

#[async_trait]
impl LLMClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let api_request = self.build_request(&request, false);
        let response = self.send(&api_request).await?;

        if !response.status().is_success() {
            return Err(self.decode_error(response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::llm(format!("Failed to read response: {}", e), true))?;

        let api_response: AnthropicResponse = serde_json::from_str(&body)
            .map_err(|e| Error::llm(format!("Failed to parse response: {}", e), false))?;

        let content = api_response
            .content
            .iter()
            .filter_map(|c| c.text.as_ref())
            .cloned()
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            id: api_response.id,
            model: api_response.model,
            content,
            stop_reason: api_response.stop_reason.as_deref().map(parse_stop_reason),
            usage: usage_from(api_response.usage),
            timestamp: Utc::now(),
        })
    }

    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        on_token: TokenCallback<'_>,
    ) -> Result<CompletionResponse> {
        let api_request = self.build_request(&request, true);
        let response = self.send(&api_request).await?;

        if !response.status().is_success() {
            return Err(self.decode_error(response).await);
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut content = String::new();
        let mut id = String::new();
        let mut model = api_request.model.clone();
        let mut usage = TokenUsage::default();
        let mut stop_reason = None;

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| Error::llm(format!("stream read failed: {}", e), true))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // SSE frames are newline-delimited; data lines carry JSON.
            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);

                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload.is_empty() || payload == "[DONE]" {
                    continue;
                }

                let Ok(event) = serde_json::from_str::<StreamEvent>(payload) else {
                    debug!(line = %payload, "skipping unrecognized stream event");
                    continue;
                };

                match event.event_type.as_str() {
                    "message_start" => {
                        if let Some(start) = event.message {
                            id = start.id;
                            model = start.model;
                            if let Some(u) = start.usage {
                                usage.input_tokens = u.input_tokens;
                            }
                        }
                    }
                    "content_block_delta" => {
                        if let Some(text) = event.delta.as_ref().and_then(|d| d.text.as_deref()) {
                            on_token(text);
                            content.push_str(text);
                        }
                    }
                    "message_delta" => {
                        if let Some(reason) =
                            event.delta.as_ref().and_then(|d| d.stop_reason.as_deref())
                        {
                            stop_reason = Some(parse_stop_reason(reason));
                        }
                        if let Some(u) = event.usage {
                            usage.output_tokens = u.output_tokens;
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(CompletionResponse {
            id,
            model,
            content,
            stop_reason,
            usage,
            timestamp: Utc::now(),
        })
    }
}
