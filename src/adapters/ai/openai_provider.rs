//! OpenAI-compatible provider - AIProvider over a `/chat/completions` API.
//!
//! Works with OpenAI itself and with gateways that speak the same protocol
//! (OpenRouter is the default endpoint).
//!
//! # Configuration
//!
//! ```ignore
//! let config = OpenAIConfig::new(api_key)
//!     .with_model("anthropic/claude-3.5-sonnet")
//!     .with_base_url("https://openrouter.ai/api/v1");
//!
//! let provider = OpenAIProvider::new(config)?;
//! ```
//!
//! The provider makes exactly one HTTP call per `complete`. Retries and the
//! per-call deadline belong to the engine, which knows whether a retry is
//! safe for the step it is running.

use async_trait::async_trait;
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ports::{
    estimate_tokens_by_chars, AIError, AIProvider, ChatRole, CompletionRequest,
    CompletionResponse, FinishReason, ProviderInfo, TokenUsage,
};

/// Default endpoint.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
/// Default model.
pub const DEFAULT_MODEL: &str = "anthropic/claude-3.5-sonnet";

/// Configuration for the OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    api_key: Secret<String>,
    /// Model identifier sent with every request.
    pub model: String,
    /// Base URL for the API.
    pub base_url: String,
    /// HTTP timeout; the engine applies its own, usually shorter, deadline.
    pub timeout: Duration,
    /// Price used for cost estimates.
    pub cost_cents_per_1k_tokens: u32,
    /// Sent as `X-Title` so gateways can attribute traffic.
    pub app_name: Option<String>,
}

impl OpenAIConfig {
    /// Creates a new configuration with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Secret::new(api_key.into()),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
            cost_cents_per_1k_tokens: 1,
            app_name: None,
        }
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the price used for cost estimates.
    pub fn with_cost_per_1k_tokens(mut self, cents: u32) -> Self {
        self.cost_cents_per_1k_tokens = cents;
        self
    }

    /// Sets the application name header.
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

/// Estimated cost in cents, rounded up so small calls still count.
pub fn estimate_cost_cents(total_tokens: u32, cents_per_1k_tokens: u32) -> u32 {
    let cost = (total_tokens as u64 * cents_per_1k_tokens as u64 + 999) / 1000;
    cost.min(u32::MAX as u64) as u32
}

/// OpenAI-compatible provider implementation.
pub struct OpenAIProvider {
    config: OpenAIConfig,
    client: Client,
}

impl OpenAIProvider {
    /// Creates a new provider with the given configuration.
    pub fn new(config: OpenAIConfig) -> Result<Self, AIError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AIError::InvalidRequest(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    fn to_openai_request(&self, request: &CompletionRequest) -> OpenAIRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if let Some(ref prompt) = request.system_prompt {
            messages.push(OpenAIMessage {
                role: "system".to_string(),
                content: prompt.clone(),
            });
        }

        for msg in &request.messages {
            messages.push(OpenAIMessage {
                role: match msg.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                }
                .to_string(),
                content: msg.content.clone(),
            });
        }

        OpenAIRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    async fn send_request(&self, request: &CompletionRequest) -> Result<Response, AIError> {
        let body = self.to_openai_request(request);

        let mut builder = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key()))
            .header("Content-Type", "application/json");
        if let Some(ref name) = self.config.app_name {
            builder = builder.header("X-Title", name.as_str());
        }

        builder.json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                AIError::timeout(self.config.timeout.as_millis() as u64)
            } else if e.is_connect() {
                AIError::network(format!("Connection failed: {}", e))
            } else {
                AIError::network(e.to_string())
            }
        })
    }

    async fn parse_response(&self, response: Response) -> Result<CompletionResponse, AIError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status.as_u16(), body));
        }

        let openai_response: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| AIError::parse(format!("Failed to parse response: {}", e)))?;

        self.to_completion(openai_response)
    }

    fn to_completion(&self, response: OpenAIResponse) -> Result<CompletionResponse, AIError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AIError::parse("No choices in response"))?;

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        };

        let usage = response
            .usage
            .map(|u| {
                TokenUsage::new(
                    u.prompt_tokens,
                    u.completion_tokens,
                    estimate_cost_cents(
                        u.prompt_tokens + u.completion_tokens,
                        self.config.cost_cents_per_1k_tokens,
                    ),
                )
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content: choice.message.content,
            usage,
            model: response.model.unwrap_or_else(|| self.config.model.clone()),
            finish_reason,
        })
    }
}

/// Maps a non-success HTTP status to a typed error.
fn error_for_status(status: u16, body: String) -> AIError {
    match status {
        401 | 403 => AIError::AuthenticationFailed,
        402 => AIError::InvalidRequest(format!("insufficient credits: {}", body)),
        408 => AIError::unavailable(format!("upstream timeout: {}", body)),
        429 => AIError::rate_limited(parse_retry_after(&body)),
        400..=499 => AIError::InvalidRequest(body),
        500..=599 => AIError::unavailable(format!("Server error {}: {}", status, body)),
        _ => AIError::network(format!("Unexpected status {}: {}", status, body)),
    }
}

/// Extracts "try again in Ns" from an error body, defaulting to 30s.
fn parse_retry_after(error_body: &str) -> u32 {
    let message = serde_json::from_str::<serde_json::Value>(error_body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        });

    message
        .as_deref()
        .and_then(|s| s.find("try again in ").map(|idx| &s[idx + 13..]))
        .and_then(|rest| {
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        })
        .unwrap_or(30)
}

#[async_trait]
impl AIProvider for OpenAIProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AIError> {
        let response = self.send_request(&request).await?;
        self.parse_response(response).await
    }

    fn estimate_tokens(&self, text: &str) -> u32 {
        estimate_tokens_by_chars(text)
    }

    fn provider_info(&self) -> ProviderInfo {
        let name = if self.config.base_url.contains("openrouter") {
            "openrouter"
        } else {
            "openai"
        };
        ProviderInfo::new(name, &self.config.model)
    }
}

// ----- OpenAI API Types -----

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    model: Option<String>,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{SessionId, UserId};
    use crate::ports::RequestMetadata;

    fn provider() -> OpenAIProvider {
        OpenAIProvider::new(
            OpenAIConfig::new("sk-test")
                .with_model("test-model")
                .with_base_url("https://example.test/v1/"),
        )
        .unwrap()
    }

    #[test]
    fn config_builder_works() {
        let config = OpenAIConfig::new("sk-test")
            .with_model("gpt-4o-mini")
            .with_base_url("https://api.openai.com/v1/")
            .with_timeout(Duration::from_secs(20))
            .with_cost_per_1k_tokens(3)
            .with_app_name("sales-coach");

        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert_eq!(config.timeout, Duration::from_secs(20));
        assert_eq!(config.cost_cents_per_1k_tokens, 3);
        assert_eq!(config.api_key(), "sk-test");
    }

    #[test]
    fn request_puts_system_prompt_first() {
        let request = CompletionRequest::new(RequestMetadata::new(
            UserId::new(1),
            SessionId::new(),
            "turn",
        ))
        .with_system_prompt("Be a buyer")
        .with_message(ChatRole::Assistant, "Hello?")
        .with_message(ChatRole::User, "Hi")
        .with_max_tokens(500);

        let body = provider().to_openai_request(&request);

        assert_eq!(body.model, "test-model");
        let roles: Vec<&str> = body.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "assistant", "user"]);
        assert_eq!(body.max_tokens, Some(500));
    }

    #[test]
    fn response_maps_content_and_usage() {
        let raw = r#"{
            "model": "test-model",
            "choices": [{"message": {"role": "assistant", "content": "Not interested."}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 900, "completion_tokens": 200}
        }"#;
        let response: OpenAIResponse = serde_json::from_str(raw).unwrap();

        let completion = provider().to_completion(response).unwrap();

        assert_eq!(completion.content, "Not interested.");
        assert_eq!(completion.usage.total_tokens, 1100);
        assert_eq!(completion.usage.estimated_cost_cents, 2);
        assert_eq!(completion.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn response_without_choices_is_parse_error() {
        let response: OpenAIResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(
            provider().to_completion(response),
            Err(AIError::Parse(_))
        ));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(error_for_status(401, String::new()), AIError::AuthenticationFailed);
        assert!(error_for_status(429, String::new()).is_retryable());
        assert!(error_for_status(503, "down".to_string()).is_retryable());
        assert!(!error_for_status(400, "bad".to_string()).is_retryable());
    }

    #[test]
    fn parse_retry_after_from_message() {
        let body = r#"{"error": {"message": "Rate limit reached, please try again in 12s"}}"#;
        assert_eq!(parse_retry_after(body), 12);
        assert_eq!(parse_retry_after("not json"), 30);
    }

    #[test]
    fn cost_rounds_up() {
        assert_eq!(estimate_cost_cents(0, 1), 0);
        assert_eq!(estimate_cost_cents(1, 1), 1);
        assert_eq!(estimate_cost_cents(2000, 1), 2);
        assert_eq!(estimate_cost_cents(2001, 1), 3);
    }
}
