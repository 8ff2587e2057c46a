//! AI Provider Port - Interface for the generative language service.
//!
//! The dialogue engine and the judge both talk to the model through this
//! port; neither knows which service sits behind it.
//!
//! # Design
//!
//! - One non-streaming completion call; providers are stateless
//! - Provider-agnostic message format
//! - Token usage reported per call for cost tracking
//! - Error types classify what may be retried
//!
//! # Example
//!
//! ```ignore
//! use async_trait::async_trait;
//!
//! struct EchoProvider;
//!
//! #[async_trait]
//! impl AIProvider for EchoProvider {
//!     async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AIError> {
//!         let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
//!         Ok(CompletionResponse::new(last, TokenUsage::default(), "echo"))
//!     }
//!     // ... other methods
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{SessionId, UserId};
use crate::domain::training::{Message, MessageRole};

/// Port for generative model interactions.
#[async_trait]
pub trait AIProvider: Send + Sync {
    /// Generate a single completion.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AIError>;

    /// Estimate token count for text (for cost estimation before the call).
    fn estimate_tokens(&self, text: &str) -> u32;

    /// Get provider information (name, model).
    fn provider_info(&self) -> ProviderInfo;
}

/// Rough token estimate used when a provider has no tokenizer: ~4 chars per token.
pub fn estimate_tokens_by_chars(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    (chars + 3) / 4
}

/// Request for a completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Turn history plus the new user message, oldest first.
    pub messages: Vec<ChatMessage>,
    /// System prompt to guide model behavior.
    pub system_prompt: Option<String>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Temperature for response randomness.
    pub temperature: Option<f32>,
    /// Request metadata for tracing and cost tracking.
    pub metadata: RequestMetadata,
}

impl CompletionRequest {
    /// Creates a new completion request with required metadata.
    pub fn new(metadata: RequestMetadata) -> Self {
        Self {
            messages: Vec::new(),
            system_prompt: None,
            max_tokens: None,
            temperature: None,
            metadata,
        }
    }

    /// Adds a message to the conversation.
    pub fn with_message(mut self, role: ChatRole, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage {
            role,
            content: content.into(),
        });
        self
    }

    /// Appends persisted transcript messages, preserving order.
    pub fn with_history(mut self, history: &[Message]) -> Self {
        self.messages.extend(history.iter().map(ChatMessage::from));
        self
    }

    /// Sets the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the maximum tokens to generate.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Sets the temperature.
    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    /// Rough size of everything sent to the model.
    pub fn prompt_chars(&self) -> usize {
        self.system_prompt.as_deref().map_or(0, |s| s.chars().count())
            + self
                .messages
                .iter()
                .map(|m| m.content.chars().count())
                .sum::<usize>()
    }
}

/// A message in the model conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            MessageRole::User => ChatRole::User,
            MessageRole::Assistant => ChatRole::Assistant,
        };
        Self {
            role,
            content: message.content.clone(),
        }
    }
}

/// Role of the message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Request metadata for tracing and cost tracking.
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    /// User the call is made for.
    pub user_id: UserId,
    /// Session the call belongs to.
    pub session_id: SessionId,
    /// Which engine step issued the call (e.g. "opening", "turn", "judge").
    pub purpose: &'static str,
}

impl RequestMetadata {
    /// Creates new request metadata.
    pub fn new(user_id: UserId, session_id: SessionId, purpose: &'static str) -> Self {
        Self {
            user_id,
            session_id,
            purpose,
        }
    }
}

/// Response from a completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content.
    pub content: String,
    /// Token usage and cost.
    pub usage: TokenUsage,
    /// Model that generated the response.
    pub model: String,
    /// Why the model stopped generating.
    pub finish_reason: FinishReason,
}

impl CompletionResponse {
    /// A response that stopped naturally.
    pub fn new(content: impl Into<String>, usage: TokenUsage, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage,
            model: model.into(),
            finish_reason: FinishReason::Stop,
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Prompt + completion.
    pub total_tokens: u32,
    /// Estimated cost in cents.
    pub estimated_cost_cents: u32,
}

impl TokenUsage {
    /// Creates new token usage.
    pub fn new(prompt_tokens: u32, completion_tokens: u32, cost_cents: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            estimated_cost_cents: cost_cents,
        }
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop.
    Stop,
    /// Hit max_tokens limit.
    Length,
    /// Content was filtered for safety.
    ContentFilter,
}

/// Provider information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Provider name (e.g., "openrouter", "mock").
    pub name: String,
    /// Model identifier.
    pub model: String,
}

impl ProviderInfo {
    /// Creates new provider info.
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
        }
    }
}

/// AI provider errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AIError {
    /// Rate limited by provider.
    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u32 },

    /// Provider is unavailable.
    #[error("provider unavailable: {message}")]
    Unavailable { message: String },

    /// API key or authentication failed.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Network error during request.
    #[error("network error: {0}")]
    Network(String),

    /// Failed to parse provider response.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid request configuration.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Daily cost limit reached.
    #[error("cost limit exceeded: {spent_cents} cents spent, limit is {limit_cents} cents")]
    CostLimitExceeded { spent_cents: u32, limit_cents: u32 },

    /// Request timed out.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl AIError {
    /// Creates a rate limited error.
    pub fn rate_limited(retry_after_secs: u32) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Creates a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Creates a cost limit exceeded error.
    pub fn cost_limit_exceeded(spent_cents: u32, limit_cents: u32) -> Self {
        Self::CostLimitExceeded {
            spent_cents,
            limit_cents,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AIError::RateLimited { .. }
                | AIError::Unavailable { .. }
                | AIError::Network(_)
                | AIError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::Timestamp;

    fn test_metadata() -> RequestMetadata {
        RequestMetadata::new(UserId::new(1), SessionId::new(), "turn")
    }

    #[test]
    fn completion_request_builder_works() {
        let request = CompletionRequest::new(test_metadata())
            .with_message(ChatRole::User, "Hello")
            .with_system_prompt("Be a busy client")
            .with_max_tokens(500)
            .with_temperature(0.7);

        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, ChatRole::User);
        assert_eq!(request.system_prompt.as_deref(), Some("Be a busy client"));
        assert_eq!(request.max_tokens, Some(500));
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.prompt_chars(), "Be a busy client".len() + "Hello".len());
    }

    #[test]
    fn history_maps_transcript_roles() {
        let session_id = SessionId::new();
        let history = vec![
            Message {
                session_id,
                role: MessageRole::Assistant,
                content: "Who is this?".to_string(),
                seq: 1,
                created_at: Timestamp::now(),
            },
            Message {
                session_id,
                role: MessageRole::User,
                content: "Alex from Acme".to_string(),
                seq: 2,
                created_at: Timestamp::now(),
            },
        ];

        let request = CompletionRequest::new(test_metadata()).with_history(&history);

        assert_eq!(
            request.messages,
            vec![
                ChatMessage::assistant("Who is this?"),
                ChatMessage::user("Alex from Acme")
            ]
        );
    }

    #[test]
    fn token_usage_calculates_total() {
        let usage = TokenUsage::new(100, 50, 15);
        assert_eq!(usage.total_tokens, 150);
        assert_eq!(usage.estimated_cost_cents, 15);
    }

    #[test]
    fn char_estimate_rounds_up() {
        assert_eq!(estimate_tokens_by_chars(""), 0);
        assert_eq!(estimate_tokens_by_chars("abc"), 1);
        assert_eq!(estimate_tokens_by_chars("abcdefgh"), 2);
    }

    #[test]
    fn ai_error_retryable_classification() {
        assert!(AIError::rate_limited(30).is_retryable());
        assert!(AIError::unavailable("down").is_retryable());
        assert!(AIError::network("reset").is_retryable());
        assert!(AIError::timeout(30_000).is_retryable());

        assert!(!AIError::AuthenticationFailed.is_retryable());
        assert!(!AIError::parse("bad body").is_retryable());
        assert!(!AIError::InvalidRequest("no model".to_string()).is_retryable());
        assert!(!AIError::cost_limit_exceeded(100, 50).is_retryable());
    }

    #[test]
    fn chat_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ChatRole::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&ChatRole::System).unwrap(), "\"system\"");
    }

    #[test]
    fn ai_error_displays_correctly() {
        assert_eq!(
            AIError::rate_limited(30).to_string(),
            "rate limited: retry after 30s"
        );
        assert_eq!(
            AIError::cost_limit_exceeded(1000, 500).to_string(),
            "cost limit exceeded: 1000 cents spent, limit is 500 cents"
        );
        assert_eq!(
            AIError::timeout(1500).to_string(),
            "request timed out after 1500ms"
        );
    }
}
