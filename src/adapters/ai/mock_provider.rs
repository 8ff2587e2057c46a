//! Mock AI Provider for testing.
//!
//! Scripted implementation of the AIProvider port so engine tests run
//! without a real model.
//!
//! # Features
//!
//! - Queued responses, consumed in order
//! - Error injection for retry and degradation paths
//! - Adjustable latency for timeout testing
//! - Call recording for verification
//!
//! # Example
//!
//! ```ignore
//! let provider = MockAIProvider::new()
//!     .with_response("Who is calling?")
//!     .with_error(MockError::Unavailable { message: "down".into() });
//!
//! let response = provider.complete(request).await?;
//! assert_eq!(response.content, "Who is calling?");
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use crate::ports::{
    estimate_tokens_by_chars, AIError, AIProvider, CompletionRequest, CompletionResponse,
    FinishReason, ProviderInfo, TokenUsage,
};

/// Reply used once the queue is exhausted.
pub const DEFAULT_MOCK_REPLY: &str = "Mock response";

/// Mock AI provider for testing.
#[derive(Debug, Clone)]
pub struct MockAIProvider {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    info: ProviderInfo,
    delay: Arc<Mutex<Duration>>,
    calls: Arc<Mutex<Vec<CompletionRequest>>>,
}

/// A configured mock response.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Success { content: String, usage: TokenUsage },
    Error(MockError),
}

/// Mock error types for testing error handling.
#[derive(Debug, Clone)]
pub enum MockError {
    RateLimited { retry_after_secs: u32 },
    Unavailable { message: String },
    AuthenticationFailed,
    Network { message: String },
    Timeout { timeout_ms: u64 },
}

impl From<MockError> for AIError {
    fn from(err: MockError) -> Self {
        match err {
            MockError::RateLimited { retry_after_secs } => AIError::rate_limited(retry_after_secs),
            MockError::Unavailable { message } => AIError::unavailable(message),
            MockError::AuthenticationFailed => AIError::AuthenticationFailed,
            MockError::Network { message } => AIError::network(message),
            MockError::Timeout { timeout_ms } => AIError::timeout(timeout_ms),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Default for MockAIProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAIProvider {
    /// Creates a new mock provider with an empty queue and no latency.
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            info: ProviderInfo::new("mock", "mock-model-1"),
            delay: Arc::new(Mutex::new(Duration::ZERO)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Adds a successful response to the queue.
    pub fn with_response(self, content: impl Into<String>) -> Self {
        self.with_response_usage(content, TokenUsage::new(10, 20, 1))
    }

    /// Adds a successful response with explicit usage.
    pub fn with_response_usage(self, content: impl Into<String>, usage: TokenUsage) -> Self {
        self.push_response(content, usage);
        self
    }

    /// Adds an error response to the queue.
    pub fn with_error(self, error: MockError) -> Self {
        self.push_error(error);
        self
    }

    /// Sets simulated latency per request.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.set_delay(delay);
        self
    }

    /// Queues a response on a provider already shared with the engine.
    pub fn push_response(&self, content: impl Into<String>, usage: TokenUsage) {
        lock(&self.responses).push_back(MockResponse::Success {
            content: content.into(),
            usage,
        });
    }

    /// Queues an error on a provider already shared with the engine.
    pub fn push_error(&self, error: MockError) {
        lock(&self.responses).push_back(MockResponse::Error(error));
    }

    /// Changes latency on a provider already shared with the engine.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    /// Returns the number of calls made to this provider.
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Returns all recorded calls.
    pub fn get_calls(&self) -> Vec<CompletionRequest> {
        lock(&self.calls).clone()
    }

    /// Clears the call history.
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    fn next_response(&self) -> MockResponse {
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| MockResponse::Success {
                content: DEFAULT_MOCK_REPLY.to_string(),
                usage: TokenUsage::new(5, 10, 1),
            })
    }
}

#[async_trait]
impl AIProvider for MockAIProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AIError> {
        lock(&self.calls).push(request);

        // A caller that times out drops us here and leaves the queue untouched.
        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            sleep(delay).await;
        }

        match self.next_response() {
            MockResponse::Success { content, usage } => Ok(CompletionResponse {
                content,
                usage,
                model: self.info.model.clone(),
                finish_reason: FinishReason::Stop,
            }),
            MockResponse::Error(err) => Err(err.into()),
        }
    }

    fn estimate_tokens(&self, text: &str) -> u32 {
        estimate_tokens_by_chars(text)
    }

    fn provider_info(&self) -> ProviderInfo {
        self.info.clone()
    }
}
