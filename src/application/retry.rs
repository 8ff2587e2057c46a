//! Bounded retry with exponential backoff around generative calls.

use std::time::Duration;

use crate::ports::{AIError, AIProvider, CompletionRequest, CompletionResponse};

/// How often and how patiently the engine calls the generative client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Calls per operation, first attempt included. At least 1.
    pub max_attempts: u32,
    /// Delay after the first failure; doubles on each further failure.
    pub backoff_base: Duration,
    /// Deadline for one call.
    pub call_timeout: Duration,
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is clamped to at least one call.
    pub fn new(max_attempts: u32, backoff_base: Duration, call_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            call_timeout,
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor)
    }

    /// Calls `provider` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Each call is bounded by `call_timeout`; an elapsed deadline counts as
    /// a retryable `AIError::Timeout`. The last error is returned.
    pub async fn complete(
        &self,
        provider: &dyn AIProvider,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, AIError> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let call = provider.complete(request.clone());
            let result = match tokio::time::timeout(self.call_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(AIError::timeout(self.call_timeout.as_millis() as u64)),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        session_id = %request.metadata.session_id,
                        purpose = request.metadata.purpose,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "generative call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::warn!(
                        session_id = %request.metadata.session_id,
                        purpose = request.metadata.purpose,
                        attempt,
                        error = %err,
                        "generative call failed"
                    );
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ai::{MockAIProvider, MockError};
    use crate::domain::foundation::{SessionId, UserId};
    use crate::ports::RequestMetadata;

    fn request() -> CompletionRequest {
        CompletionRequest::new(RequestMetadata::new(UserId::new(1), SessionId::new(), "test"))
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(200))
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
    }

    #[test]
    fn zero_attempts_still_calls_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::from_secs(1)).max_attempts, 1);
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let provider = MockAIProvider::new()
            .with_error(MockError::Unavailable { message: "down".into() })
            .with_error(MockError::Network { message: "reset".into() })
            .with_response("Hello");

        let response = policy(3).complete(&provider, &request()).await.unwrap();

        assert_eq!(response.content, "Hello");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let provider = MockAIProvider::new()
            .with_error(MockError::Unavailable { message: "down".into() })
            .with_error(MockError::Unavailable { message: "down".into() })
            .with_response("too late");

        let err = policy(2).complete(&provider, &request()).await.unwrap_err();

        assert!(matches!(err, AIError::Unavailable { .. }));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let provider = MockAIProvider::new()
            .with_error(MockError::AuthenticationFailed)
            .with_response("unused");

        let err = policy(3).complete(&provider, &request()).await.unwrap_err();

        assert_eq!(err, AIError::AuthenticationFailed);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let provider = MockAIProvider::new()
            .with_response("late")
            .with_delay(Duration::from_millis(500));
        let policy = RetryPolicy::new(1, Duration::ZERO, Duration::from_millis(20));

        let err = policy.complete(&provider, &request()).await.unwrap_err();

        assert_eq!(err, AIError::timeout(20));
    }
}
