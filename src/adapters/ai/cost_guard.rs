//! Cost-guarded provider - wrapper that enforces a daily spend budget.
//!
//! Estimated spend is accumulated per UTC day across all users. Once the
//! budget is used up every call fails with `AIError::CostLimitExceeded`
//! until the day rolls over.
//!
//! # Example
//!
//! ```ignore
//! let provider = CostGuardedProvider::new(Arc::new(openai), 5_000, 1);
//! ```

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::foundation::Timestamp;
use crate::ports::{AIError, AIProvider, CompletionRequest, CompletionResponse, ProviderInfo};

use super::openai_provider::estimate_cost_cents;

/// Running spend for one UTC day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendLedger {
    day: NaiveDate,
    spent_cents: u32,
}

impl SpendLedger {
    /// An empty ledger for `day`.
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            spent_cents: 0,
        }
    }

    /// Cents spent on `day`; a different day counts as zero.
    pub fn spent_on(&self, day: NaiveDate) -> u32 {
        if self.day == day {
            self.spent_cents
        } else {
            0
        }
    }

    /// Adds spend for `day`, resetting when the day changed.
    pub fn record(&mut self, day: NaiveDate, cents: u32) {
        if self.day != day {
            self.day = day;
            self.spent_cents = 0;
        }
        self.spent_cents = self.spent_cents.saturating_add(cents);
    }
}

/// AIProvider wrapper that refuses calls once the daily budget is spent.
pub struct CostGuardedProvider {
    inner: Arc<dyn AIProvider>,
    daily_limit_cents: u32,
    cents_per_1k_tokens: u32,
    ledger: Mutex<SpendLedger>,
}

impl CostGuardedProvider {
    /// Wraps `inner` with a daily budget.
    ///
    /// `cents_per_1k_tokens` prices calls whose response carries no cost.
    pub fn new(inner: Arc<dyn AIProvider>, daily_limit_cents: u32, cents_per_1k_tokens: u32) -> Self {
        Self {
            inner,
            daily_limit_cents,
            cents_per_1k_tokens,
            ledger: Mutex::new(SpendLedger::new(Timestamp::now().utc_day())),
        }
    }

    /// Cents spent today.
    pub fn spent_today(&self) -> u32 {
        self.ledger().spent_on(Timestamp::now().utc_day())
    }

    fn ledger(&self) -> MutexGuard<'_, SpendLedger> {
        self.ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_budget(&self, day: NaiveDate) -> Result<(), AIError> {
        let spent = self.ledger().spent_on(day);
        if spent >= self.daily_limit_cents {
            return Err(AIError::cost_limit_exceeded(spent, self.daily_limit_cents));
        }
        Ok(())
    }
}

#[async_trait]
impl AIProvider for CostGuardedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AIError> {
        let day = Timestamp::now().utc_day();
        if let Err(err) = self.check_budget(day) {
            tracing::warn!(
                user_id = %request.metadata.user_id,
                session_id = %request.metadata.session_id,
                limit_cents = self.daily_limit_cents,
                "daily AI budget exhausted"
            );
            return Err(err);
        }

        let user_id = request.metadata.user_id;
        let session_id = request.metadata.session_id;
        let purpose = request.metadata.purpose;
        let prompt_chars = request.prompt_chars();

        let response = self.inner.complete(request).await?;

        let cost = if response.usage.estimated_cost_cents > 0 {
            response.usage.estimated_cost_cents
        } else if response.usage.total_tokens > 0 {
            estimate_cost_cents(response.usage.total_tokens, self.cents_per_1k_tokens)
        } else {
            let tokens = ((prompt_chars + response.content.chars().count()) / 4) as u32;
            estimate_cost_cents(tokens, self.cents_per_1k_tokens)
        };

        let spent = {
            let mut ledger = self.ledger();
            ledger.record(day, cost);
            ledger.spent_on(day)
        };

        tracing::info!(
            %user_id,
            %session_id,
            purpose,
            model = %response.model,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            cost_cents = cost,
            spent_today_cents = spent,
            "AI usage recorded"
        );

        Ok(response)
    }

    fn estimate_tokens(&self, text: &str) -> u32 {
        self.inner.estimate_tokens(text)
    }

    fn provider_info(&self) -> ProviderInfo {
        self.inner.provider_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ai::MockAIProvider;
    use crate::domain::foundation::{SessionId, UserId};
    use crate::ports::{ChatRole, RequestMetadata, TokenUsage};

    fn request() -> CompletionRequest {
        CompletionRequest::new(RequestMetadata::new(UserId::new(1), SessionId::new(), "turn"))
            .with_message(ChatRole::User, "Hello")
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn ledger_resets_on_new_day() {
        let mut ledger = SpendLedger::new(day(1));
        ledger.record(day(1), 40);
        ledger.record(day(1), 2);
        assert_eq!(ledger.spent_on(day(1)), 42);
        assert_eq!(ledger.spent_on(day(2)), 0);

        ledger.record(day(2), 5);
        assert_eq!(ledger.spent_on(day(2)), 5);
        assert_eq!(ledger.spent_on(day(1)), 0);
    }

    #[tokio::test]
    async fn passes_calls_through_under_budget() {
        let mock = MockAIProvider::new().with_response_usage("Hi", TokenUsage::new(10, 10, 3));
        let guard = CostGuardedProvider::new(Arc::new(mock), 100, 1);

        let response = guard.complete(request()).await.unwrap();

        assert_eq!(response.content, "Hi");
        assert_eq!(guard.spent_today(), 3);
    }

    #[tokio::test]
    async fn refuses_calls_once_budget_spent() {
        let mock = MockAIProvider::new()
            .with_response_usage("first", TokenUsage::new(100, 100, 10))
            .with_response("second");
        let guard = CostGuardedProvider::new(Arc::new(mock.clone()), 10, 1);

        guard.complete(request()).await.unwrap();
        let err = guard.complete(request()).await.unwrap_err();

        assert_eq!(err, AIError::cost_limit_exceeded(10, 10));
        assert!(!err.is_retryable());
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn estimates_cost_when_provider_reports_none() {
        let mock = MockAIProvider::new().with_response_usage("ok", TokenUsage::default());
        let guard = CostGuardedProvider::new(Arc::new(mock), 100, 1);

        guard.complete(request()).await.unwrap();

        assert_eq!(guard.spent_today(), 1);
    }
}
