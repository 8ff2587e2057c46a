//! AI Provider Adapters.
//!
//! Implementations of the AIProvider port.
//!
//! ## Available Adapters
//!
//! - `MockAIProvider` - Scripted mock for testing
//! - `OpenAIProvider` - OpenAI-compatible chat completions (OpenRouter by default)
//! - `CostGuardedProvider` - Wrapper enforcing a daily spend budget

mod cost_guard;
mod mock_provider;
mod openai_provider;

pub use cost_guard::{CostGuardedProvider, SpendLedger};
pub use mock_provider::{MockAIProvider, MockError, MockResponse, DEFAULT_MOCK_REPLY};
pub use openai_provider::{
    estimate_cost_cents, OpenAIConfig, OpenAIProvider, DEFAULT_BASE_URL, DEFAULT_MODEL,
};
