//! Runtime settings for the engine services, derived from `AppConfig`.

use std::time::Duration;

use super::retry::RetryPolicy;
use crate::config::AppConfig;

/// Sampling temperature for judge calls; grading should be repeatable.
pub const JUDGE_TEMPERATURE: f32 = 0.2;

/// Settings shared by the dialogue engine, judge and orchestrator.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Trailing messages sent with each turn.
    pub history_window: usize,
    /// Passages retrieved per query.
    pub top_k: usize,
    pub max_tokens: u32,
    pub temperature: f32,
    pub retry: RetryPolicy,
    /// Longest accepted trainee message, in characters.
    pub max_message_length: usize,
    pub closing_phrases: Vec<String>,
    /// Whether scripted reply suggestions are served.
    pub script_reply_enabled: bool,
    /// Idle time after which a user's in-memory context may be evicted.
    pub idle_eviction: Duration,
}

impl EngineSettings {
    /// Builds settings from loaded configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            history_window: config.dialogue.history_window,
            top_k: config.dialogue.top_k,
            max_tokens: config.ai.max_tokens,
            temperature: config.ai.temperature,
            retry: RetryPolicy::new(
                config.dialogue.max_attempts,
                config.dialogue.backoff_base(),
                config.ai.timeout(),
            ),
            max_message_length: config.dialogue.max_message_length,
            closing_phrases: config.dialogue.closing_phrases.clone(),
            script_reply_enabled: config.dialogue.script_reply_enabled,
            idle_eviction: config.dialogue.idle_eviction(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}
