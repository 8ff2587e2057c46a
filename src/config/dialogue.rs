//! Dialogue engine configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Settings for turn generation, retries and auto-finish
#[derive(Debug, Clone, Deserialize)]
pub struct DialogueConfig {
    /// Number of trailing messages sent with each turn
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Passages retrieved per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Model calls per operation, first attempt included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base of the exponential backoff between attempts
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Longest accepted trainee message, in characters
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    /// Phrases that end the dialogue when the counterpart says them
    #[serde(default = "default_closing_phrases")]
    pub closing_phrases: Vec<String>,

    /// Allow suggesting a scripted reply to a client line
    #[serde(default)]
    pub script_reply_enabled: bool,

    /// Seconds without events after which a user's in-memory state is dropped
    #[serde(default = "default_idle_eviction_secs")]
    pub idle_eviction_secs: u64,
}

impl DialogueConfig {
    /// Get backoff base as Duration
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Get idle eviction age as Duration
    pub fn idle_eviction(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_secs)
    }

    /// Validate dialogue configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::check_range("dialogue.history_window", self.history_window as u64, 1, 200)?;
        ValidationError::check_range("dialogue.top_k", self.top_k as u64, 0, 20)?;
        ValidationError::check_range("dialogue.max_attempts", self.max_attempts as u64, 1, 10)?;
        ValidationError::check_range("dialogue.backoff_base_ms", self.backoff_base_ms, 0, 60_000)?;
        ValidationError::check_range(
            "dialogue.max_message_length",
            self.max_message_length as u64,
            1,
            10_000,
        )?;
        ValidationError::check_range(
            "dialogue.idle_eviction_secs",
            self.idle_eviction_secs,
            1,
            7 * 24 * 3600,
        )?;
        Ok(())
    }
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            top_k: default_top_k(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            max_message_length: default_max_message_length(),
            closing_phrases: default_closing_phrases(),
            script_reply_enabled: false,
            idle_eviction_secs: default_idle_eviction_secs(),
        }
    }
}

fn default_history_window() -> usize {
    10
}

fn default_top_k() -> usize {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_max_message_length() -> usize {
    500
}

fn default_idle_eviction_secs() -> u64 {
    1800
}

fn default_closing_phrases() -> Vec<String> {
    vec![
        "let's sign the contract".to_string(),
        "send me the contract".to_string(),
        "goodbye".to_string(),
    ]
}
