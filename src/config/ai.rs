//! AI provider configuration

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// AI provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    /// Which provider backs the engine
    #[serde(default)]
    pub provider: AiProvider,

    /// API key for the OpenAI-compatible endpoint
    pub api_key: Option<Secret<String>>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum tokens per reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature for dialogue turns
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Deadline for a single model call, in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Daily spend limit in cents across all users
    #[serde(default = "default_daily_cost_limit")]
    pub daily_cost_limit_cents: u32,

    /// Price used when the provider reports no cost
    #[serde(default = "default_cost_per_1k")]
    pub cost_cents_per_1k_tokens: u32,
}

/// AI provider type
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    /// Any `/chat/completions` compatible service
    #[default]
    OpenAI,
    /// Scripted replies, no network
    Mock,
}

impl AiConfig {
    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check if an API key is configured
    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().trim().is_empty())
    }

    /// Validate AI configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.provider == AiProvider::OpenAI {
            if !self.has_api_key() {
                return Err(ValidationError::MissingRequired("AI__API_KEY"));
            }
            if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
                return Err(ValidationError::InvalidUrl("ai.base_url"));
            }
            if self.model.trim().is_empty() {
                return Err(ValidationError::MissingRequired("AI__MODEL"));
            }
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ValidationError::InvalidTemperature);
        }
        ValidationError::check_range("ai.max_tokens", self.max_tokens as u64, 1, 32_000)?;
        ValidationError::check_range("ai.timeout_secs", self.timeout_secs, 1, 600)?;
        Ok(())
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProvider::default(),
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout(),
            daily_cost_limit_cents: default_daily_cost_limit(),
            cost_cents_per_1k_tokens: default_cost_per_1k(),
        }
    }
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_model() -> String {
    "anthropic/claude-3.5-sonnet".to_string()
}

fn default_max_tokens() -> u32 {
    500
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout() -> u64 {
    30
}

fn default_daily_cost_limit() -> u32 {
    5_000
}

fn default_cost_per_1k() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ai_config_defaults() {
        let config = AiConfig::default();
        assert_eq!(config.provider, AiProvider::OpenAI);
        assert_eq!(config.max_tokens, 500);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.daily_cost_limit_cents, 5_000);
    }

    #[test]
    fn test_validation_requires_key_for_openai() {
        let config = AiConfig::default();
        assert_eq!(
            config.validate(),
            Err(ValidationError::MissingRequired("AI__API_KEY"))
        );
    }

    #[test]
    fn test_mock_provider_needs_no_key() {
        let config = AiConfig {
            provider: AiProvider::Mock,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_valid_config() {
        let config = AiConfig {
            api_key: Some(Secret::new("sk-or-xxx".to_string())),
            ..Default::default()
        };
        assert!(config.has_api_key());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_temperature_and_url() {
        let config = AiConfig {
            api_key: Some(Secret::new("sk-or-xxx".to_string())),
            temperature: 3.5,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidTemperature));

        let config = AiConfig {
            api_key: Some(Secret::new("sk-or-xxx".to_string())),
            base_url: "openrouter.ai".to_string(),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidUrl("ai.base_url")));
    }
}
