//! Application configuration module
//!
//! Configuration is loaded from environment variables with the `SALES_COACH`
//! prefix; nested values are separated by a double underscore. Every section
//! has defaults, so an empty environment only lacks an API key.
//!
//! # Example
//!
//! ```no_run
//! use sales_coach::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("History window: {}", config.dialogue.history_window);
//! ```

mod ai;
mod database;
mod dialogue;
mod error;
mod knowledge;
mod reporting;

pub use ai::{AiConfig, AiProvider};
pub use database::DatabaseConfig;
pub use dialogue::DialogueConfig;
pub use error::{ConfigError, ValidationError};
pub use knowledge::{KnowledgeConfig, ScenariosConfig};
pub use reporting::{LoggingConfig, ReportingConfig};

use serde::Deserialize;

/// Root application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Database configuration (PostgreSQL; empty URL keeps state in memory)
    #[serde(default)]
    pub database: DatabaseConfig,

    /// AI provider configuration
    #[serde(default)]
    pub ai: AiConfig,

    /// Dialogue engine tuning
    #[serde(default)]
    pub dialogue: DialogueConfig,

    /// Retrieval corpus location
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Scenario catalog source
    #[serde(default)]
    pub scenarios: ScenariosConfig,

    /// Session report export
    #[serde(default)]
    pub reporting: ReportingConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// - `SALES_COACH__AI__API_KEY=...` -> `ai.api_key`
    /// - `SALES_COACH__DIALOGUE__CLOSING_PHRASES=deal,goodbye` -> list
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("SALES_COACH")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("dialogue.closing_phrases"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns the first `ValidationError` found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.database.validate()?;
        self.ai.validate()?;
        self.dialogue.validate()?;
        self.knowledge.validate()?;
        self.reporting.validate()?;
        Ok(())
    }
}
