//! Session report export configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Reporting sink configuration
///
/// Reports are only logged when no webhook is configured.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportingConfig {
    /// Endpoint receiving a JSON POST per finished session
    pub webhook_url: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl ReportingConfig {
    /// Configured, non-blank webhook URL
    pub fn webhook(&self) -> Option<&str> {
        self.webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate reporting configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(url) = self.webhook() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ValidationError::InvalidUrl("reporting.webhook_url"));
            }
        }
        ValidationError::check_range("reporting.timeout_secs", self.timeout_secs, 1, 300)
    }
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    10
}

/// Logging configuration, applied by the binary
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

fn default_filter() -> String {
    "info,sales_coach=debug".to_string()
}
