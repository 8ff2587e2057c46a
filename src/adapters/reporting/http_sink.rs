//! Webhook report sink.
//!
//! POSTs each `SessionReport` as JSON, e.g. to a spreadsheet-ingest hook.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::ports::{ReportError, ReportSink, SessionReport};

/// Sends reports to an HTTP endpoint.
pub struct HttpReportSink {
    client: Client,
    url: String,
}

impl HttpReportSink {
    /// Creates a sink posting to `url`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ReportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReportError::Delivery(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReportSink for HttpReportSink {
    async fn send(&self, report: &SessionReport) -> Result<(), ReportError> {
        let response = self
            .client
            .post(&self.url)
            .json(report)
            .send()
            .await
            .map_err(|e| ReportError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReportError::Rejected {
                status: status.as_u16(),
            });
        }

        tracing::debug!(session_id = %report.session_id, url = %self.url, "session report delivered");
        Ok(())
    }
}
