//! Report sink that only writes a log line.

use async_trait::async_trait;

use crate::ports::{ReportError, ReportSink, SessionReport};

/// Used when no export endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReportSink;

#[async_trait]
impl ReportSink for LogReportSink {
    async fn send(&self, report: &SessionReport) -> Result<(), ReportError> {
        tracing::info!(
            session_id = %report.session_id,
            user = %report.user,
            scenario = %report.scenario,
            duration_minutes = report.duration_minutes,
            message_count = report.message_count,
            score = ?report.score,
            graded = report.graded,
            "session report"
        );
        Ok(())
    }
}
