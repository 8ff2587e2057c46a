//! Reporting sink port.
//!
//! Receives one report per finished session, e.g. for a spreadsheet
//! export. The engine calls it at most once per session and only logs
//! failures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::evaluation::Evaluation;
use crate::domain::foundation::{ExternalUserId, SessionId, Timestamp};
use crate::domain::training::Session;

/// Summary of a finished session and its evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: SessionId,
    pub user: String,
    pub scenario: String,
    pub started_at: Timestamp,
    pub ended_at: Timestamp,
    pub duration_minutes: u32,
    pub message_count: usize,
    pub score: Option<u8>,
    pub strengths: Vec<String>,
    pub mistakes: Vec<String>,
    pub recommendations: String,
    pub graded: bool,
}

impl SessionReport {
    /// Builds a report from a closed session and its evaluation.
    pub fn new(
        session: &Session,
        user: &ExternalUserId,
        scenario_name: &str,
        message_count: usize,
        evaluation: &Evaluation,
    ) -> Self {
        let started_at = *session.created_at();
        let ended_at = session.ended_at().copied().unwrap_or(evaluation.created_at);

        Self {
            session_id: session.id(),
            user: user.as_str().to_string(),
            scenario: scenario_name.to_string(),
            started_at,
            ended_at,
            duration_minutes: ended_at.minutes_since(&started_at),
            message_count,
            score: evaluation.score,
            strengths: evaluation.strengths.clone(),
            mistakes: evaluation.mistakes.clone(),
            recommendations: evaluation.recommendations.clone(),
            graded: !evaluation.is_degraded(),
        }
    }
}

/// Errors raised by a reporting sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    #[error("report delivery failed: {0}")]
    Delivery(String),

    #[error("report rejected with status {status}")]
    Rejected { status: u16 },
}

/// Port for exporting finished-session reports.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Deliver one report.
    async fn send(&self, report: &SessionReport) -> Result<(), ReportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::UserId;
    use crate::domain::scenario::ScenarioKey;
    use crate::domain::training::SessionOutcome;

    #[test]
    fn report_sink_is_object_safe() {
        fn _accepts_dyn(_sink: &dyn ReportSink) {}
    }

    #[test]
    fn report_captures_session_and_evaluation() {
        let mut session = Session::open(UserId::new(7), ScenarioKey::new("cold_call").unwrap());
        let ended = session.created_at().plus_secs(300);
        session.close(SessionOutcome::Completed, ended).unwrap();
        let evaluation = Evaluation::ungraded(session.id(), "unparseable");
        let user = ExternalUserId::new("tg:42").unwrap();

        let report = SessionReport::new(&session, &user, "Cold call", 5, &evaluation);

        assert_eq!(report.user, "tg:42");
        assert_eq!(report.scenario, "Cold call");
        assert_eq!(report.duration_minutes, 5);
        assert_eq!(report.message_count, 5);
        assert!(!report.graded);
        assert_eq!(report.score, None);
    }
}
