//! Evaluation entity.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Verdict;
use crate::domain::foundation::{SessionId, Timestamp};

/// Whether the judge produced structured fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    /// Score and lists were parsed from the judge output.
    Graded,
    /// Judging failed or its output was malformed; `raw_output` explains why.
    Ungraded,
}

impl EvaluationStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationStatus::Graded => "graded",
            EvaluationStatus::Ungraded => "ungraded",
        }
    }

    /// Parses the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "graded" => Some(EvaluationStatus::Graded),
            "ungraded" => Some(EvaluationStatus::Ungraded),
            _ => None,
        }
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The judge's assessment of one finished session.
///
/// # Invariants
///
/// - At most one per session
/// - `score` is present exactly when `status == Graded`
/// - `raw_output` is present exactly when `status == Ungraded`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub session_id: SessionId,
    pub score: Option<u8>,
    pub strengths: Vec<String>,
    pub mistakes: Vec<String>,
    pub recommendations: String,
    pub status: EvaluationStatus,
    pub raw_output: Option<String>,
    pub created_at: Timestamp,
}

impl Evaluation {
    /// A structured evaluation built from a parsed verdict.
    pub fn graded(session_id: SessionId, verdict: Verdict) -> Self {
        Self {
            session_id,
            score: Some(verdict.score),
            strengths: verdict.strengths,
            mistakes: verdict.mistakes,
            recommendations: verdict.recommendations,
            status: EvaluationStatus::Graded,
            raw_output: None,
            created_at: Timestamp::now(),
        }
    }

    /// A degraded evaluation that keeps whatever the judge produced.
    pub fn ungraded(session_id: SessionId, raw_output: impl Into<String>) -> Self {
        Self {
            session_id,
            score: None,
            strengths: Vec::new(),
            mistakes: Vec::new(),
            recommendations: String::new(),
            status: EvaluationStatus::Ungraded,
            raw_output: Some(raw_output.into()),
            created_at: Timestamp::now(),
        }
    }

    /// Returns true if structured grading failed.
    pub fn is_degraded(&self) -> bool {
        self.status == EvaluationStatus::Ungraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graded_evaluation_copies_verdict() {
        let verdict = Verdict {
            score: 8,
            strengths: vec!["Good opener".to_string()],
            mistakes: vec![],
            recommendations: "Ask about budget earlier".to_string(),
        };
        let eval = Evaluation::graded(SessionId::new(), verdict);

        assert_eq!(eval.score, Some(8));
        assert_eq!(eval.strengths, vec!["Good opener".to_string()]);
        assert!(!eval.is_degraded());
        assert!(eval.raw_output.is_none());
    }

    #[test]
    fn ungraded_evaluation_keeps_raw_text() {
        let eval = Evaluation::ungraded(SessionId::new(), "I think they did fine");

        assert!(eval.is_degraded());
        assert_eq!(eval.score, None);
        assert_eq!(eval.raw_output.as_deref(), Some("I think they did fine"));
    }

    #[test]
    fn status_storage_form_round_trips() {
        for status in [EvaluationStatus::Graded, EvaluationStatus::Ungraded] {
            assert_eq!(EvaluationStatus::parse(status.as_str()), Some(status));
        }
    }
}
