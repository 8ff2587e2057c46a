//! Parsing of the judge's structured output.
//!
//! Models often wrap JSON in prose or code fences, use a bare string where
//! a list was asked for, or return a fractional score. Those are accepted;
//! anything that does not yield a score in `0..=10` is a parse failure.

use serde::Deserialize;
use thiserror::Error;

/// Highest score the rubric allows.
pub const MAX_SCORE: u8 = 10;

/// Structured judge result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub score: u8,
    pub strengths: Vec<String>,
    pub mistakes: Vec<String>,
    pub recommendations: String,
}

/// Why the judge output could not be turned into a verdict.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerdictParseError {
    #[error("no JSON object found in judge output")]
    NoJsonObject,

    #[error("judge output is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("score {0} is outside 0..={MAX_SCORE}")]
    ScoreOutOfRange(f64),
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    score: f64,
    #[serde(default, alias = "good_points")]
    strengths: TextOrList,
    #[serde(default)]
    mistakes: TextOrList,
    #[serde(default)]
    recommendations: TextOrList,
}

#[derive(Debug, Deserialize, Default)]
#[serde(untagged)]
enum TextOrList {
    List(Vec<String>),
    Text(String),
    #[default]
    Missing,
}

impl TextOrList {
    fn into_list(self) -> Vec<String> {
        match self {
            TextOrList::List(items) => items
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            TextOrList::Text(text) if text.trim().is_empty() => Vec::new(),
            TextOrList::Text(text) => vec![text.trim().to_string()],
            TextOrList::Missing => Vec::new(),
        }
    }

    fn into_text(self) -> String {
        self.into_list().join("\n")
    }
}

/// Extracts the outermost `{ ... }` span from free-form model output.
fn json_object_span(output: &str) -> Option<&str> {
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    (end > start).then(|| &output[start..=end])
}

/// Parses judge output into a verdict.
pub fn parse_verdict(output: &str) -> Result<Verdict, VerdictParseError> {
    let json = json_object_span(output).ok_or(VerdictParseError::NoJsonObject)?;
    let raw: RawVerdict =
        serde_json::from_str(json).map_err(|e| VerdictParseError::InvalidJson(e.to_string()))?;

    if !raw.score.is_finite() || raw.score < 0.0 || raw.score > f64::from(MAX_SCORE) {
        return Err(VerdictParseError::ScoreOutOfRange(raw.score));
    }

    Ok(Verdict {
        score: raw.score.round() as u8,
        strengths: raw.strengths.into_list(),
        mistakes: raw.mistakes.into_list(),
        recommendations: raw.recommendations.into_text(),
    })
}
