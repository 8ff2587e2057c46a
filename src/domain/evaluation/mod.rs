//! Evaluation domain module.
//!
//! The judge's output, how it is parsed, and the prompts used to obtain it.

mod evaluation;
mod rubric;
mod verdict;

pub use evaluation::{Evaluation, EvaluationStatus};
pub use rubric::{
    judge_request, render_transcript, rubric_system_prompt, CLIENT_LABEL, RUBRIC_PROMPT,
    TRAINEE_LABEL,
};
pub use verdict::{parse_verdict, Verdict, VerdictParseError, MAX_SCORE};
